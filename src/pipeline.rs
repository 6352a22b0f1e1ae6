//! Run orchestration.
//!
//! One submission moves through
//! `Received -> Inspected -> StrategySelected -> Converting -> Verified -> {Accepted | Rejected} -> Released`.
//! A failed raster rebuild is a modeled transition to the degraded direct
//! rewrite of the original input; a failed rewrite or an out-of-tolerance
//! result ends in `Rejected`, and nothing is handed back to the caller.

use crate::{
    config::Config,
    engine::{DownsamplePolicy, Engine},
    error::NormalizeError,
    inspect::{self, ResolutionReport},
    policy::{self, PolicyDecision, Strategy},
    raster,
    rewrite,
    tolerance::ToleranceWindow,
    util::persist_file,
    workspace::RunWorkspace,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An input document and whether the run may delete it once accepted.
#[derive(Debug, Clone)]
pub struct Submission {
    pub path: PathBuf,
    pub owned: bool,
}

impl Submission {
    /// A caller-owned file; never deleted.
    pub fn borrowed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owned: false,
        }
    }

    /// A spool file handed over to the run; removed after an accepted run.
    pub fn owned(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owned: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Received,
    Inspected,
    StrategySelected,
    Converting,
    Verified,
    Accepted,
    Rejected,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptOutcome {
    Success,
    ToolFailure,
    ValidationFailure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionAttempt {
    pub strategy: Strategy,
    /// Direct rewrite taken because a raster rebuild failed.
    pub degraded: bool,
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub outcome: AttemptOutcome,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Where the accepted document was persisted. Always `None` when rejected.
    pub final_artifact: Option<PathBuf>,
    pub window: ToleranceWindow,
    pub pre_report: ResolutionReport,
    /// The most recent inspection: post-conversion if one happened.
    pub final_report: ResolutionReport,
    pub decision: Option<PolicyDecision>,
    pub attempts: Vec<ConversionAttempt>,
    pub accepted: bool,
    pub diagnostics: Vec<String>,
    pub states: Vec<RunState>,
}

struct Run {
    states: Vec<RunState>,
    diagnostics: Vec<String>,
    attempts: Vec<ConversionAttempt>,
    pre: ResolutionReport,
    post: Option<ResolutionReport>,
    decision: Option<PolicyDecision>,
}

impl Run {
    fn new() -> Self {
        Self {
            states: vec![RunState::Received],
            diagnostics: Vec::new(),
            attempts: Vec::new(),
            pre: ResolutionReport::default(),
            post: None,
            decision: None,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!("state {:?} -> {:?}", self.states.last(), next);
        self.states.push(next);
    }

    fn note(&mut self, msg: impl Into<String>) {
        self.diagnostics.push(msg.into());
    }

    fn reject(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!("rejected: {msg}");
        self.note(msg);
        self.advance(RunState::Rejected);
    }
}

pub struct Pipeline<E: Engine> {
    cfg: Config,
    window: ToleranceWindow,
    engine: E,
}

impl<E: Engine> Pipeline<E> {
    pub fn new(cfg: &Config, engine: E) -> Result<Self> {
        let window = cfg.window()?;
        Ok(Self {
            cfg: cfg.clone(),
            window,
            engine,
        })
    }

    pub fn window(&self) -> &ToleranceWindow {
        &self.window
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Normalizes `submission`, persisting the result at `output` only if it
    /// is accepted. Errors are reserved for infrastructure failures (scratch
    /// space, persisting the output); a rejected document is an `Ok` result
    /// with `accepted == false`.
    pub fn run(&self, submission: &Submission, output: &Path) -> Result<PipelineResult> {
        let workspace = RunWorkspace::create(Path::new(&self.cfg.paths.work_dir))
            .with_context(|| format!("creating run workspace under {}", self.cfg.paths.work_dir))?;
        info!(
            "run input={} workspace={} window={}",
            submission.path.display(),
            workspace.path().display(),
            self.window
        );

        let mut run = Run::new();
        let converted = self.drive(&mut run, &submission.path, workspace.path());

        let mut final_artifact = None;
        if let Some(artifact) = converted {
            persist_file(&artifact, output)
                .with_context(|| format!("persisting output to {}", output.display()))?;
            info!("accepted -> {}", output.display());
            final_artifact = Some(output.to_path_buf());
        }

        let ws_path = workspace.path().to_path_buf();
        if let Err(e) = workspace.release() {
            warn!("failed to remove workspace {}: {e}", ws_path.display());
            run.note(format!("failed to remove workspace {}: {e}", ws_path.display()));
        }
        if final_artifact.is_some() && submission.owned {
            if let Err(e) = std::fs::remove_file(&submission.path) {
                warn!("failed to remove input {}: {e}", submission.path.display());
                run.note(format!("failed to remove input: {e}"));
            }
        }
        run.advance(RunState::Released);

        let accepted = final_artifact.is_some();
        let final_report = run.post.clone().unwrap_or_else(|| run.pre.clone());
        Ok(PipelineResult {
            final_artifact,
            window: self.window,
            pre_report: run.pre,
            final_report,
            decision: run.decision,
            attempts: run.attempts,
            accepted,
            diagnostics: run.diagnostics,
            states: run.states,
        })
    }

    /// Returns the verified artifact inside `work`, or `None` once rejected.
    fn drive(&self, run: &mut Run, input: &Path, work: &Path) -> Option<PathBuf> {
        let pre = match inspect::inspect(&self.cfg, &self.engine, input) {
            Ok(r) => r,
            Err(e) => {
                run.reject(format!("pre-conversion inspection failed: {e}"));
                return None;
            }
        };
        for d in &pre.diagnostics {
            run.note(format!("pre-inspection: {d}"));
        }
        run.pre = pre;
        run.advance(RunState::Inspected);

        let decision = policy::decide(&self.cfg, &self.window, &run.pre);
        info!(
            "policy strategy={:?} forced={} images={} min_dpi={:?}",
            decision.strategy,
            decision.forced,
            run.pre.samples.len(),
            decision.min_observed_dpi
        );
        let strategy = decision.strategy;
        run.decision = Some(decision);
        run.advance(RunState::StrategySelected);

        run.advance(RunState::Converting);
        let converted = self.convert(run, strategy, input, work)?;

        let post = match inspect::inspect(&self.cfg, &self.engine, &converted) {
            Ok(r) => r,
            Err(e) => {
                run.reject(format!("post-conversion inspection failed: {e}"));
                return None;
            }
        };
        for d in &post.diagnostics {
            run.note(format!("post-inspection: {d}"));
        }
        let verdict = verify(&self.window, &run.pre, &post);
        run.post = Some(post);
        run.advance(RunState::Verified);

        match verdict {
            Ok(warnings) => {
                for w in warnings {
                    warn!("{w}");
                    run.note(w);
                }
                run.advance(RunState::Accepted);
                Some(converted)
            }
            Err(e) => {
                if let Some(last) = run.attempts.last_mut() {
                    last.outcome = AttemptOutcome::ValidationFailure;
                    last.detail = Some(e.to_string());
                }
                run.reject(e.to_string());
                None
            }
        }
    }

    fn convert(
        &self,
        run: &mut Run,
        strategy: Strategy,
        input: &Path,
        work: &Path,
    ) -> Option<PathBuf> {
        match strategy {
            Strategy::DirectRewrite => self.direct_rewrite(run, input, work, false),
            Strategy::RasterizeThenRewrite | Strategy::RasterizeOnlyFallback => {
                let rebuilt = match raster::rebuild(
                    &self.cfg,
                    &self.engine,
                    input,
                    work,
                    self.window.target_dpi(),
                    self.cfg.raster.color_mode,
                ) {
                    Ok(r) => r,
                    Err(e) => {
                        run.attempts.push(ConversionAttempt {
                            strategy,
                            degraded: false,
                            input: input.to_path_buf(),
                            output: None,
                            outcome: AttemptOutcome::ToolFailure,
                            detail: Some(e.to_string()),
                        });
                        warn!("raster rebuild failed, taking degraded direct rewrite: {e}");
                        run.note(format!(
                            "raster rebuild failed ({e}); fell back to direct rewrite of the original"
                        ));
                        return self.direct_rewrite(run, input, work, true);
                    }
                };
                for w in &rebuilt.warnings {
                    run.note(w.clone());
                }

                if strategy == Strategy::RasterizeOnlyFallback {
                    run.attempts.push(ConversionAttempt {
                        strategy,
                        degraded: false,
                        input: input.to_path_buf(),
                        output: Some(rebuilt.document.clone()),
                        outcome: AttemptOutcome::Success,
                        detail: None,
                    });
                    return Some(rebuilt.document);
                }

                // Bitmaps are already at target; keep them bit-for-bit.
                self.rewrite_step(
                    run,
                    strategy,
                    false,
                    input,
                    &rebuilt.document,
                    work,
                    DownsamplePolicy::Preserve,
                )
            }
        }
    }

    fn direct_rewrite(
        &self,
        run: &mut Run,
        input: &Path,
        work: &Path,
        degraded: bool,
    ) -> Option<PathBuf> {
        let downsample = if degraded {
            DownsamplePolicy::Resample {
                filter: self.cfg.rewrite.downsample_filter,
            }
        } else {
            rewrite::downsample_for(&self.cfg, &self.window, &run.pre)
        };
        self.rewrite_step(
            run,
            Strategy::DirectRewrite,
            degraded,
            input,
            input,
            work,
            downsample,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn rewrite_step(
        &self,
        run: &mut Run,
        strategy: Strategy,
        degraded: bool,
        original: &Path,
        source: &Path,
        work: &Path,
        downsample: DownsamplePolicy,
    ) -> Option<PathBuf> {
        let out = work.join("normalized.pdf");
        let result = rewrite::rewrite(
            &self.cfg,
            &self.engine,
            source,
            &out,
            &self.window,
            self.cfg.rewrite.color_profile,
            downsample,
        );
        match result {
            Ok(()) => {
                run.attempts.push(ConversionAttempt {
                    strategy,
                    degraded,
                    input: original.to_path_buf(),
                    output: Some(out.clone()),
                    outcome: AttemptOutcome::Success,
                    detail: None,
                });
                Some(out)
            }
            Err(e) => {
                run.attempts.push(ConversionAttempt {
                    strategy,
                    degraded,
                    input: original.to_path_buf(),
                    output: None,
                    outcome: AttemptOutcome::ToolFailure,
                    detail: Some(e.to_string()),
                });
                run.reject(format!("rewrite failed: {e}"));
                None
            }
        }
    }
}

/// Checks the post-conversion report against `window`. Returns warnings on
/// success.
pub fn verify(
    window: &ToleranceWindow,
    pre: &ResolutionReport,
    post: &ResolutionReport,
) -> Result<Vec<String>, NormalizeError> {
    if post.is_empty() {
        if pre.is_empty() {
            return Ok(Vec::new());
        }
        return Ok(vec![format!(
            "no images found after conversion although {} were found before; content may have been flattened or merged",
            pre.samples.len()
        )]);
    }

    let outside: Vec<String> = post
        .samples
        .iter()
        .filter(|s| !window.contains(s.effective_dpi))
        .map(|s| format!("page {} at {:.1} dpi", s.page, s.effective_dpi))
        .collect();
    if outside.is_empty() {
        Ok(Vec::new())
    } else {
        Err(NormalizeError::Validation {
            detail: format!("{} outside {window}", outside.join(", ")),
        })
    }
}
