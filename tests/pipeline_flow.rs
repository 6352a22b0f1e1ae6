use dpi_normalize::{
    config::Config,
    engine::{DownsamplePolicy, Engine, RasterizeIn, RewriteIn, ToolDiag},
    error::NormalizeError,
    pipeline::{AttemptOutcome, Pipeline, RunState, Submission},
    policy::Strategy,
    tolerance::ToleranceProfile,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Clone, Copy, PartialEq)]
enum RewriteFailure {
    Never,
    NeutralOnly,
    Always,
}

struct FakeEngine {
    listings: RefCell<VecDeque<Result<String, NormalizeError>>>,
    raster_pages: usize,
    rasterize_fails: bool,
    assemble_fails: bool,
    rewrite_failure: RewriteFailure,
    calls: RefCell<Vec<String>>,
}

impl FakeEngine {
    fn new(listings: Vec<Result<String, NormalizeError>>) -> Self {
        Self {
            listings: RefCell::new(listings.into()),
            raster_pages: 2,
            rasterize_fails: false,
            assemble_fails: false,
            rewrite_failure: RewriteFailure::Never,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl Engine for FakeEngine {
    fn doctor(&self) -> Vec<ToolDiag> {
        Vec::new()
    }

    fn list_images(&self, _input: &Path) -> Result<String, NormalizeError> {
        self.calls.borrow_mut().push("list".into());
        self.listings
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }

    fn rewrite(&self, req: &RewriteIn) -> Result<(), NormalizeError> {
        let label = match &req.images {
            None => "rewrite:neutral".to_string(),
            Some(p) => match p.downsample {
                DownsamplePolicy::Preserve => format!("rewrite:{}:preserve", p.resolution),
                DownsamplePolicy::Resample { .. } => format!("rewrite:{}:resample", p.resolution),
            },
        };
        self.calls.borrow_mut().push(label);
        let fail = match self.rewrite_failure {
            RewriteFailure::Never => false,
            RewriteFailure::NeutralOnly => req.images.is_none(),
            RewriteFailure::Always => true,
        };
        if fail {
            return Err(NormalizeError::tool("ghostscript", "exited with 1: Unrecoverable error"));
        }
        std::fs::write(&req.output, b"%PDF-1.4 rewritten").map_err(NormalizeError::from)
    }

    fn rasterize(&self, req: &RasterizeIn) -> Result<(), NormalizeError> {
        self.calls.borrow_mut().push(format!("rasterize:{}", req.dpi));
        if self.rasterize_fails {
            return Err(NormalizeError::tool("pdftoppm", "exited with 1: Couldn't read xref table"));
        }
        let dir = req.output_prefix.parent().unwrap();
        for n in 1..=self.raster_pages {
            std::fs::write(dir.join(format!("page-{n}.png")), b"png")?;
        }
        Ok(())
    }

    fn assemble(&self, pages: &[PathBuf], output: &Path) -> Result<(), NormalizeError> {
        self.calls.borrow_mut().push(format!("assemble:{}", pages.len()));
        if self.assemble_fails {
            return Err(NormalizeError::tool("img2pdf", "exited with 1: cannot read input image"));
        }
        std::fs::write(output, b"%PDF-1.4 assembled")?;
        Ok(())
    }
}

fn listing(samples: &[(u32, u32)]) -> Result<String, NormalizeError> {
    let mut out = String::from(
        "page   num  type   width height color comp bpc  enc interp  object ID x-ppi y-ppi size ratio\n\
         --------------------------------------------------------------------------------------------\n",
    );
    for (i, (page, dpi)) in samples.iter().enumerate() {
        out.push_str(&format!(
            "{page:>4} {i:>5} image    2480  3508  gray    1   8  jpeg   no  {:>8}  0 {dpi:>5} {dpi:>5}  412K 4.7%\n",
            10 + i
        ));
    }
    Ok(out)
}

fn inline_listing(dpi: u32) -> Result<String, NormalizeError> {
    let mut out = listing(&[])?;
    out.push_str(&format!(
        "   1     0 image     640   480  gray    1   8  image  no   [inline] {dpi:>5} {dpi:>5}  1.2K  12%\n"
    ));
    Ok(out)
}

struct Fixture {
    dir: TempDir,
    cfg: Config,
    input: PathBuf,
    output: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.paths.work_dir = dir.path().join("work").display().to_string();
        let input = dir.path().join("scan.pdf");
        std::fs::write(&input, b"%PDF-1.4 original").unwrap();
        let output = dir.path().join("out").join("normalized_scan.pdf");
        Self {
            dir,
            cfg,
            input,
            output,
        }
    }

    fn work_is_empty(&self) -> bool {
        let work = self.dir.path().join("work");
        std::fs::read_dir(work).map(|mut d| d.next().is_none()).unwrap_or(true)
    }
}

#[test]
fn low_resolution_is_rasterized_then_accepted() {
    let fx = Fixture::new();
    let engine = FakeEngine::new(vec![listing(&[(1, 72)]), listing(&[(1, 300)])]);
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert!(res.accepted, "{:?}", res.diagnostics);
    assert_eq!(res.decision.as_ref().unwrap().strategy, Strategy::RasterizeThenRewrite);
    assert_eq!(res.final_artifact.as_deref(), Some(fx.output.as_path()));
    assert!(fx.output.exists());
    assert!(fx.input.exists());
    assert_eq!(res.final_report.samples[0].effective_dpi, 300.0);
    assert_eq!(
        pipeline.engine().calls(),
        vec![
            "list",
            "rewrite:neutral",
            "rasterize:300",
            "assemble:2",
            "rewrite:300:preserve",
            "list"
        ]
    );
    assert_eq!(
        res.states[res.states.len() - 2..],
        [RunState::Accepted, RunState::Released]
    );
    assert!(fx.work_is_empty());
}

#[test]
fn compliant_document_skips_rasterization() {
    let mut fx = Fixture::new();
    fx.cfg.tolerance.profile = ToleranceProfile::Custom;
    fx.cfg.tolerance.lower = 290.0;
    fx.cfg.tolerance.upper = 310.0;
    let engine = FakeEngine::new(vec![
        listing(&[(1, 298), (2, 305)]),
        listing(&[(1, 298), (2, 305)]),
    ]);
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert!(res.accepted);
    assert_eq!(res.decision.unwrap().strategy, Strategy::DirectRewrite);
    assert!(!pipeline.engine().calls().iter().any(|c| c.starts_with("rasterize")));
    assert!(pipeline.engine().calls().contains(&"rewrite:300:preserve".to_string()));
    assert!(fx.work_is_empty());
}

#[test]
fn zero_raster_pages_falls_back_to_direct_rewrite() {
    let fx = Fixture::new();
    let mut engine = FakeEngine::new(vec![listing(&[(1, 72)]), listing(&[(1, 300)])]);
    engine.raster_pages = 0;
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert!(res.accepted, "{:?}", res.diagnostics);
    assert_eq!(res.attempts.len(), 2);
    assert_eq!(res.attempts[0].strategy, Strategy::RasterizeThenRewrite);
    assert_eq!(res.attempts[0].outcome, AttemptOutcome::ToolFailure);
    assert!(res.attempts[0].detail.as_deref().unwrap().contains("no usable output"));
    assert_eq!(res.attempts[1].strategy, Strategy::DirectRewrite);
    assert!(res.attempts[1].degraded);
    assert_eq!(res.attempts[1].input, fx.input);
    assert!(!pipeline.engine().calls().iter().any(|c| c.starts_with("assemble")));
    assert!(pipeline.engine().calls().contains(&"rewrite:300:resample".to_string()));
    assert!(res.diagnostics.iter().any(|d| d.contains("fell back")));
    assert!(fx.work_is_empty());
}

#[test]
fn rewrite_failure_rejects_without_output() {
    let fx = Fixture::new();
    let mut engine = FakeEngine::new(vec![listing(&[(1, 300)])]);
    engine.rewrite_failure = RewriteFailure::Always;
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert!(!res.accepted);
    assert!(res.final_artifact.is_none());
    assert!(!fx.output.exists());
    assert_eq!(res.attempts[0].outcome, AttemptOutcome::ToolFailure);
    assert!(res.diagnostics.last().unwrap().contains("Unrecoverable error"));
    assert_eq!(
        res.states[res.states.len() - 2..],
        [RunState::Rejected, RunState::Released]
    );
    assert!(fx.work_is_empty());
}

#[test]
fn out_of_tolerance_result_is_rejected() {
    let fx = Fixture::new();
    let engine = FakeEngine::new(vec![listing(&[(1, 300)]), listing(&[(1, 150)])]);
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert!(!res.accepted);
    assert!(!fx.output.exists());
    assert_eq!(res.attempts.last().unwrap().outcome, AttemptOutcome::ValidationFailure);
    assert_eq!(res.final_report.samples[0].effective_dpi, 150.0);
    assert!(res.diagnostics.last().unwrap().contains("page 1 at 150.0 dpi"));
    assert!(fx.work_is_empty());
}

#[test]
fn empty_post_report_is_only_a_warning() {
    let fx = Fixture::new();
    let engine = FakeEngine::new(vec![listing(&[(1, 300)]), listing(&[])]);
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert!(res.accepted);
    assert!(res.final_report.is_empty());
    assert!(res.diagnostics.iter().any(|d| d.contains("no images found after conversion")));
}

#[test]
fn unreadable_document_is_rejected() {
    let fx = Fixture::new();
    let engine = FakeEngine::new(vec![Err(NormalizeError::tool(
        "pdfimages",
        "exited with 1: Syntax Error: Couldn't read xref table",
    ))]);
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert!(!res.accepted);
    assert!(res.attempts.is_empty());
    assert!(res.decision.is_none());
    assert!(fx.work_is_empty());
}

#[test]
fn failed_prenormalization_still_rebuilds() {
    let fx = Fixture::new();
    let mut engine = FakeEngine::new(vec![listing(&[(1, 72)]), listing(&[(1, 300)])]);
    engine.rewrite_failure = RewriteFailure::NeutralOnly;
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert!(res.accepted);
    assert_eq!(res.attempts.len(), 1);
    assert!(!res.attempts[0].degraded);
    assert!(res.diagnostics.iter().any(|d| d.contains("pre-normalization failed")));
}

#[test]
fn rasterize_only_ships_assembled_document() {
    let mut fx = Fixture::new();
    fx.cfg.policy.forced_strategy = "RASTERIZE_ONLY".into();
    let engine = FakeEngine::new(vec![listing(&[(1, 72)]), listing(&[(1, 300)])]);
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert!(res.accepted);
    assert_eq!(std::fs::read(&fx.output).unwrap(), b"%PDF-1.4 assembled");
    assert!(!pipeline.engine().calls().iter().any(|c| c.starts_with("rewrite:300")));
}

#[test]
fn second_pass_on_compliant_output_stays_in_tolerance() {
    let fx = Fixture::new();
    let engine = FakeEngine::new(vec![
        listing(&[(1, 300), (2, 300)]),
        listing(&[(1, 300), (2, 300)]),
        listing(&[(1, 300), (2, 300)]),
        listing(&[(1, 300), (2, 300)]),
    ]);
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let first = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();
    assert!(first.accepted);

    let again = fx.dir.path().join("out").join("again.pdf");
    let second = pipeline.run(&Submission::borrowed(&fx.output), &again).unwrap();
    assert!(second.accepted);
    assert_eq!(second.decision.unwrap().strategy, Strategy::DirectRewrite);
    let w = pipeline.window();
    assert!(second.final_report.samples.iter().all(|s| w.contains(s.effective_dpi)));
}

#[test]
fn owned_input_removed_only_when_accepted() {
    let fx = Fixture::new();
    let engine = FakeEngine::new(vec![listing(&[(1, 300)]), listing(&[(1, 300)])]);
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();
    let res = pipeline.run(&Submission::owned(&fx.input), &fx.output).unwrap();
    assert!(res.accepted);
    assert!(!fx.input.exists());

    let fx = Fixture::new();
    let engine = FakeEngine::new(vec![listing(&[(1, 300)]), listing(&[(1, 100)])]);
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();
    let res = pipeline.run(&Submission::owned(&fx.input), &fx.output).unwrap();
    assert!(!res.accepted);
    assert!(fx.input.exists());
}

#[test]
fn low_resolution_inline_image_triggers_rasterization() {
    let fx = Fixture::new();
    let engine = FakeEngine::new(vec![inline_listing(72), inline_listing(300)]);
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert_eq!(res.pre_report.samples.len(), 1);
    assert_eq!(res.decision.as_ref().unwrap().strategy, Strategy::RasterizeThenRewrite);
    assert!(pipeline.engine().calls().contains(&"rasterize:300".to_string()));
    assert!(res.accepted, "{:?}", res.diagnostics);
}

#[test]
fn inline_image_out_of_tolerance_is_rejected() {
    let fx = Fixture::new();
    let engine = FakeEngine::new(vec![listing(&[(1, 300)]), inline_listing(72)]);
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert!(!res.accepted);
    assert!(!fx.output.exists());
}

#[test]
fn assembler_failure_falls_back_to_direct_rewrite() {
    let fx = Fixture::new();
    let mut engine = FakeEngine::new(vec![listing(&[(1, 72)]), listing(&[(1, 300)])]);
    engine.assemble_fails = true;
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert!(res.accepted, "{:?}", res.diagnostics);
    assert_eq!(res.attempts.len(), 2);
    assert_eq!(res.attempts[0].strategy, Strategy::RasterizeThenRewrite);
    assert_eq!(res.attempts[0].outcome, AttemptOutcome::ToolFailure);
    assert!(res.attempts[0].detail.as_deref().unwrap().contains("img2pdf"));
    assert_eq!(res.attempts[1].strategy, Strategy::DirectRewrite);
    assert!(res.attempts[1].degraded);
    assert_eq!(res.attempts[1].input, fx.input);
    assert!(fx.work_is_empty());
}

#[test]
fn rasterizer_failure_falls_back_to_direct_rewrite() {
    let fx = Fixture::new();
    let mut engine = FakeEngine::new(vec![listing(&[(1, 72)]), listing(&[(1, 300)])]);
    engine.rasterize_fails = true;
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert!(res.accepted, "{:?}", res.diagnostics);
    assert_eq!(res.attempts.len(), 2);
    assert_eq!(res.attempts[0].outcome, AttemptOutcome::ToolFailure);
    assert!(res.attempts[0].detail.as_deref().unwrap().contains("pdftoppm"));
    assert!(res.attempts[1].degraded);
    assert_eq!(res.attempts[1].outcome, AttemptOutcome::Success);
    assert!(!pipeline.engine().calls().iter().any(|c| c.starts_with("assemble")));
    assert!(pipeline.engine().calls().contains(&"rewrite:300:resample".to_string()));
    assert!(fx.work_is_empty());
}

#[test]
fn rewrite_failure_on_degraded_path_is_terminal() {
    let fx = Fixture::new();
    let mut engine = FakeEngine::new(vec![listing(&[(1, 72)])]);
    engine.rasterize_fails = true;
    engine.rewrite_failure = RewriteFailure::Always;
    let pipeline = Pipeline::new(&fx.cfg, engine).unwrap();

    let res = pipeline.run(&Submission::borrowed(&fx.input), &fx.output).unwrap();

    assert!(!res.accepted);
    assert!(res.final_artifact.is_none());
    assert!(!fx.output.exists());
    assert_eq!(res.attempts.len(), 2);
    assert!(res.attempts[1].degraded);
    assert_eq!(res.attempts[1].outcome, AttemptOutcome::ToolFailure);
    assert!(res.diagnostics.last().unwrap().starts_with("rewrite failed"));
    assert_eq!(
        res.states[res.states.len() - 2..],
        [RunState::Rejected, RunState::Released]
    );
    assert_eq!(pipeline.engine().calls().iter().filter(|c| *c == "list").count(), 1);
    assert!(fx.work_is_empty());
}
