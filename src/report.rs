use crate::{
    inspect::ResolutionReport,
    pipeline::{ConversionAttempt, PipelineResult},
    policy::Strategy,
    tolerance::ToleranceWindow,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub input: PathBuf,
    pub input_sha256: String,
    pub started: String,
    pub finished: String,
    pub window: ToleranceWindow,
    pub strategy: Option<Strategy>,
    pub pre_report: ResolutionReport,
    pub post_report: ResolutionReport,
    pub attempts: Vec<ConversionAttempt>,
    pub accepted: bool,
    pub output: Option<PathBuf>,
    pub diagnostics: Vec<String>,
}

impl RunReport {
    pub fn new(
        input: PathBuf,
        input_sha256: String,
        started: String,
        finished: String,
        result: &PipelineResult,
    ) -> Self {
        Self {
            input,
            input_sha256,
            started,
            finished,
            window: result.window,
            strategy: result.decision.as_ref().map(|d| d.strategy),
            pre_report: result.pre_report.clone(),
            post_report: result.final_report.clone(),
            attempts: result.attempts.clone(),
            accepted: result.accepted,
            output: result.final_artifact.clone(),
            diagnostics: result.diagnostics.clone(),
        }
    }
}
