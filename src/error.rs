use thiserror::Error;

/// Failures raised by the inspection and conversion stages.
///
/// The orchestrator decides which of these abort a run and which only
/// downgrade the strategy; see [`crate::pipeline`].
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// An external process could not be started, timed out, or exited non-zero.
    #[error("{tool} failed: {detail}")]
    ToolInvocation { tool: String, detail: String },

    /// The raster stage finished but left nothing usable behind.
    #[error("rasterization produced no usable output: {detail}")]
    Rasterization { detail: String },

    /// Post-conversion densities fall outside the tolerance window.
    #[error("post-conversion density outside tolerance: {detail}")]
    Validation { detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl NormalizeError {
    pub fn tool(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ToolInvocation {
            tool: tool.into(),
            detail: detail.into(),
        }
    }
}
