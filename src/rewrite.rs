use crate::{
    config::{ColorProfile, Config},
    engine::{DownsamplePolicy, Engine, ImageParams, RewriteIn},
    error::NormalizeError,
    inspect::ResolutionReport,
    tolerance::ToleranceWindow,
};
use std::path::Path;
use tracing::info;

/// Resample only when some image sits outside the window; otherwise keep
/// samples bit-for-bit.
pub fn downsample_for(
    cfg: &Config,
    window: &ToleranceWindow,
    report: &ResolutionReport,
) -> DownsamplePolicy {
    let all_inside = report.samples.iter().all(|s| window.contains(s.effective_dpi));
    if all_inside {
        DownsamplePolicy::Preserve
    } else {
        DownsamplePolicy::Resample {
            filter: cfg.rewrite.downsample_filter,
        }
    }
}

/// Rewrites `input` into `output` with every image channel pinned to the
/// window's target. `input` is never modified.
pub fn rewrite(
    cfg: &Config,
    engine: &dyn Engine,
    input: &Path,
    output: &Path,
    window: &ToleranceWindow,
    color_profile: ColorProfile,
    downsample: DownsamplePolicy,
) -> Result<(), NormalizeError> {
    if input == output {
        return Err(NormalizeError::tool(
            "ghostscript",
            format!("refusing to rewrite in place: {}", input.display()),
        ));
    }
    let req = RewriteIn {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        compatibility_level: cfg.rewrite.compatibility_level.clone(),
        pdf_settings: Some(cfg.rewrite.pdf_settings.clone()).filter(|s| !s.is_empty()),
        color_profile,
        images: Some(ImageParams {
            resolution: window.target_dpi(),
            downsample,
        }),
    };
    info!(
        "rewrite {} -> {} dpi={} color={:?} downsample={:?}",
        input.display(),
        output.display(),
        window.target_dpi(),
        color_profile,
        downsample
    );
    engine.rewrite(&req)
}
