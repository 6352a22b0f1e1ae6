use crate::config::{ColorProfile, DownsampleFilter, RasterColorMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDiag {
    pub tool: String,
    pub exe: String,
    pub ok: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownsamplePolicy {
    /// Keep image samples untouched: no downsampling, no automatic recompression.
    Preserve,
    /// Resample every image channel down to the target with `filter`.
    Resample { filter: DownsampleFilter },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageParams {
    pub resolution: u32,
    pub downsample: DownsamplePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteIn {
    pub input: PathBuf,
    pub output: PathBuf,
    pub compatibility_level: String,
    pub pdf_settings: Option<String>,
    pub color_profile: ColorProfile,
    /// `None` leaves the engine's image defaults alone.
    pub images: Option<ImageParams>,
}

impl RewriteIn {
    /// Structural rewrite with engine defaults, used to canonicalize broken inputs.
    pub fn neutral(input: PathBuf, output: PathBuf, compatibility_level: &str) -> Self {
        Self {
            input,
            output,
            compatibility_level: compatibility_level.to_string(),
            pdf_settings: None,
            color_profile: ColorProfile::Preserve,
            images: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterizeIn {
    pub input: PathBuf,
    /// Bitmaps land at `<prefix>-<page>.png`.
    pub output_prefix: PathBuf,
    pub dpi: u32,
    pub color_mode: RasterColorMode,
}
