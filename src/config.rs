use crate::tolerance::{ToleranceProfile, ToleranceWindow};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: Global,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub tolerance: Tolerance,
    #[serde(default)]
    pub policy: Policy,
    #[serde(default)]
    pub inspect: Inspect,
    #[serde(default)]
    pub rewrite: Rewrite,
    #[serde(default)]
    pub raster: Raster,
    #[serde(default)]
    pub tools: Tools,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub debug: Debug,
    #[serde(default)]
    pub security: Security,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.window()
            .with_context(|| "invalid [tolerance] section")?;
        if self.tools.inspect_timeout_seconds == 0
            || self.tools.rewrite_timeout_seconds == 0
            || self.tools.raster_timeout_seconds == 0
            || self.tools.assemble_timeout_seconds == 0
        {
            anyhow::bail!("tool timeouts must be > 0");
        }
        if !matches!(
            self.policy.forced_strategy.as_str(),
            "AUTO" | "DIRECT_REWRITE" | "RASTERIZE_THEN_REWRITE" | "RASTERIZE_ONLY"
        ) {
            anyhow::bail!(
                "unknown policy.forced_strategy: {}",
                self.policy.forced_strategy
            );
        }
        Ok(())
    }

    /// The single tolerance window used for selection, rewrite and verification.
    pub fn window(&self) -> Result<ToleranceWindow> {
        let t = &self.tolerance;
        let window = match t.profile {
            ToleranceProfile::Narrow => ToleranceWindow::percent(t.target, t.narrow_pct),
            ToleranceProfile::Wide => ToleranceWindow::percent(t.target, t.wide_pct),
            ToleranceProfile::Custom => ToleranceWindow::new(t.target, t.lower, t.upper),
        }?;
        Ok(window)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Global {
    pub print_summary: bool,
}
impl Default for Global {
    fn default() -> Self {
        Self {
            print_summary: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub out_dir: String,
    /// Parent of the per-run scratch directories.
    pub work_dir: String,
}
impl Default for Paths {
    fn default() -> Self {
        Self {
            out_dir: "out".into(),
            work_dir: ".dpi-normalize-work".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    pub max_input_file_bytes: u64,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_input_file_bytes: 16 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tolerance {
    pub target: f64,
    pub profile: ToleranceProfile,
    pub narrow_pct: f64,
    pub wide_pct: f64,
    pub lower: f64,
    pub upper: f64,
}
impl Default for Tolerance {
    fn default() -> Self {
        Self {
            target: 300.0,
            profile: ToleranceProfile::Narrow,
            narrow_pct: 3.0,
            wide_pct: 50.0,
            lower: 290.0,
            upper: 310.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// AUTO, DIRECT_REWRITE, RASTERIZE_THEN_REWRITE or RASTERIZE_ONLY.
    pub forced_strategy: String,
}
impl Default for Policy {
    fn default() -> Self {
        Self {
            forced_strategy: "AUTO".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inspect {
    pub include_masks: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rewrite {
    pub compatibility_level: String,
    pub pdf_settings: String,
    pub color_profile: ColorProfile,
    pub downsample_filter: DownsampleFilter,
    /// Run a default-settings structural rewrite before rasterizing.
    pub prenormalize_before_raster: bool,
}
impl Default for Rewrite {
    fn default() -> Self {
        Self {
            compatibility_level: "1.4".into(),
            pdf_settings: "/prepress".into(),
            color_profile: ColorProfile::Gray,
            downsample_filter: DownsampleFilter::Bicubic,
            prenormalize_before_raster: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorProfile {
    Preserve,
    Gray,
    Rgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownsampleFilter {
    Bicubic,
    Average,
    Subsample,
}

impl DownsampleFilter {
    pub fn as_gs(&self) -> &'static str {
        match self {
            DownsampleFilter::Bicubic => "/Bicubic",
            DownsampleFilter::Average => "/Average",
            DownsampleFilter::Subsample => "/Subsample",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raster {
    pub color_mode: RasterColorMode,
}
impl Default for Raster {
    fn default() -> Self {
        Self {
            color_mode: RasterColorMode::Gray,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterColorMode {
    Color,
    Gray,
    Mono,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tools {
    pub pdfimages: String,
    pub ghostscript: String,
    pub pdftoppm: String,
    pub img2pdf: String,
    pub inspect_timeout_seconds: u64,
    pub rewrite_timeout_seconds: u64,
    pub raster_timeout_seconds: u64,
    pub assemble_timeout_seconds: u64,
    pub keep_stderr: bool,
}
impl Default for Tools {
    fn default() -> Self {
        Self {
            pdfimages: "pdfimages".into(),
            ghostscript: "gs".into(),
            pdftoppm: "pdftoppm".into(),
            img2pdf: "img2pdf".into(),
            inspect_timeout_seconds: 60,
            rewrite_timeout_seconds: 600,
            raster_timeout_seconds: 600,
            assemble_timeout_seconds: 300,
            keep_stderr: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub filename_prefix: String,
    pub write_report_json: bool,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            filename_prefix: "normalized_".into(),
            write_report_json: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: true,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Debug {
    pub dump_effective_config: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub reject_url_inputs: bool,
    pub check_pdf_magic: bool,
}
impl Default for Security {
    fn default() -> Self {
        Self {
            reject_url_inputs: true,
            check_pdf_magic: true,
        }
    }
}
