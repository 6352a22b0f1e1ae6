//! Per-image resolution inspection.
//!
//! The listing tool's text never travels past this module: rows are turned
//! into [`ResolutionSample`]s or skipped with a diagnostic.

use crate::{config::Config, engine::Engine, error::NormalizeError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolutionSample {
    pub page: u32,
    pub horizontal_dpi: f64,
    pub vertical_dpi: f64,
    pub effective_dpi: f64,
}

impl ResolutionSample {
    pub fn new(page: u32, horizontal_dpi: f64, vertical_dpi: f64) -> Self {
        Self {
            page,
            horizontal_dpi,
            vertical_dpi,
            effective_dpi: horizontal_dpi.min(vertical_dpi),
        }
    }
}

/// One document snapshot. No samples means no raster images were found,
/// which is not a failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub samples: Vec<ResolutionSample>,
    /// Rows that could not be read as samples.
    pub diagnostics: Vec<String>,
}

impl ResolutionReport {
    pub fn from_samples(samples: Vec<ResolutionSample>) -> Self {
        Self {
            samples,
            diagnostics: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn min_effective_dpi(&self) -> Option<f64> {
        self.samples
            .iter()
            .map(|s| s.effective_dpi)
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn max_effective_dpi(&self) -> Option<f64> {
        self.samples
            .iter()
            .map(|s| s.effective_dpi)
            .max_by(|a, b| a.total_cmp(b))
    }
}

/// Column layouts of `pdfimages -list`, keyed on row width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLayout {
    /// `page num type width height color comp bpc x-ppi y-ppi`
    Legacy,
    /// `page num type width height color comp bpc enc interp object ID x-ppi y-ppi [size ratio]`
    Current,
    /// Inline images print `[inline]` in place of `object ID`.
    Inline,
}

impl RowLayout {
    pub fn detect(cols: &[&str]) -> Option<Self> {
        match cols.len() {
            10 => Some(RowLayout::Legacy),
            14 | 16 => Some(RowLayout::Current),
            15 if cols[10] == "[inline]" => Some(RowLayout::Inline),
            _ => None,
        }
    }

    fn density_columns(&self) -> (usize, usize) {
        match self {
            RowLayout::Legacy => (8, 9),
            RowLayout::Current => (12, 13),
            RowLayout::Inline => (11, 12),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Sample(ResolutionSample),
    /// Header, separator, blank line, or a filtered row type.
    Ignore,
    Skip(String),
}

const MASK_TYPES: &[&str] = &["smask", "mask", "stencil"];

pub fn parse_row(line: &str, include_masks: bool) -> RowOutcome {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with("page") || trimmed.starts_with("---") {
        return RowOutcome::Ignore;
    }

    let cols: Vec<&str> = trimmed.split_whitespace().collect();
    let Some(layout) = RowLayout::detect(&cols) else {
        return RowOutcome::Skip(format!(
            "unrecognised row width {}: {trimmed:?}",
            cols.len()
        ));
    };

    let page = match cols[0].parse::<u32>() {
        Ok(p) if p > 0 => p,
        _ => return RowOutcome::Skip(format!("bad page number {:?}: {trimmed:?}", cols[0])),
    };

    if !include_masks && MASK_TYPES.contains(&cols[2]) {
        return RowOutcome::Ignore;
    }

    let (xi, yi) = layout.density_columns();
    let parse_dpi = |s: &str| s.parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0);
    match (parse_dpi(cols[xi]), parse_dpi(cols[yi])) {
        (Some(x), Some(y)) => RowOutcome::Sample(ResolutionSample::new(page, x, y)),
        _ => RowOutcome::Skip(format!(
            "non-numeric density columns ({:?}, {:?}): {trimmed:?}",
            cols[xi], cols[yi]
        )),
    }
}

pub fn parse_listing(text: &str, include_masks: bool) -> ResolutionReport {
    let mut report = ResolutionReport::default();
    for (lineno, line) in text.lines().enumerate() {
        match parse_row(line, include_masks) {
            RowOutcome::Sample(s) => report.samples.push(s),
            RowOutcome::Ignore => {}
            RowOutcome::Skip(why) => {
                warn!("inspect: skipping line {}: {why}", lineno + 1);
                report.diagnostics.push(format!("line {}: {why}", lineno + 1));
            }
        }
    }
    report
}

pub fn inspect(
    cfg: &Config,
    engine: &dyn Engine,
    input: &Path,
) -> Result<ResolutionReport, NormalizeError> {
    let listing = engine.list_images(input)?;
    let report = parse_listing(&listing, cfg.inspect.include_masks);
    debug!(
        "inspect {} samples={} skipped={} min_dpi={:?}",
        input.display(),
        report.samples.len(),
        report.diagnostics.len(),
        report.min_effective_dpi()
    );
    Ok(report)
}
