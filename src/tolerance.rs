use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceProfile {
    /// target ± `narrow_pct`.
    Narrow,
    /// target ± `wide_pct`.
    Wide,
    /// Explicit `lower` / `upper`.
    Custom,
}

/// Inclusive density band, in pixels per inch, a document must land in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceWindow {
    pub target: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl ToleranceWindow {
    pub fn new(target: f64, lower_bound: f64, upper_bound: f64) -> Result<Self> {
        if !target.is_finite() || target <= 0.0 {
            bail!("tolerance target must be a positive number, got {target}");
        }
        if !(lower_bound <= target && target <= upper_bound) {
            bail!("tolerance window must satisfy lower <= target <= upper, got [{lower_bound}, {upper_bound}] around {target}");
        }
        Ok(Self {
            target,
            lower_bound,
            upper_bound,
        })
    }

    pub fn percent(target: f64, pct: f64) -> Result<Self> {
        if !(0.0..100.0).contains(&pct) {
            bail!("tolerance percentage must be in [0, 100), got {pct}");
        }
        let delta = target * pct / 100.0;
        Self::new(target, target - delta, target + delta)
    }

    pub fn contains(&self, density: f64) -> bool {
        density >= self.lower_bound && density <= self.upper_bound
    }

    /// Integer resolution handed to the external tools.
    pub fn target_dpi(&self) -> u32 {
        self.target.round() as u32
    }
}

impl std::fmt::Display for ToleranceWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} dpi [{:.1}, {:.1}]",
            self.target, self.lower_bound, self.upper_bound
        )
    }
}
