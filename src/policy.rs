use crate::{config::Config, inspect::ResolutionReport, tolerance::ToleranceWindow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    DirectRewrite,
    RasterizeThenRewrite,
    /// Rebuild from page bitmaps and ship the assembled document as-is.
    RasterizeOnlyFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub strategy: Strategy,
    pub forced: bool,
    pub min_observed_dpi: Option<f64>,
}

pub fn select_strategy(window: &ToleranceWindow, report: &ResolutionReport) -> Strategy {
    match report.min_effective_dpi() {
        None => Strategy::DirectRewrite,
        Some(min) if min >= window.lower_bound => Strategy::DirectRewrite,
        Some(_) => Strategy::RasterizeThenRewrite,
    }
}

pub fn decide(cfg: &Config, window: &ToleranceWindow, report: &ResolutionReport) -> PolicyDecision {
    let min_observed_dpi = report.min_effective_dpi();
    if let Some(strategy) = forced(cfg) {
        return PolicyDecision {
            strategy,
            forced: true,
            min_observed_dpi,
        };
    }
    PolicyDecision {
        strategy: select_strategy(window, report),
        forced: false,
        min_observed_dpi,
    }
}

fn forced(cfg: &Config) -> Option<Strategy> {
    match cfg.policy.forced_strategy.as_str() {
        "DIRECT_REWRITE" => Some(Strategy::DirectRewrite),
        "RASTERIZE_THEN_REWRITE" => Some(Strategy::RasterizeThenRewrite),
        "RASTERIZE_ONLY" => Some(Strategy::RasterizeOnlyFallback),
        _ => None,
    }
}
