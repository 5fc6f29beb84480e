// ── Engram: Session Pressure ────────────────────────────────────────────────
//
// Coarse classification of how close the caller's context is to its token
// budget. The ratio is resolved through a three-tier fallback:
//   1. caller-supplied token usage ratio, clamped to [0, 1]
//   2. estimator ratio token_count / token_budget from runtime stats, clamped
//   3. unavailable: level none, ratio None, with a warning string
//
// Levels: ratio ≥ quick threshold → quick, ≥ focused threshold → focused,
// else none.

use crate::atoms::engram_types::{
    PressureLevel, PressureReading, PressureSource, RuntimeContextStats,
};
use crate::engine::config::SalienceConfig;

const UNAVAILABLE_WARNING: &str =
    "pressure policy inactive: no caller token usage and no usable runtime token budget";

fn level_for(ratio: f64, config: &SalienceConfig) -> PressureLevel {
    if ratio >= config.pressure_quick {
        PressureLevel::Quick
    } else if ratio >= config.pressure_focused {
        PressureLevel::Focused
    } else {
        PressureLevel::None
    }
}

fn reading(ratio: f64, source: PressureSource, config: &SalienceConfig) -> PressureReading {
    let ratio = ratio.clamp(0.0, 1.0);
    PressureReading { level: level_for(ratio, config), ratio: Some(ratio), source, warning: None }
}

/// Resolve the pressure level for one call.
pub fn get_pressure_level(
    token_usage: Option<f64>,
    runtime: Option<&RuntimeContextStats>,
    config: &SalienceConfig,
) -> PressureReading {
    if let Some(usage) = token_usage.filter(|u| u.is_finite()) {
        return reading(usage, PressureSource::Caller, config);
    }

    if let Some(stats) = runtime {
        if let (Some(count), Some(budget)) = (stats.token_count, stats.token_budget) {
            if budget > 0 {
                return reading(count as f64 / budget as f64, PressureSource::Estimator, config);
            }
        }
    }

    log::warn!("[engram:pressure] {}", UNAVAILABLE_WARNING);
    PressureReading {
        level: PressureLevel::None,
        ratio: None,
        source: PressureSource::Unavailable,
        warning: Some(UNAVAILABLE_WARNING.to_string()),
    }
}

/// Budget after pressure: quick halves it, focused keeps 75%.
pub fn pressure_adjusted_budget(budget: usize, level: PressureLevel) -> usize {
    match level {
        PressureLevel::None => budget,
        PressureLevel::Focused => budget * 3 / 4,
        PressureLevel::Quick => budget / 2,
    }
}
