use serde::{Deserialize, Serialize};

use crate::config::Thresholds;
use crate::signal::weights::WeightTable;
use crate::signal::{Band, Penalty, Signal};

/// Result of folding a pair's signals into one confidence value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    /// Final confidence in `[0, 1]`; zero whenever a penalty is present.
    pub confidence: f64,
    /// Weighted average of the enabled signals before penalties, kept for display.
    pub weighted_score: f64,
    pub weight_sum: f64,
    pub penalized: bool,
}

impl Aggregate {
    pub fn band(&self, thresholds: &Thresholds) -> Band {
        if self.penalized {
            Band::Fail
        } else if self.confidence >= thresholds.acceptance {
            Band::Pass
        } else if self.confidence >= thresholds.review_floor {
            Band::Warn
        } else {
            Band::Fail
        }
    }
}

/// Weighted average of signal contributions over the weights of the signals present.
///
/// Disabled kinds are skipped entirely. Each contribution is capped at its kind's
/// weight. Penalties are overrides, not deductions: any penalty forces zero.
pub fn aggregate(signals: &[Signal], penalties: &[Penalty], weights: &WeightTable) -> Aggregate {
    let mut raw_total = 0.0;
    let mut weight_sum = 0.0;

    for signal in signals.iter().filter(|s| weights.is_enabled(s.kind)) {
        let weight = weights.weight(signal.kind);
        raw_total += signal.contribution.clamp(0.0, weight);
        weight_sum += weight;
    }

    let weighted_score = if weight_sum > 0.0 {
        (raw_total / weight_sum).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let penalized = !penalties.is_empty();
    Aggregate {
        confidence: if penalized { 0.0 } else { weighted_score },
        weighted_score,
        weight_sum,
        penalized,
    }
}
