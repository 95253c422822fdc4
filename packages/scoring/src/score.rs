//! Weighted incident counts and the exponential-decay safety score.
//!
//! ```text
//! weighted = direct + neighbor_weight × neighbor_total
//! score    = max(0, 10 × e^(−decay_k × weighted))
//! ```
//!
//! A region with no incidents scores 10. Each additional weighted incident
//! lowers the score by a constant fraction, so the score never reaches 0
//! but approaches it for very dense incident counts.

use serde::Deserialize;

use crate::ScoringError;

/// Highest possible safety score.
pub const MAX_SCORE: f64 = 10.0;

const fn default_neighbor_weight() -> f64 {
    0.25
}

const fn default_decay_k() -> f64 {
    0.01
}

const fn default_expiry_days() -> i64 {
    90
}

/// Tunable scoring constants (`[scoring]` in the run config).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ScoringParams {
    /// Weight applied to incidents in neighboring regions.
    #[serde(default = "default_neighbor_weight")]
    pub neighbor_weight: f64,
    /// Decay constant `K` of the score curve.
    #[serde(default = "default_decay_k")]
    pub decay_k: f64,
    /// Days until a metric record expires.
    #[serde(default = "default_expiry_days")]
    pub expiry_days: i64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            neighbor_weight: default_neighbor_weight(),
            decay_k: default_decay_k(),
            expiry_days: default_expiry_days(),
        }
    }
}

impl ScoringParams {
    /// Checks the parameters are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ScoringError::Params`] if the neighbor weight is negative
    /// or non-finite, `K` is not strictly positive, or the expiry is not
    /// positive.
    pub fn validate(&self) -> Result<(), ScoringError> {
        if !self.neighbor_weight.is_finite() || self.neighbor_weight < 0.0 {
            return Err(ScoringError::Params {
                message: format!(
                    "neighbor_weight must be a non-negative number, got {}",
                    self.neighbor_weight
                ),
            });
        }
        if !self.decay_k.is_finite() || self.decay_k <= 0.0 {
            return Err(ScoringError::Params {
                message: format!("decay_k must be positive, got {}", self.decay_k),
            });
        }
        if self.expiry_days <= 0 {
            return Err(ScoringError::Params {
                message: format!("expiry_days must be positive, got {}", self.expiry_days),
            });
        }
        Ok(())
    }

    /// Weighted incident count for a region.
    #[must_use]
    pub fn weighted_incidents(&self, direct: u64, neighbor_total: u64) -> f64 {
        weighted_incidents(direct, neighbor_total, self.neighbor_weight)
    }

    /// Safety score for a weighted incident count.
    #[must_use]
    pub fn score(&self, weighted: f64) -> f64 {
        safety_score(weighted, self.decay_k)
    }
}

/// `direct + weight × neighbor_total`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn weighted_incidents(direct: u64, neighbor_total: u64, weight: f64) -> f64 {
    weight.mul_add(neighbor_total as f64, direct as f64)
}

/// `max(0, 10 × e^(−k × weighted))`, clamped to `[0, 10]`.
#[must_use]
pub fn safety_score(weighted: f64, k: f64) -> f64 {
    if weighted.is_nan() {
        return 0.0;
    }
    (MAX_SCORE * (-k * weighted.max(0.0)).exp()).clamp(0.0, MAX_SCORE)
}

/// Direct incidents per 1000 residents, or 0 when the population is
/// unknown.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn incidents_per_1000(direct: u64, population: u64) -> f64 {
    if population == 0 {
        0.0
    } else {
        direct as f64 / population as f64 * 1000.0
    }
}
