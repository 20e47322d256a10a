//! Liquidity constraint: participation limit per bar.
//!
//! Optional: when enabled, caps the fill quantity at a fraction of the
//! bar's volume. The unfilled remainder stays on the order and is offered
//! again on the next bar.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticipationCap {
    /// Maximum fill as a fraction of bar volume (0.0 exclusive to 1.0).
    pub max_participation: f64,
}

impl ParticipationCap {
    pub fn new(max_participation: f64) -> Self {
        debug_assert!(
            max_participation > 0.0 && max_participation <= 1.0,
            "participation rate must be in (0, 1]"
        );
        Self { max_participation }
    }

    /// Maximum fillable quantity given bar volume.
    pub fn max_fill_qty(&self, bar_volume: f64) -> f64 {
        bar_volume.max(0.0) * self.max_participation
    }

    /// Returns `(fill_qty, remainder_qty)`. If the cap does not bind,
    /// `remainder_qty` is zero.
    pub fn constrain(&self, desired_qty: f64, bar_volume: f64) -> (f64, f64) {
        let max_qty = self.max_fill_qty(bar_volume);
        if desired_qty <= max_qty {
            (desired_qty, 0.0)
        } else {
            (max_qty, desired_qty - max_qty)
        }
    }
}
