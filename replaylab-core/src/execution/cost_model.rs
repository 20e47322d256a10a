//! Cost model: slippage and fee calculation.
//!
//! Slippage is directional: buyers pay more, sellers receive less. It has a
//! fixed component in basis points and a volume-impact component that grows
//! with the order's share of the bar's volume. Fees are charged in basis
//! points of notional at the maker or taker rate.

use crate::config::BacktestConfig;
use crate::domain::{Liquidity, OrderSide};

/// Execution friction for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub fee_maker_bps: f64,
    pub fee_taker_bps: f64,
    pub slippage_fixed_bps: f64,
    /// Price impact per unit of participation (`quantity / volume`, capped at 1).
    pub volume_impact: f64,
}

impl CostModel {
    pub fn from_config(config: &BacktestConfig) -> Self {
        Self {
            fee_maker_bps: config.fee_maker_bps,
            fee_taker_bps: config.fee_taker_bps,
            slippage_fixed_bps: config.slippage_fixed_bps,
            volume_impact: config.slippage_volume_impact,
        }
    }

    pub fn frictionless() -> Self {
        Self {
            fee_maker_bps: 0.0,
            fee_taker_bps: 0.0,
            slippage_fixed_bps: 0.0,
            volume_impact: 0.0,
        }
    }

    /// Apply slippage to a reference price.
    ///
    /// `price = ref * (1 ± fixed_bps/1e4) * (1 ± impact * min(qty/volume, 1))`,
    /// `+` for buys, `-` for sells. A bar with no volume counts as full
    /// participation. Returns `(slipped_price, slippage_money_amount)`.
    pub fn apply_slippage(
        &self,
        reference: f64,
        side: OrderSide,
        quantity: f64,
        bar_volume: f64,
    ) -> (f64, f64) {
        let participation = if bar_volume > 0.0 {
            (quantity / bar_volume).min(1.0)
        } else {
            1.0
        };
        let sign = side.sign();
        let fixed = 1.0 + sign * self.slippage_fixed_bps / 10_000.0;
        let impact = 1.0 + sign * self.volume_impact * participation;
        let price = reference * fixed * impact;
        let amount = (price - reference).abs() * quantity;
        (price, amount)
    }

    pub fn fee_bps(&self, liquidity: Liquidity) -> f64 {
        match liquidity {
            Liquidity::Maker => self.fee_maker_bps,
            Liquidity::Taker => self.fee_taker_bps,
        }
    }

    /// `fee = price * quantity * bps / 10_000`
    pub fn compute_fee(&self, price: f64, quantity: f64, liquidity: Liquidity) -> f64 {
        price * quantity * (self.fee_bps(liquidity) / 10_000.0)
    }
}
