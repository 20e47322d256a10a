//! Account projection and margin rules applied at fill time.
//!
//! The brokerage checks each candidate fill against a projection of the
//! account that already includes every fill emitted earlier on the same
//! timestamp. Symbols are valued at their last mark; the filled symbol is
//! valued at its fill price, the most recent price known at that moment.

use crate::config::BacktestConfig;
use crate::domain::{Fill, Marks, Portfolio};
use std::collections::BTreeMap;

const TOLERANCE: f64 = 1e-9;

/// Cash and net quantities as they will be once pending fills settle.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountProjection {
    pub cash: f64,
    pub quantities: BTreeMap<String, f64>,
    pub marks: Marks,
}

impl AccountProjection {
    pub fn from_portfolio(portfolio: &Portfolio, marks: &Marks) -> Self {
        Self {
            cash: portfolio.cash,
            quantities: portfolio
                .positions
                .iter()
                .filter(|(_, p)| !p.is_flat())
                .map(|(sym, p)| (sym.clone(), p.quantity))
                .collect(),
            marks: marks.clone(),
        }
    }

    pub fn equity(&self) -> f64 {
        self.cash
            + self
                .quantities
                .iter()
                .map(|(sym, qty)| qty * self.marks.get(sym).copied().unwrap_or(0.0))
                .sum::<f64>()
    }

    pub fn gross_exposure(&self) -> f64 {
        self.gross_exposure_at(&self.marks)
    }

    /// Gross exposure of these quantities valued at `marks`.
    pub fn gross_exposure_at(&self, marks: &Marks) -> f64 {
        self.quantities
            .iter()
            .map(|(sym, qty)| (qty * marks.get(sym).copied().unwrap_or(0.0)).abs())
            .sum()
    }

    /// Fold a fill into the projection.
    pub fn apply(&mut self, fill: &Fill) {
        self.cash += fill.cash_delta();
        *self.quantities.entry(fill.symbol.clone()).or_insert(0.0) += fill.signed_quantity();
        self.marks.insert(fill.symbol.clone(), fill.fill_price);
    }

    /// Projection after `fill`, leaving `self` untouched.
    pub fn with(&self, fill: &Fill) -> Self {
        let mut next = self.clone();
        next.apply(fill);
        next
    }
}

/// Cash or margin constraints, fixed for the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginPolicy {
    pub enabled: bool,
    pub max_leverage: f64,
    pub maintenance: f64,
}

impl MarginPolicy {
    pub fn from_config(config: &BacktestConfig) -> Self {
        Self {
            enabled: config.margin_enabled,
            max_leverage: config.max_leverage,
            maintenance: config.maintenance_margin,
        }
    }

    pub fn cash_only() -> Self {
        Self {
            enabled: false,
            max_leverage: 1.0,
            maintenance: 0.0,
        }
    }

    /// `Err(reason)` when moving from `before` to `after` breaks the rules.
    ///
    /// Without margin, cash may not be drawn below zero. Beyond that, a fill
    /// that does not increase gross exposure is always allowed, so a position
    /// can be reduced or closed whatever the account state. Both sides are
    /// valued at the post-fill marks, so a price move alone never counts as
    /// added exposure.
    pub fn check(&self, before: &AccountProjection, after: &AccountProjection) -> Result<(), String> {
        let equity = after.equity();
        let slack = TOLERANCE * equity.abs().max(1.0);
        if !self.enabled && after.cash < -slack && after.cash < before.cash {
            return Err(format!("insufficient cash: {:.2} after fill", after.cash));
        }

        let gross_before = before.gross_exposure_at(&after.marks);
        let gross_after = after.gross_exposure();
        if gross_after <= gross_before * (1.0 + TOLERANCE) + TOLERANCE {
            return Ok(());
        }

        if !self.enabled {
            if gross_after > equity + slack {
                return Err(format!(
                    "exposure {gross_after:.2} exceeds equity {equity:.2} without margin"
                ));
            }
            return Ok(());
        }

        if equity <= 0.0 {
            return Err(format!("equity {equity:.2} not positive after fill"));
        }
        let cap = self.max_leverage * equity;
        if gross_after > cap + slack {
            return Err(format!(
                "exposure {gross_after:.2} exceeds {:.1}x leverage cap {cap:.2}",
                self.max_leverage
            ));
        }
        let required = self.maintenance * gross_after;
        if equity < required - slack {
            return Err(format!(
                "equity {equity:.2} below maintenance margin {required:.2}"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Liquidity, OrderId, OrderSide};
    use chrono::{TimeZone, Utc};

    fn account(cash: f64) -> AccountProjection {
        AccountProjection {
            cash,
            quantities: BTreeMap::new(),
            marks: Marks::new(),
        }
    }

    fn fill(side: OrderSide, qty: f64, price: f64) -> Fill {
        Fill {
            order_id: OrderId(1),
            symbol: "SPY".into(),
            side,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            fill_price: price,
            fill_quantity: qty,
            fee: 0.0,
            slippage_applied: 0.0,
            liquidity: Liquidity::Taker,
        }
    }

    #[test]
    fn projection_tracks_cash_and_quantity() {
        let mut acct = account(1_000.0);
        acct.apply(&fill(OrderSide::Buy, 5.0, 100.0));
        assert_eq!(acct.cash, 500.0);
        assert_eq!(acct.quantities["SPY"], 5.0);
        assert_eq!(acct.equity(), 1_000.0);
        assert_eq!(acct.gross_exposure(), 500.0);
    }

    #[test]
    fn cash_account_rejects_overdraft() {
        let before = account(1_000.0);
        let policy = MarginPolicy::cash_only();
        assert!(policy.check(&before, &before.with(&fill(OrderSide::Buy, 10.0, 100.0))).is_ok());
        let err = policy
            .check(&before, &before.with(&fill(OrderSide::Buy, 11.0, 100.0)))
            .unwrap_err();
        assert!(err.contains("insufficient cash"));
    }

    #[test]
    fn cash_account_limits_short_exposure() {
        let before = account(1_000.0);
        let policy = MarginPolicy::cash_only();
        assert!(policy.check(&before, &before.with(&fill(OrderSide::Sell, 10.0, 100.0))).is_ok());
        assert!(policy.check(&before, &before.with(&fill(OrderSide::Sell, 11.0, 100.0))).is_err());
    }

    #[test]
    fn margin_account_allows_leverage_up_to_cap() {
        let before = account(1_000.0);
        let policy = MarginPolicy {
            enabled: true,
            max_leverage: 2.0,
            maintenance: 0.25,
        };
        assert!(policy.check(&before, &before.with(&fill(OrderSide::Buy, 20.0, 100.0))).is_ok());
        let err = policy
            .check(&before, &before.with(&fill(OrderSide::Buy, 21.0, 100.0)))
            .unwrap_err();
        assert!(err.contains("leverage cap"));
    }

    #[test]
    fn maintenance_margin_binds_when_tighter_than_leverage() {
        let before = account(1_000.0);
        let policy = MarginPolicy {
            enabled: true,
            max_leverage: 10.0,
            maintenance: 0.5,
        };
        // gross 3000, equity 1000, maintenance needs 1500
        let err = policy
            .check(&before, &before.with(&fill(OrderSide::Buy, 30.0, 100.0)))
            .unwrap_err();
        assert!(err.contains("maintenance"));
    }

    #[test]
    fn reducing_exposure_is_always_allowed() {
        let mut before = account(-5_000.0);
        before.quantities.insert("SPY".into(), 100.0);
        before.marks.insert("SPY".into(), 40.0);
        let policy = MarginPolicy::cash_only();
        assert!(policy.check(&before, &before.with(&fill(OrderSide::Sell, 50.0, 40.0))).is_ok());
    }

    #[test]
    fn covering_a_short_after_a_gap_is_allowed() {
        // Short 100 marked at 100; the cover fills at 150.
        let mut before = account(20_000.0);
        before.quantities.insert("SPY".into(), -100.0);
        before.marks.insert("SPY".into(), 100.0);
        let policy = MarginPolicy::cash_only();
        assert!(policy.check(&before, &before.with(&fill(OrderSide::Buy, 10.0, 150.0))).is_ok());
        // Adding to the short at the same price is still checked.
        assert!(policy.check(&before, &before.with(&fill(OrderSide::Sell, 10.0, 150.0))).is_err());
    }

    #[test]
    fn cash_account_cannot_overdraw_to_cover() {
        let mut before = account(1_000.0);
        before.quantities.insert("SPY".into(), -100.0);
        before.marks.insert("SPY".into(), 100.0);
        let cash_only = MarginPolicy::cash_only();
        let err = cash_only
            .check(&before, &before.with(&fill(OrderSide::Buy, 20.0, 100.0)))
            .unwrap_err();
        assert!(err.contains("insufficient cash"));

        let margin = MarginPolicy {
            enabled: true,
            max_leverage: 2.0,
            maintenance: 0.0,
        };
        assert!(margin.check(&before, &before.with(&fill(OrderSide::Buy, 20.0, 100.0))).is_ok());
    }
}
