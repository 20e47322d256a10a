//! Fill: a completed (partial or full) execution of an order.

use super::ids::OrderId;
use super::order::OrderSide;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the fill added or removed liquidity; decides the fee rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liquidity {
    Maker,
    Taker,
}

/// Record of an executed fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub timestamp: DateTime<Utc>,
    pub fill_price: f64,
    pub fill_quantity: f64,
    pub fee: f64,
    /// Money lost to slippage: `|fill_price - reference| * quantity`.
    pub slippage_applied: f64,
    pub liquidity: Liquidity,
}

impl Fill {
    /// Positive for buys, negative for sells.
    pub fn signed_quantity(&self) -> f64 {
        self.side.sign() * self.fill_quantity
    }

    pub fn notional(&self) -> f64 {
        self.fill_price * self.fill_quantity
    }

    /// Cash delta caused by this fill, fee included.
    pub fn cash_delta(&self) -> f64 {
        -self.signed_quantity() * self.fill_price - self.fee
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fill(side: OrderSide) -> Fill {
        Fill {
            order_id: OrderId(1),
            symbol: "SPY".into(),
            side,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            fill_price: 100.0,
            fill_quantity: 10.0,
            fee: 1.0,
            slippage_applied: 0.0,
            liquidity: Liquidity::Taker,
        }
    }

    #[test]
    fn buy_cash_delta_includes_fee() {
        let f = fill(OrderSide::Buy);
        assert_eq!(f.signed_quantity(), 10.0);
        assert_eq!(f.cash_delta(), -1001.0);
    }

    #[test]
    fn sell_cash_delta_includes_fee() {
        let f = fill(OrderSide::Sell);
        assert_eq!(f.signed_quantity(), -10.0);
        assert_eq!(f.cash_delta(), 999.0);
        assert_eq!(f.notional(), 1000.0);
    }
}
