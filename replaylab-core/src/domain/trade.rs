//! Trade: a closed round trip, and the tracker that builds one.

use super::position::PositionSide;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A completed round-trip trade: position opened from flat and returned to
/// flat (or reversed).
///
/// Entry and exit prices are quantity-weighted over every fill of the round
/// trip, so `gross_pnl == (exit_price - entry_price) * quantity * sign`
/// and `pnl == gross_pnl - fees`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub direction: PositionSide,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub gross_pnl: f64,
    pub fees: f64,
    pub slippage: f64,
    pub pnl: f64,
}

impl Trade {
    /// Return on the trade as a fraction of entry cost.
    pub fn return_pct(&self) -> f64 {
        if self.entry_price == 0.0 || self.quantity == 0.0 {
            return 0.0;
        }
        self.pnl / (self.entry_price * self.quantity)
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }

    pub fn holding_time(&self) -> Duration {
        self.exit_time - self.entry_time
    }
}

/// Running state of a round trip that has not closed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTrade {
    pub symbol: String,
    pub direction: PositionSide,
    pub entry_time: DateTime<Utc>,
    pub entry_quantity: f64,
    pub entry_notional: f64,
    pub exit_quantity: f64,
    pub exit_notional: f64,
    pub fees: f64,
    pub slippage: f64,
}

impl OpenTrade {
    pub fn open(symbol: impl Into<String>, direction: PositionSide, entry_time: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            entry_time,
            entry_quantity: 0.0,
            entry_notional: 0.0,
            exit_quantity: 0.0,
            exit_notional: 0.0,
            fees: 0.0,
            slippage: 0.0,
        }
    }

    pub fn add_entry(&mut self, quantity: f64, price: f64, fee: f64, slippage: f64) {
        self.entry_quantity += quantity;
        self.entry_notional += quantity * price;
        self.fees += fee;
        self.slippage += slippage;
    }

    pub fn add_exit(&mut self, quantity: f64, price: f64, fee: f64, slippage: f64) {
        self.exit_quantity += quantity;
        self.exit_notional += quantity * price;
        self.fees += fee;
        self.slippage += slippage;
    }

    /// Close the round trip into an immutable trade record.
    pub fn close(self, exit_time: DateTime<Utc>) -> Trade {
        let entry_price = if self.entry_quantity > 0.0 {
            self.entry_notional / self.entry_quantity
        } else {
            0.0
        };
        let exit_price = if self.exit_quantity > 0.0 {
            self.exit_notional / self.exit_quantity
        } else {
            0.0
        };
        let gross_pnl = self.direction.sign() * (self.exit_notional - self.entry_notional);
        Trade {
            symbol: self.symbol,
            direction: self.direction,
            entry_time: self.entry_time,
            exit_time,
            entry_price,
            exit_price,
            quantity: self.entry_quantity,
            gross_pnl,
            fees: self.fees,
            slippage: self.slippage,
            pnl: gross_pnl - self.fees,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn weighted_entry_and_exit() {
        let mut open = OpenTrade::open("SPY", PositionSide::Long, ts(2));
        open.add_entry(10.0, 100.0, 1.0, 0.0);
        open.add_entry(10.0, 110.0, 1.0, 0.0);
        open.add_exit(20.0, 120.0, 2.0, 0.0);
        let trade = open.close(ts(9));

        assert!((trade.entry_price - 105.0).abs() < 1e-12);
        assert!((trade.exit_price - 120.0).abs() < 1e-12);
        assert!((trade.gross_pnl - 300.0).abs() < 1e-9);
        assert!((trade.pnl - 296.0).abs() < 1e-9);
        assert!(trade.is_winner());
        assert_eq!(trade.holding_time(), Duration::days(7));
    }

    #[test]
    fn short_round_trip_pnl() {
        let mut open = OpenTrade::open("SPY", PositionSide::Short, ts(2));
        open.add_entry(5.0, 100.0, 0.0, 0.0);
        open.add_exit(5.0, 90.0, 0.0, 0.0);
        let trade = open.close(ts(3));
        assert!((trade.pnl - 50.0).abs() < 1e-12);
        assert!((trade.return_pct() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn reconciles_with_prices() {
        let mut open = OpenTrade::open("SPY", PositionSide::Long, ts(2));
        open.add_entry(3.0, 101.3, 0.4, 0.1);
        open.add_exit(1.0, 99.0, 0.1, 0.0);
        open.add_exit(2.0, 104.0, 0.2, 0.0);
        let t = open.close(ts(4));
        let reconstructed = (t.exit_price - t.entry_price) * t.quantity - t.fees;
        assert!((reconstructed - t.pnl).abs() < 1e-9);
    }
}
