//! Portfolio: aggregate state of cash, open positions and the run's history.

use super::position::Position;
use super::trade::{OpenTrade, Trade};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Last known price per symbol.
pub type Marks = BTreeMap<String, f64>;

/// One point of the equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub cash: f64,
}

/// Point-in-time copy of the portfolio carried by `PortfolioUpdate` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cash: f64,
    pub equity: f64,
    pub positions: Vec<Position>,
}

/// Aggregate portfolio state.
///
/// The accounting identity must hold at every equity sample:
/// `equity == cash + sum(quantity * mark)`. Positions live in a `BTreeMap`
/// so that sums are taken in a fixed order and runs stay bit-reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: f64,
    pub initial_capital: f64,
    pub positions: BTreeMap<String, Position>,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub total_fees: f64,
    pub total_slippage: f64,
    /// Round trips still open, keyed by symbol.
    pub open_trades: BTreeMap<String, OpenTrade>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            cash: initial_capital,
            initial_capital,
            positions: BTreeMap::new(),
            equity_curve: Vec::new(),
            trades: Vec::new(),
            total_fees: 0.0,
            total_slippage: 0.0,
            open_trades: BTreeMap::new(),
        }
    }

    /// Total equity = cash + sum of all position market values.
    ///
    /// A symbol without a mark is valued at its average cost.
    pub fn equity(&self, marks: &Marks) -> f64 {
        let position_value: f64 = self
            .positions
            .values()
            .map(|pos| pos.market_value(mark_or_cost(pos, marks)))
            .sum();
        self.cash + position_value
    }

    /// Sum of absolute position values.
    pub fn gross_exposure(&self, marks: &Marks) -> f64 {
        self.positions
            .values()
            .map(|pos| pos.market_value(mark_or_cost(pos, marks)).abs())
            .sum()
    }

    /// Signed quantity held in `symbol` (0 when flat or unknown).
    pub fn quantity(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map_or(0.0, |p| p.quantity)
    }

    /// Whether a symbol has an open position.
    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.get(symbol).is_some_and(|p| !p.is_flat())
    }

    /// Get a position by symbol (if it exists and is not flat).
    pub fn get_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol).filter(|p| !p.is_flat())
    }

    /// Realized PnL across all symbols, before fees.
    pub fn realized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    pub fn snapshot(&self, timestamp: DateTime<Utc>, marks: &Marks) -> PortfolioSnapshot {
        PortfolioSnapshot {
            timestamp,
            cash: self.cash,
            equity: self.equity(marks),
            positions: self
                .positions
                .values()
                .filter(|p| !p.is_flat())
                .cloned()
                .collect(),
        }
    }

    /// Check the equity identity against a sample, with relative tolerance.
    pub fn verify_equity(&self, marks: &Marks, sampled_equity: f64) -> bool {
        let expected = self.equity(marks);
        let scale = expected.abs().max(1.0);
        ((expected - sampled_equity) / scale).abs() <= 1e-6
    }
}

fn mark_or_cost(pos: &Position, marks: &Marks) -> f64 {
    marks.get(&pos.symbol).copied().unwrap_or(pos.average_cost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equity_with_no_positions() {
        let portfolio = Portfolio::new(100_000.0);
        assert_eq!(portfolio.equity(&Marks::new()), 100_000.0);
    }

    #[test]
    fn equity_with_long_and_short() {
        let mut portfolio = Portfolio::new(100_000.0);
        portfolio.cash = 90_000.0;
        portfolio.positions.insert(
            "SPY".into(),
            Position {
                symbol: "SPY".into(),
                quantity: 100.0,
                average_cost: 100.0,
                realized_pnl: 0.0,
            },
        );
        portfolio.positions.insert(
            "QQQ".into(),
            Position {
                symbol: "QQQ".into(),
                quantity: -10.0,
                average_cost: 50.0,
                realized_pnl: 0.0,
            },
        );
        let mut marks = Marks::new();
        marks.insert("SPY".into(), 110.0);
        marks.insert("QQQ".into(), 40.0);
        // 90_000 + 100 * 110 - 10 * 40
        assert_eq!(portfolio.equity(&marks), 100_600.0);
        assert_eq!(portfolio.gross_exposure(&marks), 11_400.0);
        assert!(portfolio.verify_equity(&marks, 100_600.0));
        assert!(!portfolio.verify_equity(&marks, 100_700.0));
    }

    #[test]
    fn missing_mark_falls_back_to_cost() {
        let mut portfolio = Portfolio::new(1_000.0);
        portfolio.cash = 0.0;
        portfolio.positions.insert(
            "SPY".into(),
            Position {
                symbol: "SPY".into(),
                quantity: 10.0,
                average_cost: 100.0,
                realized_pnl: 0.0,
            },
        );
        assert_eq!(portfolio.equity(&Marks::new()), 1_000.0);
    }

    #[test]
    fn has_position_ignores_flat_entries() {
        let mut portfolio = Portfolio::new(100_000.0);
        portfolio.positions.insert("SPY".into(), Position::flat("SPY"));
        assert!(!portfolio.has_position("SPY"));
        assert!(portfolio.get_position("SPY").is_none());
        assert_eq!(portfolio.quantity("SPY"), 0.0);
    }
}
