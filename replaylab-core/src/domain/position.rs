use serde::{Deserialize, Serialize};

/// Long or short exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn sign(self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }

    pub fn of_quantity(quantity: f64) -> Option<Self> {
        if quantity > 0.0 {
            Some(PositionSide::Long)
        } else if quantity < 0.0 {
            Some(PositionSide::Short)
        } else {
            None
        }
    }
}

/// Net holding in one symbol, tracked with average-cost accounting.
///
/// `quantity` is signed: positive long, negative short. `realized_pnl`
/// accumulates across round trips and excludes fees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub average_cost: f64,
    pub realized_pnl: f64,
}

impl Position {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: 0.0,
            average_cost: 0.0,
            realized_pnl: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0.0
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    pub fn side(&self) -> Option<PositionSide> {
        PositionSide::of_quantity(self.quantity)
    }

    pub fn market_value(&self, mark: f64) -> f64 {
        self.quantity * mark
    }

    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        self.quantity * (mark - self.average_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_position_values() {
        let pos = Position {
            symbol: "SPY".into(),
            quantity: 10.0,
            average_cost: 100.0,
            realized_pnl: 0.0,
        };
        assert!(pos.is_long());
        assert_eq!(pos.market_value(110.0), 1100.0);
        assert_eq!(pos.unrealized_pnl(110.0), 100.0);
    }

    #[test]
    fn short_position_gains_when_price_falls() {
        let pos = Position {
            symbol: "SPY".into(),
            quantity: -10.0,
            average_cost: 100.0,
            realized_pnl: 0.0,
        };
        assert!(pos.is_short());
        assert_eq!(pos.side(), Some(PositionSide::Short));
        assert_eq!(pos.market_value(90.0), -900.0);
        assert_eq!(pos.unrealized_pnl(90.0), 100.0);
    }

    #[test]
    fn flat_position() {
        let pos = Position::flat("SPY");
        assert!(pos.is_flat());
        assert_eq!(pos.side(), None);
    }
}
