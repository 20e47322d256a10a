//! Order types, order lifecycle states and the audit trail entry.

use super::ids::OrderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Side that moves a position by `delta` (positive means buy).
    pub fn for_delta(delta: f64) -> Self {
        if delta >= 0.0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }
}

/// What kind of order and its price parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    /// Fill at the next bar's open plus slippage.
    Market,
    /// Fill at the limit price once the bar's range reaches it.
    Limit { limit_price: f64 },
    /// Becomes a market order on the bar whose range crosses the stop.
    Stop { stop_price: f64 },
}

impl OrderKind {
    pub fn limit_price(&self) -> Option<f64> {
        match self {
            OrderKind::Limit { limit_price } => Some(*limit_price),
            _ => None,
        }
    }

    pub fn stop_price(&self) -> Option<f64> {
        match self {
            OrderKind::Stop { stop_price } => Some(*stop_price),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OrderKind::Market => "market",
            OrderKind::Limit { .. } => "limit",
            OrderKind::Stop { .. } => "stop",
        }
    }
}

/// Order lifecycle states.
///
/// `Submitted → Pending → {Filled, PartiallyFilled → Pending, Cancelled, Rejected}`.
/// A submitted order that fails validation goes straight to `Rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created by the strategy, not yet validated.
    Submitted,
    /// Validated and waiting for a matching bar.
    Pending,
    /// Part of the quantity has been filled on the current bar.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancelled by the strategy, by age, or at the end of data.
    Cancelled { reason: String },
    /// Refused at validation or at fill time (insufficient cash or margin).
    Rejected { reason: String },
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled { .. } | OrderStatus::Rejected { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::Submitted => "submitted",
            OrderStatus::Pending => "pending",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled { .. } => "cancelled",
            OrderStatus::Rejected { .. } => "rejected",
        }
    }
}

/// Who created the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderOrigin {
    /// Explicit order intent from the strategy.
    Strategy,
    /// Market order sized from a strategy signal.
    Signal,
    /// Closing order generated by the engine at the end of the run.
    Liquidation,
}

/// Economic terms of an order as requested by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: f64,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            quantity,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, quantity: f64, limit_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Limit { limit_price },
            quantity,
        }
    }

    pub fn stop(symbol: impl Into<String>, side: OrderSide, quantity: f64, stop_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Stop { stop_price },
            quantity,
        }
    }
}

/// A single order tracked by the order manager.
///
/// Economic terms (`symbol`, `side`, `kind`, `quantity`) never change after
/// submission; only `status`, `filled_quantity`, `average_fill_price` and
/// `bars_offered` move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub kind: OrderKind,
    pub quantity: f64,
    pub filled_quantity: f64,
    /// Quantity-weighted average of all fills so far (0 when unfilled).
    pub average_fill_price: f64,
    pub status: OrderStatus,
    pub origin: OrderOrigin,
    pub submitted_at: DateTime<Utc>,
    /// Number of bars this order has been offered to the brokerage.
    pub bars_offered: u32,
}

impl Order {
    pub fn remaining_quantity(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }

    /// Signed remaining quantity (positive for buys).
    pub fn signed_remaining(&self) -> f64 {
        self.side.sign() * self.remaining_quantity()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::PartiallyFilled)
    }
}

/// Audit trail entry for an order state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAuditEntry {
    pub order_id: OrderId,
    pub timestamp: DateTime<Utc>,
    /// `None` for the creation entry.
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub reason: String,
}
