//! Strategy contract: the only way user logic enters the simulation.
//!
//! A strategy is called once per timestamp with the bars at that timestamp
//! and a read-only view of the account. It answers with intents; it never
//! touches engine state directly.

use crate::domain::{Bar, Direction, Marks, Order, OrderId, OrderRequest, OrderSide, Portfolio};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure raised by strategy code. Aborts the run that raised it.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct StrategyError {
    pub message: String,
}

impl StrategyError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for StrategyError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for StrategyError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// What a strategy wants to happen.
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    /// Move toward a target exposure; sized by the engine.
    Signal {
        symbol: String,
        direction: Direction,
        strength: f64,
    },
    /// Explicit order.
    Order(OrderRequest),
    /// Cancel a live order.
    Cancel(OrderId),
}

impl Intent {
    pub fn long(symbol: impl Into<String>) -> Self {
        Self::signal(symbol, Direction::Long, 1.0)
    }

    pub fn short(symbol: impl Into<String>) -> Self {
        Self::signal(symbol, Direction::Short, 1.0)
    }

    pub fn flat(symbol: impl Into<String>) -> Self {
        Self::signal(symbol, Direction::Flat, 1.0)
    }

    pub fn signal(symbol: impl Into<String>, direction: Direction, strength: f64) -> Self {
        Intent::Signal {
            symbol: symbol.into(),
            direction,
            strength,
        }
    }

    pub fn buy(symbol: impl Into<String>, quantity: f64) -> Self {
        Intent::Order(OrderRequest::market(symbol, OrderSide::Buy, quantity))
    }

    pub fn sell(symbol: impl Into<String>, quantity: f64) -> Self {
        Intent::Order(OrderRequest::market(symbol, OrderSide::Sell, quantity))
    }
}

/// Read-only view handed to the strategy at each timestamp.
pub struct StrategyContext<'a> {
    pub timestamp: DateTime<Utc>,
    /// Zero-based index of the current timestamp in the run.
    pub step: usize,
    /// Bars at `timestamp`, in configured symbol order.
    pub bars: &'a [&'a Bar],
    pub portfolio: &'a Portfolio,
    /// Last close per symbol.
    pub marks: &'a Marks,
    /// Orders still waiting for a fill.
    pub open_orders: Vec<&'a Order>,
}

impl<'a> StrategyContext<'a> {
    pub fn bar(&self, symbol: &str) -> Option<&'a Bar> {
        self.bars.iter().copied().find(|b| b.symbol == symbol)
    }

    pub fn position(&self, symbol: &str) -> f64 {
        self.portfolio.quantity(symbol)
    }

    pub fn cash(&self) -> f64 {
        self.portfolio.cash
    }

    pub fn equity(&self) -> f64 {
        self.portfolio.equity(self.marks)
    }
}

/// Per-timestamp decision logic.
pub trait Strategy {
    fn on_bars(&mut self, ctx: &StrategyContext<'_>) -> Result<Vec<Intent>, StrategyError>;
}

impl<F> Strategy for F
where
    F: FnMut(&StrategyContext<'_>) -> Result<Vec<Intent>, StrategyError>,
{
    fn on_bars(&mut self, ctx: &StrategyContext<'_>) -> Result<Vec<Intent>, StrategyError> {
        self(ctx)
    }
}

/// Strategy that never trades.
#[derive(Debug, Clone, Copy, Default)]
pub struct Idle;

impl Strategy for Idle {
    fn on_bars(&mut self, _ctx: &StrategyContext<'_>) -> Result<Vec<Intent>, StrategyError> {
        Ok(Vec::new())
    }
}
