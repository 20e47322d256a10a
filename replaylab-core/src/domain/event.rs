//! Events flowing through the simulation queue.
//!
//! Every event carries a timestamp. At equal timestamps the event kind decides
//! the processing order: market data first, then signals, orders, fills and
//! finally portfolio updates.

use super::bar::Bar;
use super::fill::Fill;
use super::order::Order;
use super::portfolio::PortfolioSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Desired exposure direction carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Direction {
    Short,
    Flat,
    Long,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Short => -1.0,
            Direction::Flat => 0.0,
            Direction::Long => 1.0,
        }
    }
}

impl From<Direction> for i8 {
    fn from(d: Direction) -> i8 {
        match d {
            Direction::Short => -1,
            Direction::Flat => 0,
            Direction::Long => 1,
        }
    }
}

impl TryFrom<i8> for Direction {
    type Error = String;

    fn try_from(v: i8) -> Result<Self, Self::Error> {
        match v {
            -1 => Ok(Direction::Short),
            0 => Ok(Direction::Flat),
            1 => Ok(Direction::Long),
            other => Err(format!("direction must be -1, 0 or 1, got {other}")),
        }
    }
}

/// Target-exposure request from a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    /// Scales the configured sizing unit; must be finite and non-negative.
    pub strength: f64,
}

/// Event kinds in same-timestamp processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MarketData = 0,
    Signal = 1,
    Order = 2,
    Fill = 3,
    PortfolioUpdate = 4,
}

impl EventKind {
    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::MarketData => "market_data",
            EventKind::Signal => "signal",
            EventKind::Order => "order",
            EventKind::Fill => "fill",
            EventKind::PortfolioUpdate => "portfolio_update",
        };
        f.write_str(name)
    }
}

/// Closed set of simulation events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    MarketData(Bar),
    Signal(Signal),
    /// Order as created, before validation.
    Order(Order),
    Fill(Fill),
    PortfolioUpdate(PortfolioSnapshot),
}

impl Event {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::MarketData(bar) => bar.timestamp,
            Event::Signal(signal) => signal.timestamp,
            Event::Order(order) => order.submitted_at,
            Event::Fill(fill) => fill.timestamp,
            Event::PortfolioUpdate(snapshot) => snapshot.timestamp,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::MarketData(_) => EventKind::MarketData,
            Event::Signal(_) => EventKind::Signal,
            Event::Order(_) => EventKind::Order,
            Event::Fill(_) => EventKind::Fill,
            Event::PortfolioUpdate(_) => EventKind::PortfolioUpdate,
        }
    }

    pub fn rank(&self) -> u8 {
        self.kind().rank()
    }
}
