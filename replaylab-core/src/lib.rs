//! ReplayLab Core: event-driven backtesting simulation.
//!
//! This crate contains the simulation itself:
//! - Domain types (bars, events, orders, fills, positions, trades)
//! - Market data ingestion (CSV, JSON, Parquet) and the merged data feed
//! - Order lifecycle state machine with an audit trail
//! - Brokerage execution model (slippage, fees, participation, margin)
//! - Average-cost portfolio accounting
//! - The priority-queue event loop and the strategy contract

pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod execution;
pub mod orders;

pub use config::{BacktestConfig, ConfigError, SignalSizing, StatisticsMode, Timeframe};
pub use data::{DataError, DataSource, MarketDataSet};
pub use engine::{
    CancelToken, Engine, EngineError, Intent, RunOutput, Strategy, StrategyContext,
    StrategyError,
};
