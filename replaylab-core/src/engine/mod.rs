//! Simulation engine: event queue, event loop, accounting and the strategy
//! contract.
//!
//! A run is single-threaded and synchronous. Everything it mutates lives in
//! the run; the only shared input is the immutable [`MarketDataSet`].
//!
//! [`MarketDataSet`]: crate::data::MarketDataSet

pub mod accounting;
pub mod cancel;
pub mod event_loop;
pub mod queue;
pub mod sizing;
pub mod state;
pub mod strategy;

pub use accounting::{apply_fill, FillEffect};
pub use cancel::CancelToken;
pub use event_loop::Engine;
pub use queue::EventQueue;
pub use sizing::{size_signal, SignalDrop};
pub use state::{EngineError, RunDiagnostics, RunOutput, TraceEntry, MAX_WARNINGS};
pub use strategy::{Idle, Intent, Strategy, StrategyContext, StrategyError};
