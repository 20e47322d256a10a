//! ReplayLab Runner: backtest orchestration, metrics, optimizer, artifacts.
//!
//! This crate builds on `replaylab-core` to provide:
//! - `run_backtest`, the host-facing entry point, and the `BacktestResult` snapshot
//! - Performance metrics over the equity curve and trade log
//! - A parallel parameter-grid optimizer with per-combination failure isolation
//! - TOML run files and JSON/CSV artifact export
//! - Built-in demo strategies

pub mod export;
pub mod metrics;
pub mod optimizer;
pub mod params;
pub mod run_file;
pub mod runner;
pub mod strategies;

pub use export::{import_json, save_artifacts, save_optimization};
pub use metrics::{MetricSettings, PerformanceMetrics};
pub use optimizer::{
    CancelRegistry, ComboKey, ComboOutcome, ComboResult, FailureKind, GridAxis,
    OptimizationReport, OptimizeError, Optimizer, OptimizerSettings, ParamGrid, RankMetric,
};
pub use params::{ParamSet, ParamSetExt, ParamValue};
pub use run_file::{RunFile, RunFileError};
pub use runner::{run_backtest, run_backtest_with_cancel, BacktestResult, RunError, SCHEMA_VERSION};
pub use strategies::{build_strategy, BoxedStrategy, BuyAndHold, MaCrossover, StrategyConfig};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn performance_metrics_is_send_sync() {
        assert_send::<PerformanceMetrics>();
        assert_sync::<PerformanceMetrics>();
    }

    #[test]
    fn backtest_result_is_send_sync() {
        assert_send::<BacktestResult>();
        assert_sync::<BacktestResult>();
    }

    #[test]
    fn optimizer_types_are_send_sync() {
        assert_send::<Optimizer>();
        assert_sync::<Optimizer>();
        assert_send::<CancelRegistry>();
        assert_sync::<CancelRegistry>();
        assert_send::<ComboOutcome>();
        assert_sync::<ComboOutcome>();
        assert_send::<OptimizationReport>();
        assert_sync::<OptimizationReport>();
    }

    #[test]
    fn run_errors_are_send_sync() {
        assert_send::<RunError>();
        assert_sync::<RunError>();
        assert_send::<OptimizeError>();
        assert_sync::<OptimizeError>();
    }

    #[test]
    fn run_file_is_send_sync() {
        assert_send::<RunFile>();
        assert_sync::<RunFile>();
    }
}
