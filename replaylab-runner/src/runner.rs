//! Backtest runner: wires the engine, metrics and result snapshot together.
//!
//! Two entry points:
//! - `run_backtest()`: config + shared data + strategy. Used by hosts and the CLI.
//! - `run_backtest_with_cancel()`: same, with a cooperative cancel token.
//!   Used by the optimizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use replaylab_core::domain::{
    DatasetHash, EquityPoint, Fill, Order, OrderAuditEntry, Position, RunId, Trade,
};
use replaylab_core::engine::{RunDiagnostics, RunOutput, TraceEntry};
use replaylab_core::{
    BacktestConfig, CancelToken, Engine, EngineError, MarketDataSet, Strategy,
};

use crate::metrics::{period_samples, MetricSettings, PerformanceMetrics};

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl RunError {
    /// True when the run stopped because its cancel token fired.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Engine(EngineError::Cancelled(_)))
    }
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Immutable terminal snapshot of one run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub dataset_hash: DatasetHash,
    pub config: BacktestConfig,
    /// First and last equity sample times.
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub final_cash: f64,
    pub metrics: PerformanceMetrics,
    pub equity_curve: Vec<EquityPoint>,
    /// Benchmark close per equity period, when a benchmark is configured.
    #[serde(default)]
    pub benchmark_curve: Option<Vec<f64>>,
    pub trades: Vec<Trade>,
    pub orders: Vec<Order>,
    pub audit_trail: Vec<OrderAuditEntry>,
    pub fills: Vec<Fill>,
    /// Positions still open at the end (empty after liquidation).
    pub open_positions: Vec<Position>,
    pub diagnostics: RunDiagnostics,
    #[serde(default)]
    pub trace: Vec<TraceEntry>,
}

/// Default schema version for serde deserialization of older JSON without the field.
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl BacktestResult {
    /// Build the snapshot from the engine output.
    pub fn from_output(output: RunOutput, data: &MarketDataSet) -> Self {
        let settings = MetricSettings::from_config(&output.config);
        let periods = period_samples(&output.portfolio.equity_curve);
        let benchmark_curve = output
            .config
            .benchmark_symbol
            .as_deref()
            .and_then(|symbol| benchmark_closes(data, symbol, &periods));

        let metrics = PerformanceMetrics::compute(
            &output.portfolio.equity_curve,
            &output.portfolio.trades,
            benchmark_curve.as_deref(),
            output.portfolio.total_fees,
            &settings,
        );

        let RunOutput {
            config,
            run_id,
            dataset_hash,
            portfolio,
            orders,
            audit_trail,
            fills,
            diagnostics,
            trace,
            final_equity,
            ..
        } = output;

        let open_positions = portfolio
            .positions
            .values()
            .filter(|p| !p.is_flat())
            .cloned()
            .collect();

        Self {
            schema_version: SCHEMA_VERSION,
            run_id,
            dataset_hash,
            start: portfolio.equity_curve.first().map(|p| p.timestamp),
            end: portfolio.equity_curve.last().map(|p| p.timestamp),
            initial_capital: config.initial_capital,
            final_equity,
            final_cash: portfolio.cash,
            config,
            metrics,
            equity_curve: portfolio.equity_curve,
            benchmark_curve,
            trades: portfolio.trades,
            orders,
            audit_trail,
            fills,
            open_positions,
            diagnostics,
            trace,
        }
    }

    /// Net profit over the run.
    pub fn net_profit(&self) -> f64 {
        self.final_equity - self.initial_capital
    }
}

/// Run one backtest to completion.
pub fn run_backtest<S>(
    config: &BacktestConfig,
    data: &MarketDataSet,
    strategy: &mut S,
) -> Result<BacktestResult, RunError>
where
    S: Strategy + ?Sized,
{
    execute(Engine::new(config.clone())?, data, strategy)
}

/// Run one backtest that stops at the next timestamp once `cancel` fires.
pub fn run_backtest_with_cancel<S>(
    config: &BacktestConfig,
    data: &MarketDataSet,
    strategy: &mut S,
    cancel: CancelToken,
) -> Result<BacktestResult, RunError>
where
    S: Strategy + ?Sized,
{
    execute(Engine::new(config.clone())?.with_cancel(cancel), data, strategy)
}

fn execute<S>(
    engine: Engine,
    data: &MarketDataSet,
    strategy: &mut S,
) -> Result<BacktestResult, RunError>
where
    S: Strategy + ?Sized,
{
    let output = engine.run(data, strategy)?;
    let result = BacktestResult::from_output(output, data);
    tracing::info!(
        run_id = result.run_id.short(),
        final_equity = result.final_equity,
        total_return = result.metrics.total_return,
        sharpe = result.metrics.sharpe,
        max_drawdown = result.metrics.max_drawdown,
        trades = result.metrics.trade_count,
        "backtest finished"
    );
    Ok(result)
}

/// Benchmark close at each period: the last bar at or before the period
/// timestamp. Periods before the benchmark's first bar use its first close.
fn benchmark_closes(
    data: &MarketDataSet,
    symbol: &str,
    periods: &[EquityPoint],
) -> Option<Vec<f64>> {
    let bars = data.bars(symbol)?;
    let first = bars.first()?;
    Some(
        periods
            .iter()
            .map(|p| {
                let idx = bars.partition_point(|b| b.timestamp <= p.timestamp);
                if idx == 0 {
                    first.close
                } else {
                    bars[idx - 1].close
                }
            })
            .collect(),
    )
}
