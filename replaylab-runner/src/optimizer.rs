//! Parallel parameter-grid optimizer.
//!
//! Every combination of the grid is an independent backtest: it gets its own
//! strategy (from the factory), its own config copy and its own engine. The
//! only shared state is the immutable market data behind an `Arc` and the
//! result channel. A failing combination (strategy error, panic,
//! cancellation) is recorded as failed; the others are unaffected.

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use replaylab_core::engine::CancelToken;
use replaylab_core::{BacktestConfig, ConfigError, EngineError, MarketDataSet, StrategyError};

use crate::metrics::PerformanceMetrics;
use crate::params::{ParamSet, ParamSetExt, ParamValue};
use crate::runner::{run_backtest_with_cancel, BacktestResult, RunError};
use crate::strategies::BoxedStrategy;

/// Errors that stop the whole optimization before any combination runs.
#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("parameter grid has no axes")]
    EmptyGrid,
    #[error("axis '{0}' has no values")]
    EmptyAxis(String),
    #[error("axis '{0}' listed more than once")]
    DuplicateAxis(String),
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

// ─── Grid ───────────────────────────────────────────────────────────

/// One named axis of the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridAxis {
    pub name: String,
    pub values: Vec<ParamValue>,
}

/// Cartesian product of parameter axes.
///
/// Combinations are enumerated with the last axis varying fastest, so the
/// order is fixed by the order the axes were added.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    pub axes: Vec<GridAxis>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn axis(mut self, name: impl Into<String>, values: Vec<ParamValue>) -> Self {
        self.axes.push(GridAxis {
            name: name.into(),
            values,
        });
        self
    }

    pub fn validate(&self) -> Result<(), OptimizeError> {
        if self.axes.is_empty() {
            return Err(OptimizeError::EmptyGrid);
        }
        let mut seen = BTreeSet::new();
        for axis in &self.axes {
            if axis.values.is_empty() {
                return Err(OptimizeError::EmptyAxis(axis.name.clone()));
            }
            if !seen.insert(axis.name.as_str()) {
                return Err(OptimizeError::DuplicateAxis(axis.name.clone()));
            }
        }
        Ok(())
    }

    /// Number of combinations.
    pub fn len(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(|a| a.values.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every combination in deterministic order.
    pub fn combinations(&self) -> Vec<ParamSet> {
        let total = self.len();
        let mut out = Vec::with_capacity(total);
        for mut index in 0..total {
            let mut set = ParamSet::new();
            for axis in self.axes.iter().rev() {
                let n = axis.values.len();
                set.insert(axis.name.clone(), axis.values[index % n].clone());
                index /= n;
            }
            out.push(set);
        }
        out
    }
}

/// Identity of one combination: its position in the grid plus a content
/// hash of its parameters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComboKey {
    pub index: usize,
    /// BLAKE3 over the canonical JSON of the parameters.
    pub id: String,
}

impl ComboKey {
    pub fn new(index: usize, params: &ParamSet) -> Self {
        let canonical = serde_json::to_string(params).unwrap_or_default();
        Self {
            index,
            id: blake3::hash(canonical.as_bytes()).to_hex().to_string(),
        }
    }

    pub fn short(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}

// ─── Cancellation ───────────────────────────────────────────────────

/// One cancel token per combination, created before the pool starts.
///
/// Cloning shares the tokens, so a host can keep a copy and cancel single
/// combinations (or all of them) while the optimizer runs.
#[derive(Debug, Clone, Default)]
pub struct CancelRegistry {
    tokens: Arc<BTreeMap<usize, CancelToken>>,
}

impl CancelRegistry {
    fn for_keys(keys: &[ComboKey]) -> Self {
        Self {
            tokens: Arc::new(keys.iter().map(|k| (k.index, CancelToken::new())).collect()),
        }
    }

    /// Cancel one combination. Returns false for an unknown index.
    pub fn cancel(&self, index: usize) -> bool {
        match self.tokens.get(&index) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for token in self.tokens.values() {
            token.cancel();
        }
    }

    pub fn token(&self, index: usize) -> Option<CancelToken> {
        self.tokens.get(&index).cloned()
    }
}

// ─── Ranking ────────────────────────────────────────────────────────

/// Metric the report is ranked by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMetric {
    #[default]
    Sharpe,
    Sortino,
    Calmar,
    TotalReturn,
    Cagr,
    ProfitFactor,
    /// Smallest drawdown first.
    MaxDrawdown,
}

impl RankMetric {
    pub fn value(self, m: &PerformanceMetrics) -> f64 {
        match self {
            RankMetric::Sharpe => m.sharpe,
            RankMetric::Sortino => m.sortino,
            RankMetric::Calmar => m.calmar,
            RankMetric::TotalReturn => m.total_return,
            RankMetric::Cagr => m.cagr,
            RankMetric::ProfitFactor => m.profit_factor,
            RankMetric::MaxDrawdown => m.max_drawdown,
        }
    }

    pub fn higher_is_better(self) -> bool {
        !matches!(self, RankMetric::MaxDrawdown)
    }

    /// Score where larger is always better; NaN ranks last.
    fn score(self, m: &PerformanceMetrics) -> f64 {
        let v = self.value(m);
        if v.is_nan() {
            f64::NEG_INFINITY
        } else if self.higher_is_better() {
            v
        } else {
            -v
        }
    }
}

// ─── Outcomes and report ────────────────────────────────────────────

/// Why a combination failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The factory refused the parameters or the strategy errored mid-run.
    Strategy,
    /// The strategy panicked.
    Panic,
    Cancelled,
    /// Any other engine failure (config, data, bookkeeping, ordering).
    Engine,
}

/// Result of one combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComboOutcome {
    Completed { result: Box<BacktestResult> },
    Failed { kind: FailureKind, reason: String },
}

impl ComboOutcome {
    pub fn result(&self) -> Option<&BacktestResult> {
        match self {
            ComboOutcome::Completed { result } => Some(&**result),
            ComboOutcome::Failed { .. } => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ComboOutcome::Completed { .. })
    }

    fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        ComboOutcome::Failed {
            kind,
            reason: reason.into(),
        }
    }

    fn from_run(outcome: Result<BacktestResult, RunError>) -> Self {
        match outcome {
            Ok(result) => ComboOutcome::Completed {
                result: Box::new(result),
            },
            Err(err) => {
                let kind = match &err {
                    RunError::Engine(EngineError::Strategy { .. }) => FailureKind::Strategy,
                    RunError::Engine(EngineError::Cancelled(_)) => FailureKind::Cancelled,
                    _ => FailureKind::Engine,
                };
                ComboOutcome::failed(kind, err.to_string())
            }
        }
    }
}

/// One combination with its parameters and outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboResult {
    pub key: ComboKey,
    pub params: ParamSet,
    pub outcome: ComboOutcome,
}

/// Everything an optimization produced, in grid order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub rank_metric: RankMetric,
    pub results: Vec<ComboResult>,
    /// Grid indices of completed combinations, best first. Ties keep grid
    /// order.
    pub ranking: Vec<usize>,
    pub completed: usize,
    pub failed: usize,
}

impl OptimizationReport {
    fn new(rank_metric: RankMetric, results: Vec<ComboResult>) -> Self {
        let mut scored: Vec<(usize, f64)> = results
            .iter()
            .filter_map(|r| {
                r.outcome
                    .result()
                    .map(|res| (r.key.index, rank_metric.score(&res.metrics)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        let completed = scored.len();
        Self {
            rank_metric,
            failed: results.len() - completed,
            completed,
            ranking: scored.into_iter().map(|(i, _)| i).collect(),
            results,
        }
    }

    /// Completed combinations, best first.
    pub fn ranked(&self) -> impl Iterator<Item = &ComboResult> {
        self.ranking.iter().filter_map(|&i| self.results.get(i))
    }

    pub fn best(&self) -> Option<&ComboResult> {
        self.ranked().next()
    }

    pub fn get(&self, index: usize) -> Option<&ComboResult> {
        self.results.get(index)
    }
}

// ─── Optimizer ──────────────────────────────────────────────────────

/// `[optimizer]` settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Worker threads; `None` uses every available core.
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub rank_by: RankMetric,
}

/// Runs a strategy over every combination of a parameter grid.
#[derive(Debug)]
pub struct Optimizer {
    config: BacktestConfig,
    settings: OptimizerSettings,
    combos: Vec<(ComboKey, ParamSet)>,
    registry: CancelRegistry,
}

impl Optimizer {
    /// Validate the config and grid and lay out every combination.
    pub fn new(
        config: BacktestConfig,
        grid: &ParamGrid,
        settings: OptimizerSettings,
    ) -> Result<Self, OptimizeError> {
        config.validate()?;
        grid.validate()?;
        let combos: Vec<(ComboKey, ParamSet)> = grid
            .combinations()
            .into_iter()
            .enumerate()
            .map(|(i, params)| (ComboKey::new(i, &params), params))
            .collect();
        let keys: Vec<ComboKey> = combos.iter().map(|(k, _)| k.clone()).collect();
        Ok(Self {
            config,
            settings,
            registry: CancelRegistry::for_keys(&keys),
            combos,
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &ComboKey> {
        self.combos.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }

    /// Shared handle for cancelling combinations.
    pub fn cancel_registry(&self) -> CancelRegistry {
        self.registry.clone()
    }

    /// Run every combination on a rayon pool.
    ///
    /// `factory` builds a fresh strategy per combination; it runs on the
    /// worker thread, so the strategy itself never crosses threads.
    pub fn run<F>(
        &self,
        data: Arc<MarketDataSet>,
        factory: F,
    ) -> Result<OptimizationReport, OptimizeError>
    where
        F: Fn(&ParamSet) -> Result<BoxedStrategy, StrategyError> + Sync,
    {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = self.settings.threads {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| OptimizeError::ThreadPool(e.to_string()))?;

        tracing::info!(
            combinations = self.combos.len(),
            threads = pool.current_num_threads(),
            rank_by = ?self.settings.rank_by,
            "optimization started"
        );

        let (tx, rx) = mpsc::channel::<(ComboKey, ComboOutcome)>();
        let factory = &factory;
        pool.scope(|scope| {
            for (key, params) in &self.combos {
                let tx = tx.clone();
                let data = Arc::clone(&data);
                let config = self.config.clone();
                let cancel = self.registry.token(key.index).unwrap_or_default();
                scope.spawn(move |_| {
                    let outcome = run_combo(config, &data, params, factory, cancel);
                    // The receiver outlives the scope.
                    let _ = tx.send((key.clone(), outcome));
                });
            }
        });
        drop(tx);

        let mut received: BTreeMap<ComboKey, ComboOutcome> = rx.into_iter().collect();
        let results: Vec<ComboResult> = self
            .combos
            .iter()
            .map(|(key, params)| {
                let outcome = received.remove(key).unwrap_or_else(|| {
                    ComboOutcome::failed(FailureKind::Engine, "worker produced no result")
                });
                if let ComboOutcome::Failed { kind, reason } = &outcome {
                    tracing::warn!(
                        combo = key.index,
                        id = key.short(),
                        params = %params.describe(),
                        ?kind,
                        "combination failed: {reason}"
                    );
                }
                ComboResult {
                    key: key.clone(),
                    params: params.clone(),
                    outcome,
                }
            })
            .collect();

        let report = OptimizationReport::new(self.settings.rank_by, results);
        tracing::info!(
            completed = report.completed,
            failed = report.failed,
            best = ?report.best().map(|r| r.key.index),
            "optimization finished"
        );
        Ok(report)
    }
}

fn run_combo<F>(
    config: BacktestConfig,
    data: &MarketDataSet,
    params: &ParamSet,
    factory: &F,
    cancel: CancelToken,
) -> ComboOutcome
where
    F: Fn(&ParamSet) -> Result<BoxedStrategy, StrategyError> + Sync,
{
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut strategy = match factory(params) {
            Ok(s) => s,
            Err(e) => return ComboOutcome::failed(FailureKind::Strategy, e.to_string()),
        };
        ComboOutcome::from_run(run_backtest_with_cancel(&config, data, &mut *strategy, cancel))
    }));
    attempt.unwrap_or_else(|payload| ComboOutcome::failed(FailureKind::Panic, panic_message(&*payload)))
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
