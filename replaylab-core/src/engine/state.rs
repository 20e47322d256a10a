//! Engine errors, run diagnostics, and run output types.

use super::strategy::StrategyError;
use crate::config::{BacktestConfig, ConfigError};
use crate::data::DataError;
use crate::domain::{
    DatasetHash, EventKind, Fill, Marks, Order, OrderAuditEntry, Portfolio, RunId,
};
use crate::orders::OrderError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Most warnings kept verbatim in [`RunDiagnostics::warnings`]; the rest are
/// only counted.
pub const MAX_WARNINGS: usize = 100;

/// Fatal run failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("strategy failed at {timestamp}: {source}")]
    Strategy {
        timestamp: DateTime<Utc>,
        #[source]
        source: StrategyError,
    },

    #[error("order bookkeeping error: {0}")]
    Order(#[from] OrderError),

    #[error("event ordering violated: ({timestamp}, {kind}) after ({last_timestamp}, {last_kind})")]
    OrderingViolation {
        timestamp: DateTime<Utc>,
        kind: EventKind,
        last_timestamp: DateTime<Utc>,
        last_kind: EventKind,
    },

    #[error("run cancelled at {0}")]
    Cancelled(DateTime<Utc>),
}

/// Counters for everything the engine did not do silently.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    /// Timestamps processed.
    pub steps: usize,
    /// Processed events per kind.
    pub events: BTreeMap<EventKind, usize>,
    pub orders_submitted: usize,
    pub orders_filled: usize,
    pub partial_fills: usize,
    pub orders_rejected: usize,
    pub orders_cancelled: usize,
    pub orders_expired: usize,
    pub signals_dropped: usize,
    /// Malformed input rows skipped while loading the data set.
    pub rows_skipped: usize,
    pub warnings: Vec<String>,
    /// Warnings beyond [`MAX_WARNINGS`].
    pub warnings_suppressed: usize,
}

impl RunDiagnostics {
    pub fn count_event(&mut self, kind: EventKind) {
        *self.events.entry(kind).or_insert(0) += 1;
    }

    pub fn events_of(&self, kind: EventKind) -> usize {
        self.events.get(&kind).copied().unwrap_or(0)
    }

    pub fn warn(&mut self, message: String) {
        tracing::warn!("{message}");
        if self.warnings.len() < MAX_WARNINGS {
            self.warnings.push(message);
        } else {
            self.warnings_suppressed += 1;
        }
    }
}

/// One processed event in the optional trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub config: BacktestConfig,
    pub run_id: RunId,
    pub dataset_hash: DatasetHash,
    pub portfolio: Portfolio,
    /// Every order in submission order, in its final state.
    pub orders: Vec<Order>,
    pub audit_trail: Vec<OrderAuditEntry>,
    pub fills: Vec<Fill>,
    /// Last known price per symbol.
    pub marks: Marks,
    pub diagnostics: RunDiagnostics,
    /// Empty unless `trace_events` is set.
    pub trace: Vec<TraceEntry>,
    pub final_equity: f64,
}
