//! Load report: what was read, what was kept, and why rows were skipped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Why a row was skipped instead of loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The record itself could not be decoded (bad quoting, wrong shape).
    UnreadableRecord,
    /// No symbol column and no default symbol for the file.
    MissingSymbol,
    /// Timestamp missing or unparseable.
    BadTimestamp,
    /// An OHLCV field is missing, non-numeric or non-finite.
    NonNumeric,
    /// Prices non-positive, volume negative, or open/close outside [low, high].
    InconsistentOhlcv,
    /// Same timestamp as the previous row of the same symbol.
    DuplicateTimestamp,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::UnreadableRecord => "unreadable record",
            SkipReason::MissingSymbol => "missing symbol",
            SkipReason::BadTimestamp => "bad timestamp",
            SkipReason::NonNumeric => "non-numeric value",
            SkipReason::InconsistentOhlcv => "inconsistent ohlcv",
            SkipReason::DuplicateTimestamp => "duplicate timestamp",
        };
        f.write_str(s)
    }
}

/// Per-symbol load counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SymbolLoadStats {
    pub loaded: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl SymbolLoadStats {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

/// Summary of one ingestion pass over one or more files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub sources: Vec<PathBuf>,
    pub rows_read: usize,
    pub symbols: BTreeMap<String, SymbolLoadStats>,
    /// Skips that could not be attributed to a symbol.
    pub unattributed: BTreeMap<SkipReason, usize>,
}

impl LoadReport {
    pub fn record_loaded(&mut self, symbol: &str) {
        self.symbols.entry(symbol.to_string()).or_default().loaded += 1;
    }

    pub fn record_skip(&mut self, symbol: Option<&str>, reason: SkipReason) {
        let bucket = match symbol {
            Some(sym) => &mut self.symbols.entry(sym.to_string()).or_default().skipped,
            None => &mut self.unattributed,
        };
        *bucket.entry(reason).or_insert(0) += 1;
    }

    pub fn rows_loaded(&self) -> usize {
        self.symbols.values().map(|s| s.loaded).sum()
    }

    pub fn rows_skipped(&self) -> usize {
        self.symbols.values().map(|s| s.skipped_total()).sum::<usize>()
            + self.unattributed.values().sum::<usize>()
    }

    pub fn skipped_for(&self, symbol: &str) -> usize {
        self.symbols.get(symbol).map_or(0, |s| s.skipped_total())
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: LoadReport) {
        self.sources.extend(other.sources);
        self.rows_read += other.rows_read;
        for (sym, stats) in other.symbols {
            let entry = self.symbols.entry(sym).or_default();
            entry.loaded += stats.loaded;
            for (reason, n) in stats.skipped {
                *entry.skipped.entry(reason).or_insert(0) += n;
            }
        }
        for (reason, n) in other.unattributed {
            *self.unattributed.entry(reason).or_insert(0) += n;
        }
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} rows read, {} loaded, {} skipped",
            self.rows_read,
            self.rows_loaded(),
            self.rows_skipped()
        )?;
        for (sym, stats) in &self.symbols {
            write!(f, "  {sym}: {} loaded", stats.loaded)?;
            for (reason, n) in &stats.skipped {
                write!(f, ", {n} {reason}")?;
            }
            writeln!(f)?;
        }
        for (reason, n) in &self.unattributed {
            writeln!(f, "  (no symbol): {n} {reason}")?;
        }
        Ok(())
    }
}
