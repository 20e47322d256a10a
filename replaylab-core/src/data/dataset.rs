//! Immutable market data set shared by every run.

use super::error::DataError;
use super::ingest::{load_sources, DataSource, RawRow, SeriesBuilder};
use super::report::LoadReport;
use crate::domain::{Bar, DatasetHash};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::path::Path;

/// Validated bars per symbol, strictly ascending in time.
///
/// Built once, then shared read-only (`Arc<MarketDataSet>`) between any
/// number of concurrent runs.
#[derive(Debug, Clone)]
pub struct MarketDataSet {
    series: BTreeMap<String, Vec<Bar>>,
    report: LoadReport,
    hash: DatasetHash,
}

impl MarketDataSet {
    /// Load from files, skipping malformed rows.
    pub fn load(sources: &[DataSource]) -> Result<Self, DataError> {
        let (series, report) = load_sources(sources)?;
        tracing::info!(
            symbols = series.len(),
            loaded = report.rows_loaded(),
            skipped = report.rows_skipped(),
            "market data loaded"
        );
        Ok(Self::assemble(series, report))
    }

    /// Build from in-memory bars with the same validation as file loading.
    ///
    /// Bars are consumed in the given order; per symbol they must not go
    /// back in time.
    pub fn from_bars(bars: impl IntoIterator<Item = Bar>) -> Result<Self, DataError> {
        let mut builder = SeriesBuilder::new();
        let origin = Path::new("<memory>");
        for (i, bar) in bars.into_iter().enumerate() {
            let row = RawRow {
                symbol: Some(bar.symbol),
                timestamp: Some(bar.timestamp),
                open: Some(bar.open),
                high: Some(bar.high),
                low: Some(bar.low),
                close: Some(bar.close),
                volume: Some(bar.volume),
            };
            builder.push(row, None, origin, i + 1)?;
        }
        let (series, report) = builder.finish();
        Ok(Self::assemble(series, report))
    }

    fn assemble(series: BTreeMap<String, Vec<Bar>>, report: LoadReport) -> Self {
        let hash = fingerprint(&series);
        Self {
            series,
            report,
            hash,
        }
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.series.contains_key(symbol)
    }

    pub fn bars(&self, symbol: &str) -> Option<&[Bar]> {
        self.series.get(symbol).map(Vec::as_slice)
    }

    /// Bars of `symbol` whose date falls in `[start, end]` (inclusive).
    pub fn bars_in_range(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Option<&[Bar]> {
        let bars = self.bars(symbol)?;
        let lo = match start {
            Some(s) => bars.partition_point(|b| b.timestamp.date_naive() < s),
            None => 0,
        };
        let hi = match end {
            Some(e) => bars.partition_point(|b| b.timestamp.date_naive() <= e),
            None => bars.len(),
        };
        Some(&bars[lo..hi.max(lo)])
    }

    /// Total number of bars across all symbols.
    pub fn len(&self) -> usize {
        self.series.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn hash(&self) -> &DatasetHash {
        &self.hash
    }

    /// Earliest and latest timestamp across all symbols.
    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let first = self.series.values().filter_map(|s| s.first()).map(|b| b.timestamp).min()?;
        let last = self.series.values().filter_map(|s| s.last()).map(|b| b.timestamp).max()?;
        Some((first, last))
    }
}

/// BLAKE3 over symbol names and the exact bit patterns of every bar.
fn fingerprint(series: &BTreeMap<String, Vec<Bar>>) -> DatasetHash {
    let mut hasher = blake3::Hasher::new();
    for (symbol, bars) in series {
        hasher.update(symbol.as_bytes());
        hasher.update(&(bars.len() as u64).to_le_bytes());
        for bar in bars {
            hasher.update(&bar.timestamp.timestamp_millis().to_le_bytes());
            for v in [bar.open, bar.high, bar.low, bar.close, bar.volume] {
                hasher.update(&v.to_bits().to_le_bytes());
            }
        }
    }
    DatasetHash(hasher.finalize().to_hex().to_string())
}
