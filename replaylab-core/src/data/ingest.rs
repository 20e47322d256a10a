//! File ingestion: CSV, JSON and Parquet into per-symbol bar series.
//!
//! Every format is first decoded into loosely-typed rows, then pushed through
//! the same [`SeriesBuilder`], so validation and skip accounting are identical
//! across formats.

use super::error::DataError;
use super::report::{LoadReport, SkipReason};
use super::timestamp::{from_epoch, parse_timestamp};
use crate::domain::Bar;
use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const TIMESTAMP_ALIASES: [&str; 4] = ["timestamp", "date", "datetime", "time"];
const PRICE_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    Csv,
    Json,
    Parquet,
}

impl DataFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(DataFormat::Csv),
            "json" => Some(DataFormat::Json),
            "parquet" | "pq" => Some(DataFormat::Parquet),
            _ => None,
        }
    }
}

/// One input file. Without a `symbol` column the file's rows belong to
/// `symbol`, or to the file stem when that is unset too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub path: PathBuf,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub format: Option<DataFormat>,
}

impl DataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            symbol: None,
            format: None,
        }
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    fn default_symbol(&self) -> Option<String> {
        self.symbol.clone().or_else(|| {
            self.path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.to_string())
        })
    }
}

/// A decoded but not yet validated input row.
#[derive(Debug, Clone, Default)]
pub(crate) struct RawRow {
    pub symbol: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

/// Accumulates validated bars per symbol while enforcing file order.
pub(crate) struct SeriesBuilder {
    series: BTreeMap<String, Vec<Bar>>,
    report: LoadReport,
}

impl SeriesBuilder {
    pub fn new() -> Self {
        Self {
            series: BTreeMap::new(),
            report: LoadReport::default(),
        }
    }

    pub fn add_source(&mut self, path: &Path) {
        self.report.sources.push(path.to_path_buf());
    }

    pub fn record_unreadable(&mut self, symbol: Option<&str>) {
        self.report.rows_read += 1;
        self.report.record_skip(symbol, SkipReason::UnreadableRecord);
    }

    /// Validate one row. Malformed rows are counted and dropped; a timestamp
    /// earlier than the previous bar of the same symbol is fatal.
    pub fn push(
        &mut self,
        row: RawRow,
        default_symbol: Option<&str>,
        path: &Path,
        row_number: usize,
    ) -> Result<(), DataError> {
        self.report.rows_read += 1;

        let Some(symbol) = row.symbol.or_else(|| default_symbol.map(str::to_string)) else {
            self.report.record_skip(None, SkipReason::MissingSymbol);
            return Ok(());
        };
        let Some(timestamp) = row.timestamp else {
            self.report.record_skip(Some(&symbol), SkipReason::BadTimestamp);
            return Ok(());
        };
        let (Some(open), Some(high), Some(low), Some(close), Some(volume)) =
            (row.open, row.high, row.low, row.close, row.volume)
        else {
            self.report.record_skip(Some(&symbol), SkipReason::NonNumeric);
            return Ok(());
        };

        let bar = Bar {
            symbol,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        };
        if bar.is_void() {
            self.report.record_skip(Some(&bar.symbol), SkipReason::NonNumeric);
            return Ok(());
        }
        if !bar.is_sane() {
            self.report.record_skip(Some(&bar.symbol), SkipReason::InconsistentOhlcv);
            return Ok(());
        }

        let series = self.series.entry(bar.symbol.clone()).or_default();
        if let Some(prev) = series.last() {
            if bar.timestamp < prev.timestamp {
                return Err(DataError::OutOfOrder {
                    path: path.to_path_buf(),
                    row: row_number,
                    symbol: bar.symbol,
                    previous: prev.timestamp,
                    timestamp: bar.timestamp,
                });
            }
            if bar.timestamp == prev.timestamp {
                self.report
                    .record_skip(Some(&bar.symbol), SkipReason::DuplicateTimestamp);
                return Ok(());
            }
        }
        self.report.record_loaded(&bar.symbol);
        series.push(bar);
        Ok(())
    }

    pub fn finish(self) -> (BTreeMap<String, Vec<Bar>>, LoadReport) {
        (self.series, self.report)
    }
}

/// Load every source in order into one set of series.
pub fn load_sources(
    sources: &[DataSource],
) -> Result<(BTreeMap<String, Vec<Bar>>, LoadReport), DataError> {
    let mut builder = SeriesBuilder::new();
    for source in sources {
        let format = source
            .format
            .or_else(|| DataFormat::from_path(&source.path))
            .ok_or_else(|| DataError::UnsupportedFormat(source.path.clone()))?;
        let default_symbol = source.default_symbol();
        builder.add_source(&source.path);
        match format {
            DataFormat::Csv => read_csv(&source.path, default_symbol.as_deref(), &mut builder)?,
            DataFormat::Json => read_json(&source.path, default_symbol.as_deref(), &mut builder)?,
            DataFormat::Parquet => {
                read_parquet(&source.path, default_symbol.as_deref(), &mut builder)?
            }
        }
        tracing::debug!(path = %source.path.display(), ?format, "ingested data source");
    }
    Ok(builder.finish())
}

// ── CSV ─────────────────────────────────────────────────────────────

fn read_csv(
    path: &Path,
    default_symbol: Option<&str>,
    builder: &mut SeriesBuilder,
) -> Result<(), DataError> {
    let csv_err = |e: csv::Error| DataError::Csv {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(csv_err)?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .collect();
    let find = |name: &str| headers.iter().position(|h| h == name);
    let ts_idx = TIMESTAMP_ALIASES
        .iter()
        .find_map(|alias| find(*alias))
        .ok_or_else(|| missing(path, "timestamp"))?;
    let mut price_idx = [0usize; 5];
    for (slot, name) in price_idx.iter_mut().zip(PRICE_COLUMNS) {
        *slot = find(name).ok_or_else(|| missing(path, name))?;
    }
    let symbol_idx = find("symbol");

    for (i, record) in reader.records().enumerate() {
        // Header is line 1.
        let row_number = i + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(path = %path.display(), row = row_number, error = %e, "unreadable csv record");
                builder.record_unreadable(default_symbol);
                continue;
            }
        };
        let number = |idx: usize| record.get(idx).and_then(parse_number);
        let row = RawRow {
            symbol: symbol_idx
                .and_then(|idx| record.get(idx))
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            timestamp: record.get(ts_idx).and_then(parse_timestamp),
            open: number(price_idx[0]),
            high: number(price_idx[1]),
            low: number(price_idx[2]),
            close: number(price_idx[3]),
            volume: number(price_idx[4]),
        };
        builder.push(row, default_symbol, path, row_number)?;
    }
    Ok(())
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok()
}

fn missing(path: &Path, column: &str) -> DataError {
    DataError::MissingColumn {
        path: path.to_path_buf(),
        column: column.to_string(),
    }
}

// ── JSON ────────────────────────────────────────────────────────────

/// Reads a top-level array of row objects, or `{"bars": [...]}`.
fn read_json(
    path: &Path,
    default_symbol: Option<&str>,
    builder: &mut SeriesBuilder,
) -> Result<(), DataError> {
    let text = fs::read_to_string(path).map_err(|e| DataError::io(path, e))?;
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| DataError::Json {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let rows = match value {
        serde_json::Value::Array(rows) => rows,
        serde_json::Value::Object(mut obj) => match obj.remove("bars") {
            Some(serde_json::Value::Array(rows)) => rows,
            _ => {
                return Err(DataError::Json {
                    path: path.to_path_buf(),
                    message: "expected an array of rows or an object with a 'bars' array".into(),
                })
            }
        },
        _ => {
            return Err(DataError::Json {
                path: path.to_path_buf(),
                message: "expected an array of rows".into(),
            })
        }
    };

    for (i, row) in rows.into_iter().enumerate() {
        let row_number = i + 1;
        let serde_json::Value::Object(obj) = row else {
            builder.record_unreadable(default_symbol);
            continue;
        };
        let field = |name: &str| obj.get(name).and_then(json_number);
        let timestamp = TIMESTAMP_ALIASES
            .iter()
            .find_map(|alias| obj.get(*alias))
            .and_then(json_timestamp);
        let raw = RawRow {
            symbol: obj
                .get("symbol")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            timestamp,
            open: field("open"),
            high: field("high"),
            low: field("low"),
            close: field("close"),
            volume: field("volume"),
        };
        builder.push(raw, default_symbol, path, row_number)?;
    }
    Ok(())
}

fn json_number(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn json_timestamp(v: &serde_json::Value) -> Option<DateTime<Utc>> {
    match v {
        serde_json::Value::String(s) => parse_timestamp(s),
        serde_json::Value::Number(n) => n.as_i64().and_then(from_epoch),
        _ => None,
    }
}

// ── Parquet ─────────────────────────────────────────────────────────

fn read_parquet(
    path: &Path,
    default_symbol: Option<&str>,
    builder: &mut SeriesBuilder,
) -> Result<(), DataError> {
    let pq_err = |e: PolarsError| DataError::Parquet {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let file = fs::File::open(path).map_err(|e| DataError::io(path, e))?;
    let df = ParquetReader::new(file).finish().map_err(pq_err)?;

    let ts_name = TIMESTAMP_ALIASES
        .iter()
        .find(|name| df.column(name).is_ok())
        .ok_or_else(|| missing(path, "timestamp"))?;
    let timestamps = parquet_timestamps(df.column(ts_name).map_err(pq_err)?).map_err(pq_err)?;

    let mut prices: Vec<Vec<Option<f64>>> = Vec::with_capacity(PRICE_COLUMNS.len());
    for name in PRICE_COLUMNS {
        let col = df.column(name).map_err(|_| missing(path, name))?;
        let cast = col.cast(&DataType::Float64).map_err(pq_err)?;
        prices.push(cast.f64().map_err(pq_err)?.into_iter().collect());
    }

    let symbols: Option<Vec<Option<String>>> = match df.column("symbol") {
        Ok(col) => {
            let cast = col.cast(&DataType::String).map_err(pq_err)?;
            Some(
                cast.str()
                    .map_err(pq_err)?
                    .into_iter()
                    .map(|s| s.filter(|s| !s.is_empty()).map(str::to_string))
                    .collect(),
            )
        }
        Err(_) => None,
    };

    for i in 0..df.height() {
        let row = RawRow {
            symbol: symbols.as_ref().and_then(|s| s[i].clone()),
            timestamp: timestamps[i],
            open: prices[0][i],
            high: prices[1][i],
            low: prices[2][i],
            close: prices[3][i],
            volume: prices[4][i],
        };
        builder.push(row, default_symbol, path, i + 1)?;
    }
    Ok(())
}

/// Decode a timestamp column of any supported physical type.
fn parquet_timestamps(col: &Column) -> PolarsResult<Vec<Option<DateTime<Utc>>>> {
    match col.dtype() {
        DataType::String => Ok(col
            .str()?
            .into_iter()
            .map(|v| v.and_then(parse_timestamp))
            .collect()),
        DataType::Date | DataType::Datetime(_, _) => {
            let millis = col
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?
                .cast(&DataType::Int64)?;
            Ok(millis
                .i64()?
                .into_iter()
                .map(|v| v.and_then(DateTime::from_timestamp_millis))
                .collect())
        }
        dt if dt.is_integer() => {
            let epoch = col.cast(&DataType::Int64)?;
            Ok(epoch.i64()?.into_iter().map(|v| v.and_then(from_epoch)).collect())
        }
        other => Err(PolarsError::ComputeError(
            format!("unsupported timestamp column type {other}").into(),
        )),
    }
}

/// Write bars to a Parquet file (used by fixtures and format conversion).
pub fn write_parquet(bars: &[Bar], path: &Path) -> Result<(), DataError> {
    let pq_err = |e: PolarsError| DataError::Parquet {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let symbols: Vec<&str> = bars.iter().map(|b| b.symbol.as_str()).collect();
    let millis: Vec<i64> = bars.iter().map(|b| b.timestamp.timestamp_millis()).collect();
    let column = |name: &str, f: fn(&Bar) -> f64| {
        Column::new(name.into(), bars.iter().map(f).collect::<Vec<f64>>())
    };

    let mut df = DataFrame::new(vec![
        Column::new("symbol".into(), symbols),
        Column::new("timestamp".into(), millis)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .map_err(pq_err)?,
        column("open", |b| b.open),
        column("high", |b| b.high),
        column("low", |b| b.low),
        column("close", |b| b.close),
        column("volume", |b| b.volume),
    ])
    .map_err(pq_err)?;

    let file = fs::File::create(path).map_err(|e| DataError::io(path, e))?;
    ParquetWriter::new(file).finish(&mut df).map_err(pq_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn csv_skips_malformed_rows_and_counts_them() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "SPY.csv",
            "timestamp,open,high,low,close,volume\n\
             2024-01-02,100,101,99,100.5,1000\n\
             2024-01-03,abc,101,99,100.5,1000\n\
             not-a-date,100,101,99,100.5,1000\n\
             2024-01-04,100,99,101,100,1000\n\
             2024-01-04,100,101,99,100,1000\n\
             2024-01-04,100,101,99,100,1000\n",
        );
        let (series, report) = load_sources(&[DataSource::new(&path)]).unwrap();
        assert_eq!(series["SPY"].len(), 2);
        assert_eq!(report.rows_read, 6);
        let stats = &report.symbols["SPY"];
        assert_eq!(stats.loaded, 2);
        assert_eq!(stats.skipped[&SkipReason::NonNumeric], 1);
        assert_eq!(stats.skipped[&SkipReason::BadTimestamp], 1);
        assert_eq!(stats.skipped[&SkipReason::InconsistentOhlcv], 1);
        assert_eq!(stats.skipped[&SkipReason::DuplicateTimestamp], 1);
    }

    #[test]
    fn csv_out_of_order_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "SPY.csv",
            "date,open,high,low,close,volume\n\
             2024-01-03,100,101,99,100,1000\n\
             2024-01-02,100,101,99,100,1000\n",
        );
        let err = load_sources(&[DataSource::new(&path)]).unwrap_err();
        assert!(matches!(err, DataError::OutOfOrder { row: 3, .. }));
    }

    #[test]
    fn csv_missing_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "SPY.csv", "timestamp,open,high,low,close\n");
        let err = load_sources(&[DataSource::new(&path)]).unwrap_err();
        assert!(matches!(err, DataError::MissingColumn { ref column, .. } if column == "volume"));
    }

    #[test]
    fn csv_symbol_column_splits_series() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "multi.csv",
            "symbol,timestamp,open,high,low,close,volume\n\
             SPY,2024-01-02,100,101,99,100,1000\n\
             QQQ,2024-01-02,50,51,49,50,500\n\
             SPY,2024-01-03,100,101,99,100,1000\n",
        );
        let (series, _) = load_sources(&[DataSource::new(&path)]).unwrap();
        assert_eq!(series["SPY"].len(), 2);
        assert_eq!(series["QQQ"].len(), 1);
    }

    #[test]
    fn json_rows_with_epoch_and_string_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "btc.json",
            r#"[
                {"timestamp": 1704153600, "open": 100, "high": 101, "low": 99, "close": "100.5", "volume": 10},
                {"timestamp": "2024-01-03", "open": 100, "high": 101, "low": 99, "close": 100, "volume": 10},
                {"timestamp": "2024-01-04", "open": null, "high": 101, "low": 99, "close": 100, "volume": 10},
                42
            ]"#,
        );
        let source = DataSource::new(&path).with_symbol("BTC");
        let (series, report) = load_sources(&[source]).unwrap();
        let bars = &series["BTC"];
        assert_eq!(bars.len(), 2);
        assert_eq!(
            bars[0].timestamp,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
        );
        assert_eq!(bars[0].close, 100.5);
        assert_eq!(report.skipped_for("BTC"), 2);
    }

    #[test]
    fn parquet_roundtrip_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.parquet");
        let bars: Vec<Bar> = (0..3)
            .map(|i| Bar {
                symbol: "SPY".into(),
                timestamp: Utc.with_ymd_and_hms(2024, 1, 2 + i, 0, 0, 0).unwrap(),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + i as f64,
                volume: 1000.0,
            })
            .collect();
        write_parquet(&bars, &path).unwrap();
        let (series, report) = load_sources(&[DataSource::new(&path)]).unwrap();
        assert_eq!(series["SPY"], bars);
        assert_eq!(report.rows_skipped(), 0);
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = load_sources(&[DataSource::new("bars.xlsx")]).unwrap_err();
        assert!(matches!(err, DataError::UnsupportedFormat(_)));
    }
}
