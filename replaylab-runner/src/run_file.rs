//! TOML run files.
//!
//! ```toml
//! [backtest]
//! initial_capital = 100000.0
//! symbols = ["SPY"]
//! timeframe = "1d"
//! fee_taker_bps = 1.0
//!
//! [data]
//! sources = [{ path = "spy.csv", symbol = "SPY" }]
//!
//! [strategy]
//! name = "ma_crossover"
//! params = { fast = 10, slow = 30 }
//!
//! [optimizer]
//! threads = 4
//! rank_by = "sharpe"
//! axes = [
//!     { name = "fast", values = [5, 10, 20] },
//!     { name = "slow", values = [30, 50, 100] },
//! ]
//! ```
//!
//! Relative data paths resolve against the run file's directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use replaylab_core::data::DataSource;
use replaylab_core::{BacktestConfig, ConfigError, DataError, MarketDataSet};

use crate::optimizer::{GridAxis, OptimizerSettings, ParamGrid};
use crate::strategies::StrategyConfig;

/// Errors reading a run file.
#[derive(Debug, Error)]
pub enum RunFileError {
    #[error("cannot read run file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid run file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("[data] lists no sources")]
    NoSources,
    #[error("run file has no [optimizer] table")]
    NoOptimizer,
    #[error(transparent)]
    Data(#[from] DataError),
}

/// `[data]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSection {
    pub sources: Vec<DataSource>,
}

/// `[optimizer]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSection {
    #[serde(flatten)]
    pub settings: OptimizerSettings,
    pub axes: Vec<GridAxis>,
}

impl OptimizerSection {
    pub fn grid(&self) -> ParamGrid {
        ParamGrid {
            axes: self.axes.clone(),
        }
    }
}

/// A complete run description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFile {
    pub backtest: BacktestConfig,
    pub data: DataSection,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub optimizer: Option<OptimizerSection>,
}

impl RunFile {
    /// Parse and validate a run file from disk.
    pub fn load(path: &Path) -> Result<Self, RunFileError> {
        let content = std::fs::read_to_string(path).map_err(|source| RunFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut file = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            file.resolve_paths(base);
        }
        Ok(file)
    }

    /// Parse and validate a run file from a string. Paths stay as written.
    pub fn from_toml(content: &str) -> Result<Self, RunFileError> {
        let file: RunFile = toml::from_str(content)?;
        file.backtest.validate()?;
        if file.data.sources.is_empty() {
            return Err(RunFileError::NoSources);
        }
        Ok(file)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for source in &mut self.data.sources {
            if source.path.is_relative() {
                source.path = base.join(&source.path);
            }
        }
    }

    /// Load every `[data]` source into one market data set.
    pub fn load_data(&self) -> Result<MarketDataSet, RunFileError> {
        Ok(MarketDataSet::load(&self.data.sources)?)
    }

    pub fn optimizer(&self) -> Result<&OptimizerSection, RunFileError> {
        self.optimizer.as_ref().ok_or(RunFileError::NoOptimizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::RankMetric;
    use crate::params::ParamValue;
    use replaylab_core::{SignalSizing, Timeframe};

    const FULL: &str = r#"
[backtest]
initial_capital = 50000.0
symbols = ["SPY", "QQQ"]
timeframe = "1h"
fee_taker_bps = 2.0
benchmark_symbol = "QQQ"
signal_sizing = { type = "equity_fraction", fraction = 0.25 }

[data]
sources = [
    { path = "spy.csv", symbol = "SPY" },
    { path = "/abs/qqq.parquet" },
]

[strategy]
name = "ma_crossover"
params = { fast = 5, slow = 20 }

[optimizer]
threads = 2
rank_by = "total_return"
axes = [
    { name = "fast", values = [5, 10] },
    { name = "slow", values = [30, 50, 100] },
]
"#;

    #[test]
    fn parses_every_table() {
        let file = RunFile::from_toml(FULL).unwrap();
        assert_eq!(file.backtest.initial_capital, 50_000.0);
        assert_eq!(file.backtest.timeframe, Timeframe::Hour1);
        assert_eq!(file.backtest.signal_sizing, SignalSizing::EquityFraction { fraction: 0.25 });
        assert!(file.backtest.liquidate_on_finish);
        assert_eq!(file.data.sources.len(), 2);
        assert_eq!(file.strategy.params["slow"], ParamValue::Int(20));

        let opt = file.optimizer().unwrap();
        assert_eq!(opt.settings.threads, Some(2));
        assert_eq!(opt.settings.rank_by, RankMetric::TotalReturn);
        assert_eq!(opt.grid().len(), 6);
    }

    #[test]
    fn optimizer_table_is_optional() {
        let minimal = r#"
[backtest]
initial_capital = 1000.0
symbols = ["SPY"]
timeframe = "1d"

[data]
sources = [{ path = "spy.csv" }]

[strategy]
name = "buy_and_hold"
"#;
        let file = RunFile::from_toml(minimal).unwrap();
        assert!(file.strategy.params.is_empty());
        assert!(matches!(file.optimizer(), Err(RunFileError::NoOptimizer)));
    }

    #[test]
    fn invalid_backtest_section_is_rejected() {
        let bad = FULL.replace("initial_capital = 50000.0", "initial_capital = -5.0");
        assert!(matches!(RunFile::from_toml(&bad), Err(RunFileError::Config(_))));
        let bad = FULL.replace("timeframe = \"1h\"", "timeframe = \"2d\"");
        assert!(matches!(RunFile::from_toml(&bad), Err(RunFileError::Parse(_))));
    }

    #[test]
    fn relative_paths_resolve_against_run_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(&path, FULL).unwrap();
        let file = RunFile::load(&path).unwrap();
        assert_eq!(file.data.sources[0].path, dir.path().join("spy.csv"));
        assert_eq!(file.data.sources[1].path, PathBuf::from("/abs/qqq.parquet"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = RunFile::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, RunFileError::Io { .. }));
    }
}
