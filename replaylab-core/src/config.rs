//! Static run configuration and its validation.
//!
//! A `BacktestConfig` is immutable for the life of a run. Every constant is
//! checked once by [`BacktestConfig::validate`] before the first event is
//! processed, so the event loop never has to re-check them.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Invalid static parameters. Always fatal, always raised before the loop.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("no symbols configured")]
    NoSymbols,

    #[error("symbol '{0}' listed more than once")]
    DuplicateSymbol(String),

    #[error("symbol '{0}' not present in the market data")]
    UnknownSymbol(String),

    #[error("benchmark symbol '{0}' not present in the market data")]
    UnknownBenchmark(String),

    #[error("unknown timeframe '{0}' (expected one of 1m, 5m, 15m, 30m, 1h, 4h, 1d, 1w)")]
    UnknownTimeframe(String),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Bar interval of the input data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    Minute1,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour4,
    Day1,
    Week1,
}

impl Timeframe {
    pub fn duration(self) -> Duration {
        match self {
            Timeframe::Minute1 => Duration::minutes(1),
            Timeframe::Minute5 => Duration::minutes(5),
            Timeframe::Minute15 => Duration::minutes(15),
            Timeframe::Minute30 => Duration::minutes(30),
            Timeframe::Hour1 => Duration::hours(1),
            Timeframe::Hour4 => Duration::hours(4),
            Timeframe::Day1 => Duration::days(1),
            Timeframe::Week1 => Duration::weeks(1),
        }
    }

    /// Annualisation factor: trading periods for daily and weekly bars,
    /// a 365-day calendar for intraday bars.
    pub fn periods_per_year(self) -> f64 {
        match self {
            Timeframe::Day1 => 252.0,
            Timeframe::Week1 => 52.0,
            intraday => (365.0 * 24.0 * 60.0) / intraday.duration().num_minutes() as f64,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Minute1 => "1m",
            Timeframe::Minute5 => "5m",
            Timeframe::Minute15 => "15m",
            Timeframe::Minute30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1d",
            Timeframe::Week1 => "1w",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(Timeframe::Minute1),
            "5m" => Ok(Timeframe::Minute5),
            "15m" => Ok(Timeframe::Minute15),
            "30m" => Ok(Timeframe::Minute30),
            "1h" => Ok(Timeframe::Hour1),
            "4h" => Ok(Timeframe::Hour4),
            "1d" => Ok(Timeframe::Day1),
            "1w" => Ok(Timeframe::Week1),
            _ => Err(ConfigError::UnknownTimeframe(s.to_string())),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> String {
        tf.as_str().to_string()
    }
}

/// How a signal's strength turns into a target position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalSizing {
    /// Target = direction * strength * quantity units.
    Units { quantity: f64 },
    /// Target = direction * strength * fraction * equity / mark.
    EquityFraction { fraction: f64 },
}

impl Default for SignalSizing {
    fn default() -> Self {
        SignalSizing::Units { quantity: 1.0 }
    }
}

/// Divisor used for variance in risk metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticsMode {
    /// Divide by n.
    #[default]
    Population,
    /// Divide by n - 1.
    Sample,
}

/// Complete static configuration of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// First date to replay (inclusive). `None` starts at the first bar.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    /// Last date to replay (inclusive). `None` runs to the last bar.
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    #[serde(default)]
    pub fee_maker_bps: f64,
    #[serde(default)]
    pub fee_taker_bps: f64,
    #[serde(default)]
    pub slippage_fixed_bps: f64,
    /// Price impact per unit of participation (`quantity / bar volume`).
    #[serde(default)]
    pub slippage_volume_impact: f64,
    #[serde(default)]
    pub margin_enabled: bool,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,
    /// Minimum equity as a fraction of gross exposure when margin is enabled.
    #[serde(default = "default_maintenance_margin")]
    pub maintenance_margin: f64,
    #[serde(default)]
    pub benchmark_symbol: Option<String>,
    /// Cap on fill quantity as a fraction of bar volume; remainder rests.
    #[serde(default)]
    pub max_participation: Option<f64>,
    /// Cancel orders still pending after being offered this many bars.
    #[serde(default)]
    pub order_max_age_bars: Option<u32>,
    /// Close all open positions at the final close when data runs out.
    #[serde(default = "default_true")]
    pub liquidate_on_finish: bool,
    /// Emit a periodic equity sample every N timestamps.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_bars: u32,
    #[serde(default)]
    pub signal_sizing: SignalSizing,
    /// Annual risk-free rate used by Sharpe and Sortino.
    #[serde(default)]
    pub risk_free_rate: f64,
    /// Overrides the timeframe's annualisation factor.
    #[serde(default)]
    pub periods_per_year: Option<f64>,
    #[serde(default)]
    pub statistics: StatisticsMode,
    /// Record `(timestamp, kind)` of every processed event.
    #[serde(default)]
    pub trace_events: bool,
}

fn default_max_leverage() -> f64 {
    1.0
}

fn default_maintenance_margin() -> f64 {
    0.25
}

fn default_true() -> bool {
    true
}

fn default_sample_interval() -> u32 {
    1
}

impl BacktestConfig {
    /// Frictionless daily config with defaults for everything optional.
    pub fn new(initial_capital: f64, symbols: Vec<String>) -> Self {
        Self {
            initial_capital,
            start_date: None,
            end_date: None,
            symbols,
            timeframe: Timeframe::Day1,
            fee_maker_bps: 0.0,
            fee_taker_bps: 0.0,
            slippage_fixed_bps: 0.0,
            slippage_volume_impact: 0.0,
            margin_enabled: false,
            max_leverage: default_max_leverage(),
            maintenance_margin: default_maintenance_margin(),
            benchmark_symbol: None,
            max_participation: None,
            order_max_age_bars: None,
            liquidate_on_finish: true,
            sample_interval_bars: default_sample_interval(),
            signal_sizing: SignalSizing::default(),
            risk_free_rate: 0.0,
            periods_per_year: None,
            statistics: StatisticsMode::Population,
            trace_events: false,
        }
    }

    /// Annualisation factor in effect for this run.
    pub fn annualization(&self) -> f64 {
        self.periods_per_year
            .unwrap_or_else(|| self.timeframe.periods_per_year())
    }

    /// Every symbol the run needs from the data set (traded + benchmark).
    pub fn required_symbols(&self) -> Vec<String> {
        let mut out = self.symbols.clone();
        if let Some(bench) = &self.benchmark_symbol {
            if !out.contains(bench) {
                out.push(bench.clone());
            }
        }
        out
    }

    /// Check every static parameter. Called once before a run starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(invalid(
                "initial_capital",
                format!("must be positive, got {}", self.initial_capital),
            ));
        }

        if self.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        let mut seen = BTreeSet::new();
        for sym in &self.symbols {
            if sym.trim().is_empty() {
                return Err(invalid("symbols", "empty symbol name"));
            }
            if !seen.insert(sym.as_str()) {
                return Err(ConfigError::DuplicateSymbol(sym.clone()));
            }
        }
        if let Some(bench) = &self.benchmark_symbol {
            if bench.trim().is_empty() {
                return Err(invalid("benchmark_symbol", "empty symbol name"));
            }
        }

        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(invalid(
                    "start_date",
                    format!("{start} is after end_date {end}"),
                ));
            }
        }

        non_negative("fee_maker_bps", self.fee_maker_bps)?;
        non_negative("fee_taker_bps", self.fee_taker_bps)?;
        non_negative("slippage_fixed_bps", self.slippage_fixed_bps)?;
        non_negative("slippage_volume_impact", self.slippage_volume_impact)?;
        if self.slippage_fixed_bps >= 10_000.0 {
            return Err(invalid("slippage_fixed_bps", "must be below 10000 bps"));
        }
        if self.slippage_volume_impact >= 1.0 {
            return Err(invalid("slippage_volume_impact", "must be below 1.0"));
        }

        if !self.max_leverage.is_finite() || self.max_leverage < 1.0 {
            return Err(invalid(
                "max_leverage",
                format!("must be at least 1.0, got {}", self.max_leverage),
            ));
        }
        if !(0.0..1.0).contains(&self.maintenance_margin) {
            return Err(invalid(
                "maintenance_margin",
                format!("must be in [0, 1), got {}", self.maintenance_margin),
            ));
        }

        if let Some(p) = self.max_participation {
            if !(p > 0.0 && p <= 1.0) {
                return Err(invalid(
                    "max_participation",
                    format!("must be in (0, 1], got {p}"),
                ));
            }
        }
        if self.order_max_age_bars == Some(0) {
            return Err(invalid("order_max_age_bars", "must be at least 1"));
        }
        if self.sample_interval_bars == 0 {
            return Err(invalid("sample_interval_bars", "must be at least 1"));
        }

        match self.signal_sizing {
            SignalSizing::Units { quantity } if !(quantity.is_finite() && quantity > 0.0) => {
                return Err(invalid("signal_sizing", "units quantity must be positive"));
            }
            SignalSizing::EquityFraction { fraction }
                if !(fraction.is_finite() && fraction > 0.0) =>
            {
                return Err(invalid("signal_sizing", "equity fraction must be positive"));
            }
            _ => {}
        }

        if !self.risk_free_rate.is_finite() {
            return Err(invalid("risk_free_rate", "must be finite"));
        }
        if let Some(ppy) = self.periods_per_year {
            if !(ppy.is_finite() && ppy > 0.0) {
                return Err(invalid("periods_per_year", "must be positive"));
            }
        }
        Ok(())
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(field, format!("must be >= 0, got {value}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BacktestConfig {
        BacktestConfig::new(100_000.0, vec!["SPY".into()])
    }

    #[test]
    fn default_config_is_valid() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rejects_non_positive_capital() {
        let mut c = base();
        c.initial_capital = 0.0;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Invalid { field: "initial_capital", .. })
        ));
    }

    #[test]
    fn rejects_empty_and_duplicate_symbols() {
        let mut c = base();
        c.symbols.clear();
        assert_eq!(c.validate(), Err(ConfigError::NoSymbols));

        let mut c = base();
        c.symbols.push("SPY".into());
        assert_eq!(c.validate(), Err(ConfigError::DuplicateSymbol("SPY".into())));
    }

    #[test]
    fn rejects_negative_fees_and_bad_leverage() {
        let mut c = base();
        c.fee_taker_bps = -1.0;
        assert!(c.validate().is_err());

        let mut c = base();
        c.max_leverage = 0.5;
        assert!(c.validate().is_err());

        let mut c = base();
        c.maintenance_margin = 1.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_inverted_dates() {
        let mut c = base();
        c.start_date = NaiveDate::from_ymd_opt(2024, 2, 1);
        c.end_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(matches!(
            c.validate(),
            Err(ConfigError::Invalid { field: "start_date", .. })
        ));
    }

    #[test]
    fn rejects_bad_participation_and_intervals() {
        let mut c = base();
        c.max_participation = Some(1.5);
        assert!(c.validate().is_err());

        let mut c = base();
        c.sample_interval_bars = 0;
        assert!(c.validate().is_err());

        let mut c = base();
        c.order_max_age_bars = Some(0);
        assert!(c.validate().is_err());
    }

    #[test]
    fn timeframe_parsing_and_annualization() {
        assert_eq!("1d".parse::<Timeframe>().unwrap(), Timeframe::Day1);
        assert_eq!("1H".parse::<Timeframe>().unwrap(), Timeframe::Hour1);
        assert!("3d".parse::<Timeframe>().is_err());
        assert_eq!(Timeframe::Day1.periods_per_year(), 252.0);
        assert_eq!(Timeframe::Week1.periods_per_year(), 52.0);
        assert_eq!(Timeframe::Hour1.periods_per_year(), 8760.0);
    }

    #[test]
    fn periods_override_wins() {
        let mut c = base();
        assert_eq!(c.annualization(), 252.0);
        c.periods_per_year = Some(365.0);
        assert_eq!(c.annualization(), 365.0);
    }

    #[test]
    fn required_symbols_include_benchmark_once() {
        let mut c = base();
        c.benchmark_symbol = Some("QQQ".into());
        assert_eq!(c.required_symbols(), vec!["SPY".to_string(), "QQQ".to_string()]);
        c.benchmark_symbol = Some("SPY".into());
        assert_eq!(c.required_symbols(), vec!["SPY".to_string()]);
    }

    #[test]
    fn deserializes_with_defaults() {
        let toml_like = serde_json::json!({
            "initial_capital": 50000.0,
            "symbols": ["SPY", "QQQ"],
            "timeframe": "1d",
            "fee_taker_bps": 10.0
        });
        let c: BacktestConfig = serde_json::from_value(toml_like).unwrap();
        assert_eq!(c.timeframe, Timeframe::Day1);
        assert!(c.liquidate_on_finish);
        assert_eq!(c.sample_interval_bars, 1);
        assert_eq!(c.max_leverage, 1.0);
        assert!(c.validate().is_ok());
    }
}
