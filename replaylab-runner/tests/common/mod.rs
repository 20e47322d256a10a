#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use replaylab_core::domain::Bar;
use replaylab_core::{BacktestConfig, MarketDataSet, SignalSizing};

pub fn day(i: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i)
}

/// Bars whose open is the previous close.
pub fn chained(symbol: &str, closes: &[f64]) -> Vec<Bar> {
    let mut prev = closes[0];
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = prev;
            prev = close;
            Bar {
                symbol: symbol.into(),
                timestamp: day(i as i64),
                open,
                high: open.max(close) + 0.5,
                low: open.min(close) - 0.5,
                close,
                volume: 1_000_000.0,
            }
        })
        .collect()
}

/// Oscillating closes with drift: enough crossovers to produce trades.
pub fn wave(symbol: &str, n: usize) -> Vec<Bar> {
    let closes: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64;
            100.0 + 10.0 * (x / 5.0).sin() + 0.05 * x
        })
        .collect();
    chained(symbol, &closes)
}

pub fn wave_data() -> MarketDataSet {
    MarketDataSet::from_bars(wave("SPY", 120)).unwrap()
}

pub fn config() -> BacktestConfig {
    let mut cfg = BacktestConfig::new(100_000.0, vec!["SPY".into()]);
    cfg.signal_sizing = SignalSizing::Units { quantity: 10.0 };
    cfg.fee_taker_bps = 1.0;
    cfg
}
