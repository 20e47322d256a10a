//! Performance metrics: pure functions over the equity curve and trade log.
//!
//! The equity curve may hold several samples per timestamp (one per fill plus
//! the periodic sample); metrics use the last sample of each timestamp as the
//! period value. Returns are simple period-over-period returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use replaylab_core::domain::{EquityPoint, Trade};
use replaylab_core::{BacktestConfig, StatisticsMode};

/// Standard deviations below this are treated as zero.
const ZERO_VARIANCE: f64 = 1e-15;

/// Profit factor reported when there are winners and no losers.
pub const PROFIT_FACTOR_CAP: f64 = 100.0;

/// Tail size for VaR and CVaR, in percent.
const TAIL_PERCENT: usize = 5;

const SECONDS_PER_DAY: f64 = 86_400.0;
const DAYS_PER_YEAR: f64 = 365.25;

/// Annualisation and variance settings shared by the risk metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSettings {
    pub periods_per_year: f64,
    /// Annual risk-free rate; spread evenly over the periods of a year.
    pub risk_free_rate: f64,
    pub statistics: StatisticsMode,
}

impl MetricSettings {
    pub fn from_config(config: &BacktestConfig) -> Self {
        Self {
            periods_per_year: config.annualization(),
            risk_free_rate: config.risk_free_rate,
            statistics: config.statistics,
        }
    }
}

impl Default for MetricSettings {
    fn default() -> Self {
        Self {
            periods_per_year: 252.0,
            risk_free_rate: 0.0,
            statistics: StatisticsMode::Population,
        }
    }
}

/// Summary statistics of a finished run.
///
/// Ratios and returns are fractions (0.1 = 10%). Durations are in days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub cagr: f64,
    /// Annualised standard deviation of period returns.
    pub volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    /// Largest peak-to-trough decline as a fraction of the peak (>= 0).
    pub max_drawdown: f64,
    /// Largest peak-to-trough decline in currency.
    pub max_drawdown_value: f64,
    /// Peak to trough of the largest drawdown.
    pub max_drawdown_duration_days: f64,
    /// Longest stretch spent below a previous peak.
    pub longest_underwater_days: f64,
    /// Annualised OLS intercept against the benchmark, if one was configured.
    pub alpha: Option<f64>,
    pub beta: Option<f64>,
    /// Empirical 95% value at risk of one period, as a positive loss fraction.
    pub var_95: f64,
    /// Mean loss of the worst 5% of periods, as a positive fraction.
    pub cvar_95: f64,
    pub trade_count: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: f64,
    /// Mean PnL of losing trades (<= 0).
    pub avg_loss: f64,
    pub largest_win: f64,
    /// PnL of the worst trade (<= 0).
    pub largest_loss: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub avg_holding_days: f64,
    pub total_fees: f64,
    /// Number of equity periods the statistics were computed over.
    pub periods: usize,
}

impl PerformanceMetrics {
    /// Compute every metric.
    ///
    /// `benchmark`, when given, holds one benchmark price per period of
    /// [`period_samples`]`(equity_curve)`; any other length is ignored.
    pub fn compute(
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        benchmark: Option<&[f64]>,
        total_fees: f64,
        settings: &MetricSettings,
    ) -> Self {
        let samples = period_samples(equity_curve);
        let values: Vec<f64> = samples.iter().map(|p| p.equity).collect();
        let returns = period_returns(&values);
        let ppy = settings.periods_per_year;
        let mode = settings.statistics;

        let cagr = cagr(&samples);
        let dd = drawdown_profile(&samples);

        let (alpha, beta) = match benchmark {
            Some(prices) if prices.len() == values.len() => {
                match alpha_beta(&returns, &period_returns(prices), ppy, mode) {
                    Some((a, b)) => (Some(a), Some(b)),
                    None => (None, None),
                }
            }
            _ => (None, None),
        };

        let winners: Vec<f64> = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
        let losers: Vec<f64> = trades.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl).collect();

        Self {
            total_return: total_return(&values),
            cagr,
            volatility: volatility(&returns, ppy, mode),
            sharpe: sharpe_ratio(&returns, settings.risk_free_rate, ppy, mode),
            sortino: sortino_ratio(&returns, settings.risk_free_rate, ppy, mode),
            calmar: calmar_ratio(cagr, dd.max_drawdown),
            max_drawdown: dd.max_drawdown,
            max_drawdown_value: dd.max_drawdown_value,
            max_drawdown_duration_days: dd.max_drawdown_duration_days,
            longest_underwater_days: dd.longest_underwater_days,
            alpha,
            beta,
            var_95: value_at_risk(&returns),
            cvar_95: conditional_value_at_risk(&returns),
            trade_count: trades.len(),
            winning_trades: winners.len(),
            losing_trades: losers.len(),
            win_rate: win_rate(trades),
            profit_factor: profit_factor(trades),
            avg_win: mean(&winners),
            avg_loss: mean(&losers),
            largest_win: winners.iter().copied().fold(0.0, f64::max),
            largest_loss: losers.iter().copied().fold(0.0, f64::min),
            max_consecutive_wins: max_consecutive(trades, true),
            max_consecutive_losses: max_consecutive(trades, false),
            avg_holding_days: avg_holding_days(trades),
            total_fees,
            periods: samples.len(),
        }
    }
}

// ─── Period series ──────────────────────────────────────────────────

/// Last equity sample of each timestamp, in time order.
pub fn period_samples(equity_curve: &[EquityPoint]) -> Vec<EquityPoint> {
    let mut out: Vec<EquityPoint> = Vec::with_capacity(equity_curve.len());
    for point in equity_curve {
        match out.last_mut() {
            Some(last) if last.timestamp == point.timestamp => *last = *point,
            _ => out.push(*point),
        }
    }
    out
}

/// Simple returns between consecutive values. A non-positive base yields 0.
pub fn period_returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

// ─── Return and risk ────────────────────────────────────────────────

/// Total return: (final / initial) - 1.
pub fn total_return(values: &[f64]) -> f64 {
    match (values.first(), values.last()) {
        (Some(&first), Some(&last)) if values.len() >= 2 && first > 0.0 => last / first - 1.0,
        _ => 0.0,
    }
}

/// Compound annual growth rate over elapsed calendar time.
pub fn cagr(samples: &[EquityPoint]) -> f64 {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return 0.0;
    };
    let years = elapsed_days(first.timestamp, last.timestamp) / DAYS_PER_YEAR;
    if years <= 0.0 || first.equity <= 0.0 {
        return 0.0;
    }
    if last.equity <= 0.0 {
        return -1.0;
    }
    (last.equity / first.equity).powf(1.0 / years) - 1.0
}

/// Annualised standard deviation of returns.
pub fn volatility(returns: &[f64], periods_per_year: f64, mode: StatisticsMode) -> f64 {
    std_dev(returns, mode) * periods_per_year.sqrt()
}

/// Annualised Sharpe ratio of excess returns. Zero variance yields 0.
pub fn sharpe_ratio(
    returns: &[f64],
    risk_free_rate: f64,
    periods_per_year: f64,
    mode: StatisticsMode,
) -> f64 {
    let excess = excess_returns(returns, risk_free_rate, periods_per_year);
    let std = std_dev(&excess, mode);
    if std < ZERO_VARIANCE {
        return 0.0;
    }
    mean(&excess) / std * periods_per_year.sqrt()
}

/// Annualised Sortino ratio: mean excess return over downside deviation.
///
/// Downside deviation counts every period, with non-negative excess returns
/// contributing zero. No downside yields 0.
pub fn sortino_ratio(
    returns: &[f64],
    risk_free_rate: f64,
    periods_per_year: f64,
    mode: StatisticsMode,
) -> f64 {
    let excess = excess_returns(returns, risk_free_rate, periods_per_year);
    let Some(denom) = divisor(excess.len(), mode) else {
        return 0.0;
    };
    let downside = (excess.iter().map(|r| r.min(0.0).powi(2)).sum::<f64>() / denom).sqrt();
    if downside < ZERO_VARIANCE {
        return 0.0;
    }
    mean(&excess) / downside * periods_per_year.sqrt()
}

/// CAGR / max drawdown. No drawdown yields 0.
pub fn calmar_ratio(cagr: f64, max_drawdown: f64) -> f64 {
    if max_drawdown < ZERO_VARIANCE {
        return 0.0;
    }
    cagr / max_drawdown
}

/// Drawdown statistics of an equity series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrawdownProfile {
    pub max_drawdown: f64,
    pub max_drawdown_value: f64,
    pub max_drawdown_duration_days: f64,
    pub longest_underwater_days: f64,
}

/// Walk the series once, tracking the running peak.
pub fn drawdown_profile(samples: &[EquityPoint]) -> DrawdownProfile {
    let mut profile = DrawdownProfile::default();
    let Some(first) = samples.first() else {
        return profile;
    };
    let mut peak = first.equity;
    let mut peak_time = first.timestamp;

    for point in samples {
        if point.equity >= peak {
            peak = point.equity;
            peak_time = point.timestamp;
            continue;
        }
        let value = peak - point.equity;
        let fraction = if peak > 0.0 { value / peak } else { 0.0 };
        if fraction > profile.max_drawdown {
            profile.max_drawdown = fraction;
            profile.max_drawdown_value = value;
            profile.max_drawdown_duration_days = elapsed_days(peak_time, point.timestamp);
        }
    }

    profile.longest_underwater_days = longest_underwater(samples);
    profile
}

/// Longest time from a peak until equity is back at or above it (or the
/// series ends).
fn longest_underwater(samples: &[EquityPoint]) -> f64 {
    let mut longest = 0.0_f64;
    let Some(first) = samples.first() else {
        return longest;
    };
    let mut peak = first.equity;
    let mut peak_time = first.timestamp;
    let mut below = false;

    for point in samples {
        if point.equity >= peak {
            if below {
                longest = longest.max(elapsed_days(peak_time, point.timestamp));
                below = false;
            }
            peak = point.equity;
            peak_time = point.timestamp;
        } else {
            below = true;
        }
    }
    if below {
        if let Some(last) = samples.last() {
            longest = longest.max(elapsed_days(peak_time, last.timestamp));
        }
    }
    longest
}

/// OLS of strategy returns on benchmark returns: `(annualised alpha, beta)`.
///
/// `None` with fewer than two paired returns or a constant benchmark.
pub fn alpha_beta(
    returns: &[f64],
    benchmark_returns: &[f64],
    periods_per_year: f64,
    mode: StatisticsMode,
) -> Option<(f64, f64)> {
    let n = returns.len().min(benchmark_returns.len());
    if n < 2 {
        return None;
    }
    let (r, b) = (&returns[..n], &benchmark_returns[..n]);
    let denom = divisor(n, mode)?;
    let (mean_r, mean_b) = (mean(r), mean(b));
    let cov = r
        .iter()
        .zip(b)
        .map(|(x, y)| (x - mean_r) * (y - mean_b))
        .sum::<f64>()
        / denom;
    let var_b = b.iter().map(|y| (y - mean_b).powi(2)).sum::<f64>() / denom;
    if var_b < ZERO_VARIANCE * ZERO_VARIANCE {
        return None;
    }
    let beta = cov / var_b;
    let alpha = (mean_r - beta * mean_b) * periods_per_year;
    Some((alpha, beta))
}

/// Empirical 95% VaR: the 5th-percentile return, reported as a positive
/// loss. No losses in the tail yields 0.
pub fn value_at_risk(returns: &[f64]) -> f64 {
    let sorted = sorted_returns(returns);
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = tail_count(sorted.len()) - 1;
    (-sorted[idx]).max(0.0)
}

/// Empirical 95% CVaR: mean of the worst 5% of returns as a positive loss.
pub fn conditional_value_at_risk(returns: &[f64]) -> f64 {
    let sorted = sorted_returns(returns);
    if sorted.is_empty() {
        return 0.0;
    }
    let tail = &sorted[..tail_count(sorted.len())];
    (-mean(tail)).max(0.0)
}

// ─── Trade statistics ───────────────────────────────────────────────

/// Fraction of trades with positive PnL.
pub fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64
}

/// Gross profit / gross loss, capped at [`PROFIT_FACTOR_CAP`].
pub fn profit_factor(trades: &[Trade]) -> f64 {
    let profit: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let loss: f64 = trades.iter().filter(|t| t.pnl < 0.0).map(|t| -t.pnl).sum();
    if loss <= 0.0 {
        return if profit > 0.0 { PROFIT_FACTOR_CAP } else { 0.0 };
    }
    (profit / loss).min(PROFIT_FACTOR_CAP)
}

/// Longest run of winners (`winners = true`) or losers. Break-even trades
/// end both kinds of run.
pub fn max_consecutive(trades: &[Trade], winners: bool) -> usize {
    let mut best = 0;
    let mut current = 0;
    for trade in trades {
        let hit = if winners { trade.pnl > 0.0 } else { trade.pnl < 0.0 };
        if hit {
            current += 1;
            best = best.max(current);
        } else {
            current = 0;
        }
    }
    best
}

/// Mean entry-to-exit time in days.
pub fn avg_holding_days(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let total: f64 = trades
        .iter()
        .map(|t| t.holding_time().num_seconds() as f64 / SECONDS_PER_DAY)
        .sum();
    total / trades.len() as f64
}

// ─── Helpers ────────────────────────────────────────────────────────

fn elapsed_days(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_seconds() as f64 / SECONDS_PER_DAY
}

fn excess_returns(returns: &[f64], risk_free_rate: f64, periods_per_year: f64) -> Vec<f64> {
    let per_period = if periods_per_year > 0.0 {
        risk_free_rate / periods_per_year
    } else {
        0.0
    };
    returns.iter().map(|r| r - per_period).collect()
}

fn divisor(n: usize, mode: StatisticsMode) -> Option<f64> {
    match mode {
        StatisticsMode::Population if n >= 1 => Some(n as f64),
        StatisticsMode::Sample if n >= 2 => Some((n - 1) as f64),
        _ => None,
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64], mode: StatisticsMode) -> f64 {
    let Some(denom) = divisor(values.len(), mode) else {
        return 0.0;
    };
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / denom).sqrt()
}

fn sorted_returns(returns: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = returns.iter().copied().filter(|r| r.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

fn tail_count(n: usize) -> usize {
    ((n * TAIL_PERCENT).div_ceil(100)).clamp(1, n)
}
