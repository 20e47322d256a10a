mod common;

use common::{chained, config, day, wave_data};
use replaylab_core::domain::OrderOrigin;
use replaylab_core::engine::Idle;
use replaylab_core::{MarketDataSet, SignalSizing};
use replaylab_runner::{build_strategy, run_backtest, BuyAndHold, ParamSet, ParamValue};

#[test]
fn rising_series_pays_price_move_minus_fees() {
    let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64 * 10.0 / 9.0).collect();
    let data = MarketDataSet::from_bars(chained("SPY", &closes)).unwrap();
    let mut cfg = config();
    cfg.fee_taker_bps = 10.0;
    cfg.signal_sizing = SignalSizing::Units { quantity: 50.0 };

    let result = run_backtest(&cfg, &data, &mut BuyAndHold::default()).unwrap();

    // Entry at the second bar's open (100), liquidation at the final close.
    let fees = 50.0 * 100.0 * 0.001 + 50.0 * 110.0 * 0.001;
    let expected = 100_000.0 + (110.0 - 100.0) * 50.0 - fees;
    assert!((result.final_equity - expected).abs() < 1e-6);
    assert!((result.final_cash - expected).abs() < 1e-6);
    assert_eq!(result.trades.len(), 1);
    assert!((result.metrics.total_fees - fees).abs() < 1e-9);
    assert!((result.metrics.total_return - (expected / 100_000.0 - 1.0)).abs() < 1e-12);
    assert!(result.open_positions.is_empty());
    assert_eq!(result.end, Some(day(10)));
    assert!(result
        .orders
        .iter()
        .any(|o| o.origin == OrderOrigin::Liquidation));
}

#[test]
fn identical_inputs_serialize_identically() {
    let data = wave_data();
    let params: ParamSet = [
        ("fast".to_string(), ParamValue::Int(3)),
        ("slow".to_string(), ParamValue::Int(8)),
    ]
    .into_iter()
    .collect();

    let mut first = build_strategy("ma_crossover", &params).unwrap();
    let mut second = build_strategy("ma_crossover", &params).unwrap();
    let a = run_backtest(&config(), &data, &mut *first).unwrap();
    let b = run_backtest(&config(), &data, &mut *second).unwrap();

    assert!(a.metrics.trade_count > 2);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[test]
fn equity_samples_match_cash_plus_positions() {
    let data = wave_data();
    let mut strategy = build_strategy("ma_crossover", &ParamSet::new()).unwrap();
    let result = run_backtest(&config(), &data, &mut *strategy).unwrap();

    // Replaying the fills reproduces the final cash.
    let cash = result
        .fills
        .iter()
        .fold(result.initial_capital, |c, f| c + f.cash_delta());
    assert!((cash - result.final_cash).abs() < 1e-6);
    let last = result.equity_curve.last().unwrap();
    assert!((last.equity - result.final_equity).abs() < 1e-6 * result.final_equity);
}

#[test]
fn trades_reconcile_with_final_equity_after_liquidation() {
    let data = wave_data();
    let mut strategy = build_strategy("ma_crossover", &ParamSet::new()).unwrap();
    let result = run_backtest(&config(), &data, &mut *strategy).unwrap();
    let pnl: f64 = result.trades.iter().map(|t| t.pnl).sum();
    assert!((result.initial_capital + pnl - result.final_equity).abs() < 1e-6);
}

#[test]
fn benchmark_gives_alpha_and_beta() {
    let mut bars = common::wave("SPY", 60);
    bars.extend(common::wave("QQQ", 60));
    let data = MarketDataSet::from_bars(bars).unwrap();
    let mut cfg = config();
    cfg.benchmark_symbol = Some("QQQ".into());
    cfg.fee_taker_bps = 0.0;

    let result = run_backtest(&cfg, &data, &mut BuyAndHold::default()).unwrap();
    let beta = result.metrics.beta.unwrap();
    // Ten units of a ~100 price on 100k capital: about 1% of the benchmark.
    assert!(beta > 0.0 && beta < 0.05, "beta = {beta}");
    assert!(result.metrics.alpha.is_some());
    assert_eq!(
        result.benchmark_curve.as_ref().map(Vec::len),
        Some(result.metrics.periods)
    );
}

#[test]
fn idle_strategy_has_flat_metrics() {
    let result = run_backtest(&config(), &wave_data(), &mut Idle).unwrap();
    let m = &result.metrics;
    assert_eq!(m.total_return, 0.0);
    assert_eq!(m.max_drawdown, 0.0);
    assert_eq!(m.sharpe, 0.0);
    assert_eq!(m.trade_count, 0);
    assert_eq!(m.periods, 120);
}
