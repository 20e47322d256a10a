//! End-to-end engine scenarios on synthetic data.

use chrono::{DateTime, Duration, TimeZone, Utc};
use replaylab_core::domain::{Bar, OrderOrigin, OrderRequest, OrderSide, OrderStatus};
use replaylab_core::engine::{Idle, Intent, StrategyContext, StrategyError};
use replaylab_core::{BacktestConfig, Engine, EngineError, MarketDataSet, SignalSizing};

fn day(i: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i)
}

/// Bars whose open is the previous close, so next-bar-open fills land on
/// known prices.
fn chained(symbol: &str, closes: &[f64]) -> Vec<Bar> {
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
                high: open.max(close),
                low: open.min(close),
                close,
                volume: 1_000_000.0,
            }
        })
        .collect()
}

fn config() -> BacktestConfig {
    BacktestConfig::new(100_000.0, vec!["SPY".into()])
}

type Step = fn(&StrategyContext<'_>) -> Vec<Intent>;

fn run(cfg: BacktestConfig, bars: Vec<Bar>, f: Step) -> replaylab_core::RunOutput {
    let data = MarketDataSet::from_bars(bars).unwrap();
    let mut strat = move |ctx: &StrategyContext<'_>| Ok::<_, StrategyError>(f(ctx));
    Engine::new(cfg).unwrap().run(&data, &mut strat).unwrap()
}

#[test]
fn flat_series_round_trip_has_zero_pnl() {
    let out = run(config(), chained("SPY", &[100.0; 10]), |ctx| match ctx.step {
        0 => vec![Intent::buy("SPY", 1.0)],
        8 => vec![Intent::sell("SPY", 1.0)],
        _ => vec![],
    });
    assert_eq!(out.final_equity, 100_000.0);
    assert_eq!(out.portfolio.trades.len(), 1);
    assert_eq!(out.portfolio.trades[0].pnl, 0.0);
    for point in &out.portfolio.equity_curve {
        assert_eq!(point.equity, 100_000.0);
    }
}

#[test]
fn rising_series_with_taker_fee() {
    let closes: Vec<f64> = (0..10).map(|i| 100.0 + 10.0 * i as f64 / 9.0).collect();
    let mut cfg = config();
    cfg.fee_taker_bps = 10.0;
    let qty = 50.0;
    let data = MarketDataSet::from_bars(chained("SPY", &closes)).unwrap();
    let mut strat = move |ctx: &StrategyContext<'_>| {
        Ok::<_, StrategyError>(if ctx.step == 0 { vec![Intent::buy("SPY", qty)] } else { vec![] })
    };
    let out = Engine::new(cfg).unwrap().run(&data, &mut strat).unwrap();

    let fees = 0.001 * 100.0 * qty + 0.001 * 110.0 * qty;
    let expected = 100_000.0 + (110.0 - 100.0) * qty - fees;
    assert!((out.final_equity - expected).abs() < 1e-6, "{} vs {expected}", out.final_equity);
    assert!((out.portfolio.total_fees - fees).abs() < 1e-9);
    assert_eq!(out.portfolio.trades.len(), 1);
    assert!((out.portfolio.trades[0].pnl - (10.0 * qty - fees)).abs() < 1e-6);
}

#[test]
fn market_orders_never_fill_on_their_own_bar() {
    let closes = [100.0, 102.0, 98.0, 105.0, 101.0, 99.0];
    let out = run(config(), chained("SPY", &closes), |ctx| {
        if ctx.step % 2 == 0 {
            vec![Intent::buy("SPY", 1.0)]
        } else {
            vec![Intent::sell("SPY", 1.0)]
        }
    });
    for fill in &out.fills {
        let order = out.orders.iter().find(|o| o.id == fill.order_id).unwrap();
        assert!(fill.timestamp > order.submitted_at);
    }
}

#[test]
fn limit_order_waits_for_price_and_fills_as_maker() {
    let mut cfg = config();
    cfg.fee_maker_bps = 1.0;
    cfg.fee_taker_bps = 10.0;
    cfg.liquidate_on_finish = false;
    let out = run(cfg, chained("SPY", &[100.0, 99.0, 97.0, 94.0, 96.0]), |ctx| {
        if ctx.step == 0 {
            vec![Intent::Order(OrderRequest::limit("SPY", OrderSide::Buy, 10.0, 95.0))]
        } else {
            vec![]
        }
    });
    assert_eq!(out.fills.len(), 1);
    let fill = &out.fills[0];
    assert_eq!(fill.timestamp, day(3));
    assert_eq!(fill.fill_price, 95.0);
    assert!((fill.fee - 95.0 * 10.0 * 1e-4).abs() < 1e-12);
}

#[test]
fn stop_loss_triggers_intrabar() {
    let mut cfg = config();
    cfg.liquidate_on_finish = false;
    let out = run(cfg, chained("SPY", &[100.0, 100.0, 98.0, 90.0, 91.0]), |ctx| match ctx.step {
        0 => vec![Intent::buy("SPY", 10.0)],
        1 => vec![Intent::Order(OrderRequest::stop("SPY", OrderSide::Sell, 10.0, 95.0))],
        _ => vec![],
    });
    assert_eq!(out.fills.len(), 2);
    // Bar 3 opens at 98 and trades down to 90: stop fills at 95.
    assert_eq!(out.fills[1].timestamp, day(3));
    assert_eq!(out.fills[1].fill_price, 95.0);
    assert!(!out.portfolio.has_position("SPY"));
}

#[test]
fn participation_cap_splits_order_across_bars() {
    let mut bars = chained("SPY", &[100.0; 6]);
    for bar in &mut bars {
        bar.volume = 100.0;
    }
    let mut cfg = config();
    cfg.max_participation = Some(0.1);
    cfg.liquidate_on_finish = false;
    let out = run(cfg, bars, |ctx| {
        if ctx.step == 0 {
            vec![Intent::buy("SPY", 25.0)]
        } else {
            vec![]
        }
    });
    let quantities: Vec<f64> = out.fills.iter().map(|f| f.fill_quantity).collect();
    assert_eq!(quantities, vec![10.0, 10.0, 5.0]);
    assert!(out.fills.iter().all(|f| f.order_id == out.fills[0].order_id));
    assert_eq!(out.diagnostics.partial_fills, 2);
    assert_eq!(out.orders[0].status, OrderStatus::Filled);
}

#[test]
fn cash_account_rejects_oversized_buy() {
    let out = run(config(), chained("SPY", &[100.0; 4]), |ctx| {
        if ctx.step == 0 {
            vec![Intent::buy("SPY", 2_000.0)]
        } else {
            vec![]
        }
    });
    assert!(out.fills.is_empty());
    assert!(matches!(out.orders[0].status, OrderStatus::Rejected { .. }));
    assert_eq!(out.diagnostics.orders_rejected, 1);
    assert!(out.portfolio.cash >= 0.0);
}

#[test]
fn margin_allows_leverage_up_to_cap() {
    let mut cfg = config();
    cfg.margin_enabled = true;
    cfg.max_leverage = 2.0;
    let bars = chained("SPY", &[100.0; 5]);
    let data = MarketDataSet::from_bars(bars).unwrap();

    let mut ok = |ctx: &StrategyContext<'_>| {
        Ok::<_, StrategyError>(if ctx.step == 0 { vec![Intent::buy("SPY", 1_500.0)] } else { vec![] })
    };
    let out = Engine::new(cfg.clone()).unwrap().run(&data, &mut ok).unwrap();
    assert_eq!(out.fills.len(), 2, "entry plus liquidation");
    assert!(out.portfolio.equity_curve.iter().any(|p| p.cash < 0.0));

    let mut too_big = |ctx: &StrategyContext<'_>| {
        Ok::<_, StrategyError>(if ctx.step == 0 { vec![Intent::buy("SPY", 2_500.0)] } else { vec![] })
    };
    let out = Engine::new(cfg).unwrap().run(&data, &mut too_big).unwrap();
    assert!(out.fills.is_empty());
}

#[test]
fn signals_target_positions() {
    let mut cfg = config();
    cfg.signal_sizing = SignalSizing::Units { quantity: 10.0 };
    cfg.liquidate_on_finish = false;
    let out = run(cfg, chained("SPY", &[100.0; 6]), |ctx| match ctx.step {
        0 | 1 => vec![Intent::long("SPY")],
        2 => vec![Intent::short("SPY")],
        3 => vec![Intent::flat("SPY")],
        _ => vec![],
    });
    // The second long finds the position already at target.
    let signal_orders: Vec<(OrderSide, f64)> = out
        .orders
        .iter()
        .filter(|o| o.origin == OrderOrigin::Signal)
        .map(|o| (o.side, o.quantity))
        .collect();
    assert_eq!(
        signal_orders,
        vec![(OrderSide::Buy, 10.0), (OrderSide::Sell, 20.0), (OrderSide::Buy, 10.0)]
    );
    assert!(!out.portfolio.has_position("SPY"));
    assert_eq!(out.portfolio.trades.len(), 2);
}

#[test]
fn aged_orders_expire() {
    let mut cfg = config();
    cfg.order_max_age_bars = Some(2);
    let out = run(cfg, chained("SPY", &[100.0; 6]), |ctx| {
        if ctx.step == 0 {
            vec![Intent::Order(OrderRequest::limit("SPY", OrderSide::Buy, 1.0, 50.0))]
        } else {
            vec![]
        }
    });
    assert_eq!(out.diagnostics.orders_expired, 1);
    let cancelled_at = out
        .audit_trail
        .iter()
        .find(|e| matches!(e.to_status, OrderStatus::Cancelled { .. }))
        .map(|e| e.timestamp);
    assert_eq!(cancelled_at, Some(day(2)));
}

#[test]
fn strategy_cancel_of_unknown_order_is_a_warning() {
    let out = run(config(), chained("SPY", &[100.0; 3]), |ctx| {
        if ctx.step == 0 {
            vec![Intent::Cancel(replaylab_core::domain::OrderId(99))]
        } else {
            vec![]
        }
    });
    assert_eq!(out.diagnostics.warnings.len(), 1);
}

#[test]
fn strategy_cancels_a_resting_limit() {
    // The drop on the last bars would have filled the limit had it stayed.
    let out = run(config(), chained("SPY", &[100.0, 100.0, 100.0, 100.0, 40.0, 40.0]), |ctx| {
        match ctx.step {
            0 => vec![Intent::Order(OrderRequest::limit("SPY", OrderSide::Buy, 1.0, 50.0))],
            2 => ctx.open_orders.iter().map(|o| Intent::Cancel(o.id)).collect(),
            _ => vec![],
        }
    });
    assert_eq!(
        out.orders[0].status,
        OrderStatus::Cancelled {
            reason: "cancelled by strategy".into()
        }
    );
    assert_eq!(out.diagnostics.orders_cancelled, 1);
    assert!(out.fills.is_empty());
    assert!(out.diagnostics.warnings.is_empty());
}

#[test]
fn covering_a_short_after_a_gap_is_not_rejected() {
    let mut cfg = BacktestConfig::new(10_000.0, vec!["SPY".into()]);
    cfg.liquidate_on_finish = false;
    // Short 100 at 100, then the market gaps from a close of 100 to an open of 150.
    let mut bars = chained("SPY", &[100.0; 6]);
    for bar in &mut bars[4..] {
        bar.open = 150.0;
        bar.high = 150.0;
        bar.low = 150.0;
        bar.close = 150.0;
    }
    let out = run(cfg, bars, |ctx| {
        match ctx.step {
            0 => vec![Intent::sell("SPY", 100.0)],
            3 => vec![Intent::buy("SPY", 10.0)],
            _ => vec![],
        }
    });
    assert_eq!(out.diagnostics.orders_rejected, 0);
    assert_eq!(out.orders[1].side, OrderSide::Buy);
    assert_eq!(out.orders[1].status, OrderStatus::Filled);
    assert_eq!(out.fills[1].fill_price, 150.0);
    assert_eq!(out.portfolio.quantity("SPY"), -90.0);
}

#[test]
fn multi_symbol_bars_share_timestamps() {
    let mut bars = chained("SPY", &[100.0, 101.0, 102.0]);
    let mut qqq = chained("QQQ", &[50.0, 51.0, 52.0]);
    qqq.remove(1);
    bars.extend(qqq);
    let mut cfg = BacktestConfig::new(100_000.0, vec!["SPY".into(), "QQQ".into()]);
    cfg.trace_events = true;
    let data = MarketDataSet::from_bars(bars).unwrap();
    let mut seen = Vec::new();
    let mut strat = |ctx: &StrategyContext<'_>| {
        seen.push(ctx.bars.iter().map(|b| b.symbol.clone()).collect::<Vec<_>>());
        Ok::<_, StrategyError>(vec![])
    };
    Engine::new(cfg).unwrap().run(&data, &mut strat).unwrap();
    assert_eq!(
        seen,
        vec![
            vec!["SPY".to_string(), "QQQ".to_string()],
            vec!["SPY".to_string()],
            vec!["SPY".to_string(), "QQQ".to_string()],
        ]
    );
}

#[test]
fn missing_benchmark_is_fatal_before_the_loop() {
    let data = MarketDataSet::from_bars(chained("SPY", &[100.0; 3])).unwrap();
    let mut cfg = config();
    cfg.benchmark_symbol = Some("IWM".into());
    let err = Engine::new(cfg).unwrap().run(&data, &mut Idle).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}

#[test]
fn empty_date_range_is_a_data_error() {
    let data = MarketDataSet::from_bars(chained("SPY", &[100.0; 3])).unwrap();
    let mut cfg = config();
    cfg.start_date = chrono::NaiveDate::from_ymd_opt(2025, 1, 1);
    let err = Engine::new(cfg).unwrap().run(&data, &mut Idle).unwrap_err();
    assert!(matches!(err, EngineError::Data(_)));
}

#[test]
fn sample_interval_thins_the_curve_but_keeps_the_end() {
    let mut cfg = config();
    cfg.sample_interval_bars = 4;
    let out = run(cfg, chained("SPY", &[100.0; 10]), |_| vec![]);
    let stamps: Vec<_> = out.portfolio.equity_curve.iter().map(|p| p.timestamp).collect();
    assert_eq!(stamps, vec![day(0), day(4), day(8), day(9)]);
}
