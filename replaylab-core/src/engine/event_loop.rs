//! Event loop: replays a market data set through a strategy.
//!
//! Per timestamp T:
//! 1. MarketData(T) events: pending orders submitted before T are offered to
//!    the brokerage bar by bar; fills settle into the portfolio and are queued
//!    as Fill(T). The mark becomes the bar close.
//! 2. Orders offered on too many bars expire.
//! 3. The strategy sees the bars at T and the settled account; its intents
//!    become Signal(T) and Order(T) events or immediate cancellations.
//! 4. The queue drains in `(timestamp, rank, seq)` order: signals are sized
//!    into orders, orders are validated, fills are logged and emit
//!    PortfolioUpdate(T), portfolio updates append equity samples.
//!
//! After the last timestamp, live orders are cancelled and (optionally) open
//! positions are settled at the final close one timeframe later.

use super::accounting::apply_fill;
use super::cancel::CancelToken;
use super::queue::EventQueue;
use super::sizing::{size_signal, SignalDrop};
use super::state::{EngineError, RunDiagnostics, RunOutput, TraceEntry};
use super::strategy::{Intent, Strategy, StrategyContext};
use crate::config::{BacktestConfig, ConfigError};
use crate::data::{DataError, DataFeed, MarketDataSet, TimeStep};
use crate::domain::{
    Bar, EquityPoint, Event, EventKind, Fill, Liquidity, Marks, OrderId, OrderOrigin,
    OrderRequest, OrderSide, OrderStatus, Portfolio, RunId, Signal,
};
use crate::execution::{AccountProjection, Brokerage, Execution};
use crate::orders::OrderManager;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// One backtest configuration, ready to run against any data set.
#[derive(Debug, Clone)]
pub struct Engine {
    config: BacktestConfig,
    cancel: Option<CancelToken>,
}

impl Engine {
    /// Validate `config` and build an engine.
    pub fn new(config: BacktestConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: None,
        })
    }

    /// Stop cooperatively when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Replay `data` through `strategy`.
    pub fn run<S>(&self, data: &MarketDataSet, strategy: &mut S) -> Result<RunOutput, EngineError>
    where
        S: Strategy + ?Sized,
    {
        check_symbols(&self.config, data)?;
        let run_id = RunId::derive(&self.config, data.hash());
        let span = tracing::info_span!("run", run_id = run_id.short());
        let _enter = span.enter();

        let feed = DataFeed::new(
            data,
            &self.config.symbols,
            self.config.start_date,
            self.config.end_date,
        )?;
        tracing::info!(
            symbols = self.config.symbols.len(),
            bars = feed.remaining_bars(),
            "backtest started"
        );

        let mut sim = Simulation::new(&self.config);
        sim.diagnostics.rows_skipped = self
            .config
            .symbols
            .iter()
            .map(|s| data.report().skipped_for(s))
            .sum();

        let mut last_ts = None;
        for (step, time_step) in feed.enumerate() {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                tracing::info!(at = %time_step.timestamp, "run cancelled");
                return Err(EngineError::Cancelled(time_step.timestamp));
            }
            sim.step(step, &time_step, strategy)?;
            last_ts = Some(time_step.timestamp);
        }
        // The feed always yields at least one step for a non-empty range.
        if let Some(ts) = last_ts {
            sim.finish(ts)?;
        }

        let final_equity = sim.portfolio.equity(&sim.marks);
        tracing::info!(
            steps = sim.diagnostics.steps,
            fills = sim.fills.len(),
            trades = sim.portfolio.trades.len(),
            final_equity,
            "backtest finished"
        );

        let (orders, audit_trail) = sim.orders.into_parts();
        Ok(RunOutput {
            config: self.config.clone(),
            run_id,
            dataset_hash: data.hash().clone(),
            portfolio: sim.portfolio,
            orders,
            audit_trail,
            fills: sim.fills,
            marks: sim.marks,
            diagnostics: sim.diagnostics,
            trace: sim.trace,
            final_equity,
        })
    }
}

/// Every traded symbol and the benchmark must be in the data set.
fn check_symbols(config: &BacktestConfig, data: &MarketDataSet) -> Result<(), EngineError> {
    for symbol in &config.symbols {
        if !data.contains(symbol) {
            return Err(missing_symbol(data, symbol, ConfigError::UnknownSymbol(symbol.clone())));
        }
    }
    if let Some(bench) = &config.benchmark_symbol {
        if !data.contains(bench) {
            return Err(missing_symbol(data, bench, ConfigError::UnknownBenchmark(bench.clone())));
        }
    }
    Ok(())
}

/// A symbol that was read but lost every row is a data problem, not a
/// config problem.
fn missing_symbol(data: &MarketDataSet, symbol: &str, otherwise: ConfigError) -> EngineError {
    if data.report().symbols.contains_key(symbol) {
        DataError::NoValidRows {
            symbol: symbol.to_string(),
            skipped: data.report().skipped_for(symbol),
        }
        .into()
    } else {
        otherwise.into()
    }
}

/// Mutable state of one run.
struct Simulation<'c> {
    config: &'c BacktestConfig,
    brokerage: Brokerage,
    known_symbols: BTreeSet<String>,
    queue: EventQueue,
    orders: OrderManager,
    portfolio: Portfolio,
    marks: Marks,
    fills: Vec<Fill>,
    diagnostics: RunDiagnostics,
    trace: Vec<TraceEntry>,
    last_key: Option<(DateTime<Utc>, EventKind)>,
}

impl<'c> Simulation<'c> {
    fn new(config: &'c BacktestConfig) -> Self {
        Self {
            config,
            brokerage: Brokerage::from_config(config),
            known_symbols: config.symbols.iter().cloned().collect(),
            queue: EventQueue::new(),
            orders: OrderManager::new(config.order_max_age_bars),
            portfolio: Portfolio::new(config.initial_capital),
            marks: Marks::new(),
            fills: Vec::new(),
            diagnostics: RunDiagnostics::default(),
            trace: Vec::new(),
            last_key: None,
        }
    }

    fn step<S>(&mut self, step: usize, time_step: &TimeStep<'_>, strategy: &mut S) -> Result<(), EngineError>
    where
        S: Strategy + ?Sized,
    {
        let ts = time_step.timestamp;
        self.diagnostics.steps += 1;

        for bar in &time_step.bars {
            self.queue.push(Event::MarketData((*bar).clone()));
        }
        let mut projection = AccountProjection::from_portfolio(&self.portfolio, &self.marks);
        while let Some(event) = self.queue.pop_if_kind(EventKind::MarketData) {
            self.observe(&event)?;
            if let Event::MarketData(bar) = event {
                self.match_orders(&bar, &mut projection)?;
                self.marks.insert(bar.symbol, bar.close);
            }
        }

        let expired = self.orders.expire_aged(ts);
        self.diagnostics.orders_expired += expired.len();

        let intents = {
            let ctx = StrategyContext {
                timestamp: ts,
                step,
                bars: &time_step.bars,
                portfolio: &self.portfolio,
                marks: &self.marks,
                open_orders: self.orders.open_orders().collect(),
            };
            strategy
                .on_bars(&ctx)
                .map_err(|source| EngineError::Strategy { timestamp: ts, source })?
        };
        for intent in intents {
            self.submit(intent, ts);
        }

        if step % self.config.sample_interval_bars as usize == 0 {
            self.push_update(ts);
        }
        self.drain()
    }

    /// Offer every eligible order on `bar.symbol` to the brokerage.
    fn match_orders(&mut self, bar: &Bar, projection: &mut AccountProjection) -> Result<(), EngineError> {
        for id in self.orders.eligible(&bar.symbol, bar.timestamp) {
            self.orders.mark_offered(id)?;
            let Some(order) = self.orders.get(id) else {
                continue;
            };
            match self.brokerage.execute(order, bar, projection) {
                Execution::NoFill => {}
                Execution::Fill(fill) => {
                    projection.apply(&fill);
                    self.settle(fill)?;
                }
                Execution::Reject(reason) => {
                    self.orders.reject(id, &reason, bar.timestamp)?;
                    self.diagnostics.orders_rejected += 1;
                    self.diagnostics
                        .warn(format!("order {id} rejected at {}: {reason}", bar.timestamp));
                }
            }
        }
        Ok(())
    }

    /// Book a fill on its order and the portfolio, then queue it.
    fn settle(&mut self, fill: Fill) -> Result<(), EngineError> {
        let done = self
            .orders
            .record_fill(fill.order_id, fill.fill_quantity, fill.fill_price, fill.timestamp)?;
        if done {
            self.diagnostics.orders_filled += 1;
        } else {
            self.diagnostics.partial_fills += 1;
        }
        let effect = apply_fill(&mut self.portfolio, &fill);
        if let Some(trade) = &effect.closed_trade {
            tracing::debug!(symbol = %trade.symbol, pnl = trade.pnl, "trade closed");
        }
        self.queue.push(Event::Fill(fill));
        Ok(())
    }

    fn submit(&mut self, intent: Intent, ts: DateTime<Utc>) {
        match intent {
            Intent::Signal {
                symbol,
                direction,
                strength,
            } => self.queue.push(Event::Signal(Signal {
                symbol,
                timestamp: ts,
                direction,
                strength,
            })),
            Intent::Order(request) => {
                self.create_order(request, OrderOrigin::Strategy, ts);
            }
            Intent::Cancel(id) => match self.orders.cancel(id, "cancelled by strategy", ts) {
                Ok(()) => self.diagnostics.orders_cancelled += 1,
                Err(e) => self.diagnostics.warn(format!("cancel ignored at {ts}: {e}")),
            },
        }
    }

    fn create_order(&mut self, request: OrderRequest, origin: OrderOrigin, ts: DateTime<Utc>) -> OrderId {
        let order = self.orders.create(request, origin, ts);
        let id = order.id;
        self.diagnostics.orders_submitted += 1;
        self.queue.push(Event::Order(order));
        id
    }

    fn push_update(&mut self, ts: DateTime<Utc>) {
        let snapshot = self.portfolio.snapshot(ts, &self.marks);
        self.queue.push(Event::PortfolioUpdate(snapshot));
    }

    fn drain(&mut self) -> Result<(), EngineError> {
        while let Some(event) = self.queue.pop() {
            self.observe(&event)?;
            self.dispatch(event)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, event: Event) -> Result<(), EngineError> {
        match event {
            // Market data is consumed in `step` before anything else at T.
            Event::MarketData(_) => {}
            Event::Signal(signal) => self.size(&signal),
            Event::Order(order) => {
                let still_submitted = self
                    .orders
                    .get(order.id)
                    .is_some_and(|o| o.status == OrderStatus::Submitted);
                if still_submitted {
                    let status = self.orders.accept(order.id, &self.known_symbols, order.submitted_at)?;
                    if let OrderStatus::Rejected { reason } = status {
                        self.diagnostics.orders_rejected += 1;
                        self.diagnostics
                            .warn(format!("order {} rejected at submission: {reason}", order.id));
                    }
                }
            }
            Event::Fill(fill) => {
                let ts = fill.timestamp;
                self.fills.push(fill);
                self.push_update(ts);
            }
            Event::PortfolioUpdate(snapshot) => {
                debug_assert!(self.portfolio.verify_equity(&self.marks, snapshot.equity));
                self.portfolio.equity_curve.push(EquityPoint {
                    timestamp: snapshot.timestamp,
                    equity: snapshot.equity,
                    cash: snapshot.cash,
                });
            }
        }
        Ok(())
    }

    fn size(&mut self, signal: &Signal) {
        let held = self.portfolio.quantity(&signal.symbol);
        let outstanding = self.orders.outstanding_quantity(&signal.symbol);
        let equity = self.portfolio.equity(&self.marks);
        let mark = self.marks.get(&signal.symbol).copied();
        match size_signal(signal, &self.config.signal_sizing, held, outstanding, equity, mark) {
            Ok(request) => {
                self.create_order(request, OrderOrigin::Signal, signal.timestamp);
            }
            Err(SignalDrop::AtTarget) => {}
            Err(drop) => {
                self.diagnostics.signals_dropped += 1;
                self.diagnostics.warn(format!(
                    "signal on {} at {} dropped: {drop:?}",
                    signal.symbol, signal.timestamp
                ));
            }
        }
    }

    /// Ordering guard, event counters and trace.
    fn observe(&mut self, event: &Event) -> Result<(), EngineError> {
        let key = (event.timestamp(), event.kind());
        if let Some(last) = self.last_key {
            if key < last {
                return Err(EngineError::OrderingViolation {
                    timestamp: key.0,
                    kind: key.1,
                    last_timestamp: last.0,
                    last_kind: last.1,
                });
            }
        }
        self.last_key = Some(key);
        self.diagnostics.count_event(key.1);
        if self.config.trace_events {
            self.trace.push(TraceEntry {
                timestamp: key.0,
                kind: key.1,
            });
        }
        Ok(())
    }

    /// End of data: cancel live orders, settle open positions, and make sure
    /// the equity curve ends at the final state.
    fn finish(&mut self, last_ts: DateTime<Utc>) -> Result<(), EngineError> {
        let cancelled = self.orders.cancel_all("end of data", last_ts);
        self.diagnostics.orders_cancelled += cancelled.len();

        let mut final_ts = last_ts;
        if self.config.liquidate_on_finish && self.portfolio.positions.values().any(|p| !p.is_flat()) {
            final_ts = last_ts + self.config.timeframe.duration();
            self.liquidate(final_ts)?;
        }

        let sampled = self
            .portfolio
            .equity_curve
            .last()
            .is_some_and(|p| p.timestamp == final_ts);
        if !sampled {
            self.push_update(final_ts);
            self.drain()?;
        }
        Ok(())
    }

    /// Close every open position at its last mark, taker fee, no slippage.
    fn liquidate(&mut self, ts: DateTime<Utc>) -> Result<(), EngineError> {
        let open: Vec<(String, f64)> = self
            .portfolio
            .positions
            .values()
            .filter(|p| !p.is_flat())
            .map(|p| (p.symbol.clone(), p.quantity))
            .collect();

        let mut ids = Vec::with_capacity(open.len());
        for (symbol, quantity) in &open {
            let request =
                OrderRequest::market(symbol.clone(), OrderSide::for_delta(-quantity), quantity.abs());
            ids.push(self.create_order(request, OrderOrigin::Liquidation, ts));
        }
        self.drain()?;

        for (id, (symbol, quantity)) in ids.into_iter().zip(&open) {
            let price = self
                .marks
                .get(symbol)
                .copied()
                .or_else(|| self.portfolio.get_position(symbol).map(|p| p.average_cost))
                .unwrap_or(0.0);
            let fill_quantity = quantity.abs();
            let fill = Fill {
                order_id: id,
                symbol: symbol.clone(),
                side: OrderSide::for_delta(-quantity),
                timestamp: ts,
                fill_price: price,
                fill_quantity,
                fee: self
                    .brokerage
                    .cost
                    .compute_fee(price, fill_quantity, Liquidity::Taker),
                slippage_applied: 0.0,
                liquidity: Liquidity::Taker,
            };
            self.settle(fill)?;
        }
        tracing::info!(positions = open.len(), at = %ts, "open positions liquidated");
        self.drain()
    }
}
