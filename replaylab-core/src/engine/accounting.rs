//! Portfolio accounting: applies fills to the portfolio.
//!
//! Average-cost method:
//! - Same-direction fill: cash out, quantity up, average cost re-weighted
//! - Opposite-direction fill: realize `(price - avg) * closed * sign` on the
//!   closed part; any remainder opens a new position at the fill price
//! - A round trip becomes a [`Trade`] when the quantity crosses zero
//!
//! The equity identity (`equity == cash + sum(qty * mark)`) holds after
//! every call because cash moves by exactly the fill's signed notional plus
//! its fee.

use crate::domain::{Fill, OpenTrade, Portfolio, Position, PositionSide, Trade};

/// Quantities below this are treated as flat.
const QTY_EPSILON: f64 = 1e-9;

/// What a single fill did to the portfolio.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillEffect {
    /// PnL realized by this fill, before fees.
    pub realized_pnl: f64,
    /// Round trip closed by this fill, if any.
    pub closed_trade: Option<Trade>,
}

/// Apply one fill to the portfolio.
pub fn apply_fill(portfolio: &mut Portfolio, fill: &Fill) -> FillEffect {
    portfolio.cash += fill.cash_delta();
    portfolio.total_fees += fill.fee;
    portfolio.total_slippage += fill.slippage_applied;

    let delta = fill.signed_quantity();
    let pos = portfolio
        .positions
        .entry(fill.symbol.clone())
        .or_insert_with(|| Position::flat(fill.symbol.clone()));

    if pos.is_flat() || pos.quantity.signum() == delta.signum() {
        open_or_add(pos, fill, delta);
        portfolio
            .open_trades
            .entry(fill.symbol.clone())
            .or_insert_with(|| {
                OpenTrade::open(fill.symbol.clone(), side_of(delta), fill.timestamp)
            })
            .add_entry(fill.fill_quantity, fill.fill_price, fill.fee, fill.slippage_applied);
        return FillEffect::default();
    }

    // Reducing, closing or reversing.
    let before = pos.quantity;
    let closed = fill.fill_quantity.min(before.abs());
    let realized = (fill.fill_price - pos.average_cost) * closed * before.signum();
    pos.realized_pnl += realized;

    let share = closed / fill.fill_quantity;
    let (close_fee, open_fee) = split(fill.fee, share);
    let (close_slip, open_slip) = split(fill.slippage_applied, share);
    let remainder = fill.fill_quantity - closed;

    let tracker = portfolio
        .open_trades
        .entry(fill.symbol.clone())
        .or_insert_with(|| OpenTrade::open(fill.symbol.clone(), side_of(before), fill.timestamp));
    tracker.add_exit(closed, fill.fill_price, close_fee, close_slip);

    let fully_closed = (before.abs() - closed) <= QTY_EPSILON;
    if !fully_closed {
        pos.quantity = before + delta;
        return FillEffect {
            realized_pnl: realized,
            closed_trade: None,
        };
    }

    pos.quantity = 0.0;
    pos.average_cost = 0.0;
    let closed_trade = portfolio
        .open_trades
        .remove(&fill.symbol)
        .map(|t| t.close(fill.timestamp));
    if let Some(trade) = &closed_trade {
        portfolio.trades.push(trade.clone());
    }

    if remainder > QTY_EPSILON {
        pos.quantity = delta.signum() * remainder;
        pos.average_cost = fill.fill_price;
        let mut reopened = OpenTrade::open(fill.symbol.clone(), side_of(delta), fill.timestamp);
        reopened.add_entry(remainder, fill.fill_price, open_fee, open_slip);
        portfolio.open_trades.insert(fill.symbol.clone(), reopened);
    }

    FillEffect {
        realized_pnl: realized,
        closed_trade,
    }
}

fn open_or_add(pos: &mut Position, fill: &Fill, delta: f64) {
    let held = pos.quantity.abs();
    let total = held + fill.fill_quantity;
    pos.average_cost = (pos.average_cost * held + fill.fill_price * fill.fill_quantity) / total;
    pos.quantity += delta;
}

fn side_of(quantity: f64) -> PositionSide {
    if quantity < 0.0 {
        PositionSide::Short
    } else {
        PositionSide::Long
    }
}

fn split(amount: f64, share: f64) -> (f64, f64) {
    let first = amount * share;
    (first, amount - first)
}
