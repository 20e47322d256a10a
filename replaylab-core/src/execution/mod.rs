//! Brokerage: decides whether and how a pending order executes on a bar.
//!
//! The brokerage is a stateless config holder. Given one pending order, the
//! bar it is offered on and the projected account, it returns no fill, a
//! fill, or a rejection:
//!
//! - Market: reference is the bar open (the order was placed on an earlier
//!   bar), taker, slipped.
//! - Limit: fills when the range reaches the limit, at the limit price even
//!   when the bar opens through it. Maker, no slippage.
//! - Stop: triggers when the range reaches the stop and executes as a
//!   market order on the same bar from the stop (or the open on a gap).
//!   Taker, slipped.

pub mod cost_model;
pub mod liquidity;
pub mod margin;

pub use cost_model::CostModel;
pub use liquidity::ParticipationCap;
pub use margin::{AccountProjection, MarginPolicy};

use crate::config::BacktestConfig;
use crate::domain::{Bar, Fill, Liquidity, Order, OrderKind, OrderSide};

/// Outcome of offering one order to one bar.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// Price not reached or no fillable quantity on this bar.
    NoFill,
    Fill(Fill),
    /// Execution would break cash or margin rules.
    Reject(String),
}

/// Execution rules for one run.
#[derive(Debug, Clone)]
pub struct Brokerage {
    pub cost: CostModel,
    pub participation: Option<ParticipationCap>,
    pub margin: MarginPolicy,
}

impl Brokerage {
    pub fn new(cost: CostModel, participation: Option<ParticipationCap>, margin: MarginPolicy) -> Self {
        Self {
            cost,
            participation,
            margin,
        }
    }

    pub fn from_config(config: &BacktestConfig) -> Self {
        Self::new(
            CostModel::from_config(config),
            config.max_participation.map(ParticipationCap::new),
            MarginPolicy::from_config(config),
        )
    }

    pub fn frictionless() -> Self {
        Self::new(CostModel::frictionless(), None, MarginPolicy::cash_only())
    }

    /// Offer `order` to `bar`. The fill is checked against `account`; the
    /// caller folds accepted fills into the projection.
    pub fn execute(&self, order: &Order, bar: &Bar, account: &AccountProjection) -> Execution {
        debug_assert_eq!(order.symbol, bar.symbol);
        let Some((reference, liquidity)) = trigger(order, bar) else {
            return Execution::NoFill;
        };

        let desired = order.remaining_quantity();
        let quantity = match &self.participation {
            Some(cap) => cap.constrain(desired, bar.volume).0,
            None => desired,
        };
        if quantity <= 0.0 {
            return Execution::NoFill;
        }

        let (price, slippage) = match liquidity {
            Liquidity::Maker => (reference, 0.0),
            Liquidity::Taker => self
                .cost
                .apply_slippage(reference, order.side, quantity, bar.volume),
        };
        let fill = Fill {
            order_id: order.id,
            symbol: order.symbol.clone(),
            side: order.side,
            timestamp: bar.timestamp,
            fill_price: price,
            fill_quantity: quantity,
            fee: self.cost.compute_fee(price, quantity, liquidity),
            slippage_applied: slippage,
            liquidity,
        };

        match self.margin.check(account, &account.with(&fill)) {
            Ok(()) => Execution::Fill(fill),
            Err(reason) => Execution::Reject(reason),
        }
    }
}

/// Reference price and liquidity side if the order executes on `bar`.
fn trigger(order: &Order, bar: &Bar) -> Option<(f64, Liquidity)> {
    match (order.kind, order.side) {
        (OrderKind::Market, _) => Some((bar.open, Liquidity::Taker)),
        (OrderKind::Limit { limit_price }, OrderSide::Buy) => {
            (bar.low <= limit_price).then_some((limit_price, Liquidity::Maker))
        }
        (OrderKind::Limit { limit_price }, OrderSide::Sell) => {
            (bar.high >= limit_price).then_some((limit_price, Liquidity::Maker))
        }
        (OrderKind::Stop { stop_price }, OrderSide::Buy) => {
            (bar.high >= stop_price).then(|| (stop_price.max(bar.open), Liquidity::Taker))
        }
        (OrderKind::Stop { stop_price }, OrderSide::Sell) => {
            (bar.low <= stop_price).then(|| (stop_price.min(bar.open), Liquidity::Taker))
        }
    }
}
