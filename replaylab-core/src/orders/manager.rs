//! Order manager: owns every order of a run and its lifecycle.
//!
//! The manager tracks state only:
//! - Order creation with monotonically increasing IDs
//! - Static validation (`Submitted → Pending` or `Rejected`)
//! - Fill bookkeeping (`Pending → PartiallyFilled → Pending`, `→ Filled`)
//! - Cancellation by the strategy, by age, or at the end of data
//! - Audit trail for every state transition
//!
//! It does not compute fill prices or check cash; that is the brokerage's job.

use crate::domain::{
    Order, OrderAuditEntry, OrderId, OrderKind, OrderOrigin, OrderRequest, OrderStatus,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Remaining quantity below this fraction of the order size counts as filled.
const FILL_EPSILON: f64 = 1e-9;

/// Errors from order manager operations. These indicate engine bugs or
/// stale strategy references, never market conditions.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrderError {
    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("invalid transition for order {id}: {from} -> {to}")]
    InvalidTransition {
        id: OrderId,
        from: &'static str,
        to: &'static str,
    },

    #[error("fill of {fill} exceeds remaining {remaining} on order {id}")]
    Overfill {
        id: OrderId,
        fill: f64,
        remaining: f64,
    },

    #[error("fill quantity {fill} on order {id} is not positive")]
    EmptyFill { id: OrderId, fill: f64 },
}

/// Registry of all orders in a run, keyed (and therefore ordered) by ID.
#[derive(Debug, Clone)]
pub struct OrderManager {
    orders: BTreeMap<OrderId, Order>,
    next_id: u64,
    max_age_bars: Option<u32>,
    audit_trail: Vec<OrderAuditEntry>,
}

impl OrderManager {
    pub fn new(max_age_bars: Option<u32>) -> Self {
        Self {
            orders: BTreeMap::new(),
            next_id: 1,
            max_age_bars,
            audit_trail: Vec::new(),
        }
    }

    // ── Lookup ─────────────────────────────────────────────────────────

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// Every order ever created, in submission order.
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Orders still waiting for a fill, in submission order.
    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values().filter(|o| o.is_active())
    }

    pub fn audit_trail(&self) -> &[OrderAuditEntry] {
        &self.audit_trail
    }

    /// Active orders on `symbol` submitted strictly before `ts`, in ID order.
    ///
    /// Orders created at `ts` itself are not eligible on the bar at `ts`;
    /// that is what keeps execution free of lookahead.
    pub fn eligible(&self, symbol: &str, ts: DateTime<Utc>) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|o| o.is_active() && o.symbol == symbol && o.submitted_at < ts)
            .map(|o| o.id)
            .collect()
    }

    /// Signed quantity still to be executed on `symbol` by live orders
    /// (submitted or pending).
    pub fn outstanding_quantity(&self, symbol: &str) -> f64 {
        self.orders
            .values()
            .filter(|o| {
                o.symbol == symbol && (o.is_active() || o.status == OrderStatus::Submitted)
            })
            .map(Order::signed_remaining)
            .sum()
    }

    pub fn into_parts(self) -> (Vec<Order>, Vec<OrderAuditEntry>) {
        (self.orders.into_values().collect(), self.audit_trail)
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Create a new order in `Submitted` state.
    pub fn create(
        &mut self,
        request: OrderRequest,
        origin: OrderOrigin,
        ts: DateTime<Utc>,
    ) -> Order {
        let id = OrderId(self.next_id);
        self.next_id += 1;
        let order = Order {
            id,
            symbol: request.symbol,
            side: request.side,
            kind: request.kind,
            quantity: request.quantity,
            filled_quantity: 0.0,
            average_fill_price: 0.0,
            status: OrderStatus::Submitted,
            origin,
            submitted_at: ts,
            bars_offered: 0,
        };
        self.audit_trail.push(OrderAuditEntry {
            order_id: id,
            timestamp: ts,
            from_status: None,
            to_status: OrderStatus::Submitted,
            reason: format!("{} {:?} {}", order.kind.name(), order.side, order.quantity),
        });
        self.orders.insert(id, order.clone());
        order
    }

    /// Validate a submitted order: `Submitted → Pending` or `→ Rejected`.
    ///
    /// Returns the resulting status.
    pub fn accept(
        &mut self,
        id: OrderId,
        known_symbols: &BTreeSet<String>,
        ts: DateTime<Utc>,
    ) -> Result<OrderStatus, OrderError> {
        let order = self.orders.get(&id).ok_or(OrderError::NotFound(id))?;
        let next = match validate(order, known_symbols) {
            Ok(()) => OrderStatus::Pending,
            Err(reason) => OrderStatus::Rejected { reason },
        };
        self.transition(id, next.clone(), ts, "validated")?;
        Ok(next)
    }

    /// Note that an order was offered to the brokerage on one more bar.
    pub fn mark_offered(&mut self, id: OrderId) -> Result<(), OrderError> {
        let order = self.orders.get_mut(&id).ok_or(OrderError::NotFound(id))?;
        order.bars_offered += 1;
        Ok(())
    }

    /// Record a fill. Returns `true` when the order is now completely filled.
    ///
    /// A partial fill passes through `PartiallyFilled` and is re-queued as
    /// `Pending` with the same ID and the remaining quantity.
    pub fn record_fill(
        &mut self,
        id: OrderId,
        quantity: f64,
        price: f64,
        ts: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        let order = self.orders.get_mut(&id).ok_or(OrderError::NotFound(id))?;
        if !order.is_active() {
            return Err(OrderError::InvalidTransition {
                id,
                from: order.status.label(),
                to: "filled",
            });
        }
        if !(quantity.is_finite() && quantity > 0.0) {
            return Err(OrderError::EmptyFill { id, fill: quantity });
        }
        let remaining = order.remaining_quantity();
        if quantity > remaining * (1.0 + FILL_EPSILON) {
            return Err(OrderError::Overfill {
                id,
                fill: quantity,
                remaining,
            });
        }

        let new_filled = order.filled_quantity + quantity;
        order.average_fill_price =
            (order.average_fill_price * order.filled_quantity + price * quantity) / new_filled;
        order.filled_quantity = new_filled;

        let done = order.quantity - new_filled <= order.quantity * FILL_EPSILON;
        if done {
            order.filled_quantity = order.quantity;
            self.transition(id, OrderStatus::Filled, ts, "filled")?;
        } else {
            self.transition(id, OrderStatus::PartiallyFilled, ts, "partial fill")?;
            self.transition(id, OrderStatus::Pending, ts, "remainder re-queued")?;
        }
        Ok(done)
    }

    /// Reject a pending order at fill time (insufficient cash or margin).
    pub fn reject(&mut self, id: OrderId, reason: &str, ts: DateTime<Utc>) -> Result<(), OrderError> {
        self.transition(
            id,
            OrderStatus::Rejected {
                reason: reason.to_string(),
            },
            ts,
            reason,
        )
    }

    /// Cancel a live order.
    pub fn cancel(&mut self, id: OrderId, reason: &str, ts: DateTime<Utc>) -> Result<(), OrderError> {
        self.transition(
            id,
            OrderStatus::Cancelled {
                reason: reason.to_string(),
            },
            ts,
            reason,
        )
    }

    /// Cancel active orders offered on at least `max_age_bars` bars.
    pub fn expire_aged(&mut self, ts: DateTime<Utc>) -> Vec<OrderId> {
        let Some(max_age) = self.max_age_bars else {
            return Vec::new();
        };
        let expired: Vec<OrderId> = self
            .open_orders()
            .filter(|o| o.bars_offered >= max_age)
            .map(|o| o.id)
            .collect();
        let reason = format!("expired after {max_age} bars");
        for id in &expired {
            // Only active orders were selected, so the transition is legal.
            let _ = self.cancel(*id, &reason, ts);
        }
        expired
    }

    /// Cancel every live order (end of data).
    pub fn cancel_all(&mut self, reason: &str, ts: DateTime<Utc>) -> Vec<OrderId> {
        let live: Vec<OrderId> = self
            .orders
            .values()
            .filter(|o| o.is_active() || o.status == OrderStatus::Submitted)
            .map(|o| o.id)
            .collect();
        for id in &live {
            let _ = self.cancel(*id, reason, ts);
        }
        live
    }

    // ── Internal ───────────────────────────────────────────────────────

    fn transition(
        &mut self,
        id: OrderId,
        to: OrderStatus,
        ts: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), OrderError> {
        let order = self.orders.get_mut(&id).ok_or(OrderError::NotFound(id))?;
        if !is_legal(&order.status, &to) {
            return Err(OrderError::InvalidTransition {
                id,
                from: order.status.label(),
                to: to.label(),
            });
        }
        let from = std::mem::replace(&mut order.status, to.clone());
        tracing::debug!(order = %id, from = from.label(), to = to.label(), reason, "order transition");
        self.audit_trail.push(OrderAuditEntry {
            order_id: id,
            timestamp: ts,
            from_status: Some(from),
            to_status: to,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

fn is_legal(from: &OrderStatus, to: &OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Submitted, Pending)
            | (Submitted, Rejected { .. })
            | (Submitted, Cancelled { .. })
            | (Pending, PartiallyFilled)
            | (Pending, Filled)
            | (Pending, Cancelled { .. })
            | (Pending, Rejected { .. })
            | (PartiallyFilled, Pending)
            | (PartiallyFilled, Filled)
            | (PartiallyFilled, Cancelled { .. })
    )
}

/// Static checks that do not depend on market state.
fn validate(order: &Order, known_symbols: &BTreeSet<String>) -> Result<(), String> {
    if !known_symbols.contains(&order.symbol) {
        return Err(format!("unknown symbol '{}'", order.symbol));
    }
    if !(order.quantity.is_finite() && order.quantity > 0.0) {
        return Err(format!("quantity must be positive, got {}", order.quantity));
    }
    match order.kind {
        OrderKind::Market => {}
        OrderKind::Limit { limit_price } => {
            if !(limit_price.is_finite() && limit_price > 0.0) {
                return Err(format!("invalid limit price {limit_price}"));
            }
        }
        OrderKind::Stop { stop_price } => {
            if !(stop_price.is_finite() && stop_price > 0.0) {
                return Err(format!("invalid stop price {stop_price}"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderSide;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn symbols() -> BTreeSet<String> {
        ["SPY".to_string()].into_iter().collect()
    }

    fn pending(mgr: &mut OrderManager, request: OrderRequest, day: u32) -> OrderId {
        let order = mgr.create(request, OrderOrigin::Strategy, ts(day));
        assert_eq!(mgr.accept(order.id, &symbols(), ts(day)).unwrap(), OrderStatus::Pending);
        order.id
    }

    #[test]
    fn ids_increase_monotonically() {
        let mut mgr = OrderManager::new(None);
        let a = mgr.create(OrderRequest::market("SPY", OrderSide::Buy, 1.0), OrderOrigin::Strategy, ts(2));
        let b = mgr.create(OrderRequest::market("SPY", OrderSide::Buy, 1.0), OrderOrigin::Strategy, ts(2));
        assert!(a.id < b.id);
        assert_eq!(a.status, OrderStatus::Submitted);
    }

    #[test]
    fn validation_rejects_bad_orders() {
        let mut mgr = OrderManager::new(None);
        let bad_qty = mgr.create(OrderRequest::market("SPY", OrderSide::Buy, 0.0), OrderOrigin::Strategy, ts(2));
        let bad_sym = mgr.create(OrderRequest::market("XYZ", OrderSide::Buy, 1.0), OrderOrigin::Strategy, ts(2));
        let bad_limit =
            mgr.create(OrderRequest::limit("SPY", OrderSide::Buy, 1.0, f64::NAN), OrderOrigin::Strategy, ts(2));
        for id in [bad_qty.id, bad_sym.id, bad_limit.id] {
            let status = mgr.accept(id, &symbols(), ts(2)).unwrap();
            assert!(matches!(status, OrderStatus::Rejected { .. }));
        }
        assert_eq!(mgr.open_orders().count(), 0);
    }

    #[test]
    fn same_bar_orders_are_not_eligible() {
        let mut mgr = OrderManager::new(None);
        let id = pending(&mut mgr, OrderRequest::market("SPY", OrderSide::Buy, 1.0), 2);
        assert!(mgr.eligible("SPY", ts(2)).is_empty());
        assert_eq!(mgr.eligible("SPY", ts(3)), vec![id]);
        assert!(mgr.eligible("QQQ", ts(3)).is_empty());
    }

    #[test]
    fn partial_fill_requeues_with_same_id() {
        let mut mgr = OrderManager::new(None);
        let id = pending(&mut mgr, OrderRequest::market("SPY", OrderSide::Buy, 10.0), 2);

        assert!(!mgr.record_fill(id, 4.0, 100.0, ts(3)).unwrap());
        let order = mgr.get(id).unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.remaining_quantity(), 6.0);

        assert!(mgr.record_fill(id, 6.0, 110.0, ts(4)).unwrap());
        let order = mgr.get(id).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!((order.average_fill_price - 106.0).abs() < 1e-12);

        let to: Vec<&str> = mgr
            .audit_trail()
            .iter()
            .filter(|e| e.order_id == id)
            .map(|e| e.to_status.label())
            .collect();
        assert_eq!(
            to,
            vec!["submitted", "pending", "partially_filled", "pending", "filled"]
        );
    }

    #[test]
    fn overfill_is_an_error() {
        let mut mgr = OrderManager::new(None);
        let id = pending(&mut mgr, OrderRequest::market("SPY", OrderSide::Sell, 1.0), 2);
        assert!(matches!(
            mgr.record_fill(id, 2.0, 100.0, ts(3)),
            Err(OrderError::Overfill { .. })
        ));
    }

    #[test]
    fn empty_fill_is_an_error() {
        let mut mgr = OrderManager::new(None);
        let id = pending(&mut mgr, OrderRequest::market("SPY", OrderSide::Buy, 1.0), 2);
        assert!(matches!(
            mgr.record_fill(id, 0.0, 100.0, ts(3)),
            Err(OrderError::EmptyFill { .. })
        ));
        assert_eq!(mgr.get(id).unwrap().status, OrderStatus::Pending);
    }

    #[test]
    fn filled_orders_cannot_be_cancelled() {
        let mut mgr = OrderManager::new(None);
        let id = pending(&mut mgr, OrderRequest::market("SPY", OrderSide::Buy, 1.0), 2);
        mgr.record_fill(id, 1.0, 100.0, ts(3)).unwrap();
        assert!(matches!(
            mgr.cancel(id, "user", ts(3)),
            Err(OrderError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn aged_orders_expire() {
        let mut mgr = OrderManager::new(Some(2));
        let id = pending(&mut mgr, OrderRequest::limit("SPY", OrderSide::Buy, 1.0, 50.0), 2);
        mgr.mark_offered(id).unwrap();
        assert!(mgr.expire_aged(ts(3)).is_empty());
        mgr.mark_offered(id).unwrap();
        assert_eq!(mgr.expire_aged(ts(4)), vec![id]);
        assert!(matches!(mgr.get(id).unwrap().status, OrderStatus::Cancelled { .. }));
    }

    #[test]
    fn outstanding_quantity_is_signed() {
        let mut mgr = OrderManager::new(None);
        pending(&mut mgr, OrderRequest::market("SPY", OrderSide::Buy, 5.0), 2);
        pending(&mut mgr, OrderRequest::market("SPY", OrderSide::Sell, 2.0), 2);
        mgr.create(OrderRequest::market("SPY", OrderSide::Buy, 1.0), OrderOrigin::Signal, ts(2));
        assert_eq!(mgr.outstanding_quantity("SPY"), 4.0);
    }

    #[test]
    fn cancel_all_covers_submitted_and_pending() {
        let mut mgr = OrderManager::new(None);
        pending(&mut mgr, OrderRequest::market("SPY", OrderSide::Buy, 5.0), 2);
        mgr.create(OrderRequest::market("SPY", OrderSide::Buy, 1.0), OrderOrigin::Signal, ts(2));
        assert_eq!(mgr.cancel_all("end of data", ts(3)).len(), 2);
        assert_eq!(mgr.open_orders().count(), 0);
    }
}
