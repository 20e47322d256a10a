//! Signal sizing: turns a direction and strength into an order quantity.
//!
//! A signal names a target position, not a trade:
//! `target = direction * strength * unit`. The order quantity is the gap
//! between the target and what the account already holds or has in flight.

use crate::config::SignalSizing;
use crate::domain::{OrderRequest, OrderSide, Signal};

/// Target is considered reached within this quantity.
const DELTA_EPSILON: f64 = 1e-9;

/// Why a signal produced no order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDrop {
    /// Strength outside `[0, 1]` or not finite.
    InvalidStrength,
    /// No price known for the symbol, so an equity fraction cannot be sized.
    NoMark,
    /// Position plus outstanding orders already equal the target.
    AtTarget,
}

/// Units per full-strength signal.
pub fn unit_quantity(sizing: &SignalSizing, equity: f64, mark: Option<f64>) -> Result<f64, SignalDrop> {
    match *sizing {
        SignalSizing::Units { quantity } => Ok(quantity),
        SignalSizing::EquityFraction { fraction } => match mark {
            Some(price) if price > 0.0 => Ok((fraction * equity.max(0.0)) / price),
            _ => Err(SignalDrop::NoMark),
        },
    }
}

/// Market order moving `held + outstanding` to the signal's target.
pub fn size_signal(
    signal: &Signal,
    sizing: &SignalSizing,
    held: f64,
    outstanding: f64,
    equity: f64,
    mark: Option<f64>,
) -> Result<OrderRequest, SignalDrop> {
    if !(signal.strength.is_finite() && (0.0..=1.0).contains(&signal.strength)) {
        return Err(SignalDrop::InvalidStrength);
    }
    let unit = match signal.direction.sign() {
        s if s == 0.0 => 0.0,
        _ => unit_quantity(sizing, equity, mark)?,
    };
    let target = signal.direction.sign() * signal.strength * unit;
    let delta = target - (held + outstanding);
    if delta.abs() <= DELTA_EPSILON {
        return Err(SignalDrop::AtTarget);
    }
    Ok(OrderRequest::market(
        signal.symbol.clone(),
        OrderSide::for_delta(delta),
        delta.abs(),
    ))
}
