//! Built-in strategies, selectable by name from run files.
//!
//! Both strategies trade every symbol they see through signals, so position
//! sizing comes from the run's `signal_sizing`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use replaylab_core::domain::Direction;
use replaylab_core::engine::{Intent, StrategyContext};
use replaylab_core::{Strategy, StrategyError};

use crate::params::{ParamSet, ParamSetExt};

/// Strategy built fresh for every run.
pub type BoxedStrategy = Box<dyn Strategy>;

/// `[strategy]` table of a run file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    #[serde(default)]
    pub params: ParamSet,
}

impl StrategyConfig {
    /// Build with `overrides` layered on top of the configured params.
    pub fn build(&self, overrides: &ParamSet) -> Result<BoxedStrategy, StrategyError> {
        let mut params = self.params.clone();
        params.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        build_strategy(&self.name, &params)
    }
}

/// Names accepted by [`build_strategy`].
pub const STRATEGY_NAMES: &[&str] = &["buy_and_hold", "ma_crossover", "idle"];

/// Look up a strategy by name and construct it from `params`.
pub fn build_strategy(name: &str, params: &ParamSet) -> Result<BoxedStrategy, StrategyError> {
    match name {
        "buy_and_hold" => Ok(Box::new(BuyAndHold::default())),
        "ma_crossover" => Ok(Box::new(MaCrossover::from_params(params)?)),
        "idle" => Ok(Box::new(replaylab_core::engine::Idle)),
        other => Err(StrategyError::new(format!(
            "unknown strategy '{other}' (expected one of {})",
            STRATEGY_NAMES.join(", ")
        ))),
    }
}

// ─── Buy and hold ───────────────────────────────────────────────────

/// Goes long every symbol on its first bar and never trades again.
#[derive(Debug, Clone, Default)]
pub struct BuyAndHold {
    entered: BTreeSet<String>,
}

impl Strategy for BuyAndHold {
    fn on_bars(&mut self, ctx: &StrategyContext<'_>) -> Result<Vec<Intent>, StrategyError> {
        let mut intents = Vec::new();
        for bar in ctx.bars {
            if self.entered.insert(bar.symbol.clone()) {
                intents.push(Intent::long(bar.symbol.clone()));
            }
        }
        Ok(intents)
    }
}

// ─── Moving average crossover ───────────────────────────────────────

/// Long while the fast SMA of closes is above the slow SMA; short (or flat
/// when shorting is off) while it is below.
#[derive(Debug, Clone)]
pub struct MaCrossover {
    fast: usize,
    slow: usize,
    allow_short: bool,
    closes: BTreeMap<String, VecDeque<f64>>,
    state: BTreeMap<String, Direction>,
}

impl MaCrossover {
    pub fn new(fast: usize, slow: usize, allow_short: bool) -> Result<Self, StrategyError> {
        if fast == 0 {
            return Err(StrategyError::new("fast period must be at least 1"));
        }
        if fast >= slow {
            return Err(StrategyError::new(format!(
                "fast period ({fast}) must be shorter than slow period ({slow})"
            )));
        }
        Ok(Self {
            fast,
            slow,
            allow_short,
            closes: BTreeMap::new(),
            state: BTreeMap::new(),
        })
    }

    /// Params: `fast` (default 10), `slow` (default 30), `allow_short`
    /// (default false).
    pub fn from_params(params: &ParamSet) -> Result<Self, StrategyError> {
        Self::new(
            params.usize_or("fast", 10)?,
            params.usize_or("slow", 30)?,
            params.bool_or("allow_short", false)?,
        )
    }

    fn desired(&self, window: &VecDeque<f64>) -> Option<Direction> {
        if window.len() < self.slow {
            return None;
        }
        let slow = window.iter().sum::<f64>() / self.slow as f64;
        let fast = window.iter().rev().take(self.fast).sum::<f64>() / self.fast as f64;
        Some(if fast > slow {
            Direction::Long
        } else if fast < slow && self.allow_short {
            Direction::Short
        } else {
            Direction::Flat
        })
    }
}

impl Strategy for MaCrossover {
    fn on_bars(&mut self, ctx: &StrategyContext<'_>) -> Result<Vec<Intent>, StrategyError> {
        let mut intents = Vec::new();
        for bar in ctx.bars {
            let window = self.closes.entry(bar.symbol.clone()).or_default();
            window.push_back(bar.close);
            if window.len() > self.slow {
                window.pop_front();
            }
            let Some(want) = self.desired(&self.closes[&bar.symbol]) else {
                continue;
            };
            let current = self.state.get(&bar.symbol).copied().unwrap_or(Direction::Flat);
            if want != current {
                tracing::debug!(symbol = %bar.symbol, ts = %ctx.timestamp, ?want, "crossover");
                self.state.insert(bar.symbol.clone(), want);
                intents.push(Intent::signal(bar.symbol.clone(), want, 1.0));
            }
        }
        Ok(intents)
    }
}
