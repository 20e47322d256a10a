//! DataFeed: merged, chronologically ordered bars across symbols.
//!
//! All bars sharing a timestamp come out together in configured symbol
//! order before the feed advances. A symbol with no bar at a timestamp
//! simply contributes nothing; bars are never synthesised.

use super::dataset::MarketDataSet;
use super::error::DataError;
use crate::domain::Bar;
use chrono::{DateTime, NaiveDate, Utc};

/// All bars at one timestamp.
#[derive(Debug, Clone)]
pub struct TimeStep<'a> {
    pub timestamp: DateTime<Utc>,
    pub bars: Vec<&'a Bar>,
}

struct Cursor<'a> {
    bars: &'a [Bar],
    next: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Bar> {
        self.bars.get(self.next)
    }
}

/// Iterator over [`TimeStep`]s for a fixed set of symbols and date range.
pub struct DataFeed<'a> {
    cursors: Vec<Cursor<'a>>,
    emitted: usize,
}

impl<'a> DataFeed<'a> {
    /// Build a feed for `symbols` in the given order.
    ///
    /// Every symbol must be present in `data` and have at least one bar in
    /// `[start, end]`; the caller decides beforehand how a missing symbol is
    /// reported.
    pub fn new(
        data: &'a MarketDataSet,
        symbols: &[String],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Self, DataError> {
        let mut cursors = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            let bars = data.bars_in_range(symbol, start, end).unwrap_or(&[]);
            if bars.is_empty() {
                return Err(DataError::NoBarsInRange {
                    symbol: symbol.clone(),
                    start,
                    end,
                });
            }
            cursors.push(Cursor { bars, next: 0 });
        }
        Ok(Self {
            cursors,
            emitted: 0,
        })
    }

    /// Number of bars remaining across all symbols.
    pub fn remaining_bars(&self) -> usize {
        self.cursors.iter().map(|c| c.bars.len() - c.next).sum()
    }

    /// Number of time steps emitted so far.
    pub fn steps_emitted(&self) -> usize {
        self.emitted
    }
}

impl<'a> Iterator for DataFeed<'a> {
    type Item = TimeStep<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let timestamp = self
            .cursors
            .iter()
            .filter_map(|c| c.peek())
            .map(|b| b.timestamp)
            .min()?;
        let mut bars = Vec::with_capacity(self.cursors.len());
        for cursor in &mut self.cursors {
            if let Some(bar) = cursor.peek() {
                if bar.timestamp == timestamp {
                    bars.push(bar);
                    cursor.next += 1;
                }
            }
        }
        self.emitted += 1;
        Some(TimeStep { timestamp, bars })
    }
}
