//! Event priority queue ordered by `(timestamp, kind rank, insertion order)`.

use crate::domain::{Event, EventKind};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct PrioritizedEvent {
    event: Event,
    timestamp: DateTime<Utc>,
    kind: EventKind,
    seq: u64,
}

impl PartialEq for PrioritizedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PrioritizedEvent {}

impl PartialOrd for PrioritizedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PrioritizedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: the earliest key must compare greatest.
        (self.timestamp, self.kind, self.seq)
            .cmp(&(other.timestamp, other.kind, other.seq))
            .reverse()
    }
}

/// Min-queue of events. Ties on `(timestamp, kind)` pop in push order, so
/// identical inputs always replay identically.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<PrioritizedEvent>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(PrioritizedEvent {
            timestamp: event.timestamp(),
            kind: event.kind(),
            event,
            seq,
        });
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop().map(|p| p.event)
    }

    /// Key of the next event without removing it.
    pub fn peek_key(&self) -> Option<(DateTime<Utc>, EventKind)> {
        self.heap.peek().map(|p| (p.timestamp, p.kind))
    }

    /// Pop the next event only if its kind is `kind`.
    pub fn pop_if_kind(&mut self, kind: EventKind) -> Option<Event> {
        match self.peek_key() {
            Some((_, k)) if k == kind => self.pop(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
