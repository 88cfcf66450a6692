//! Interval index over cached spans
//!
//! Spans are keyed by the interval they cover in an AVL-balanced interval
//! tree (`interavl`), giving O(log n) inserts and O(log n + k) overlap
//! queries. Several spans may share an identical interval (different
//! measures or granularities), so the tree maps each distinct interval to a
//! bucket slot and the bucket holds every span with that interval.
//!
//! There is no delete or update: spans are immutable and permanent.

use crate::cache::span::Span;
use crate::types::TimeInterval;
use interavl::IntervalTree;
use std::collections::HashMap;
use std::sync::Arc;

/// Overlap-searchable collection of spans
#[derive(Default)]
pub struct IntervalIndex {
    /// Interval -> bucket slot
    tree: IntervalTree<i64, usize>,

    /// Spans grouped by identical interval
    buckets: Vec<Vec<Arc<Span>>>,

    /// Reverse lookup used to find the bucket of an already indexed interval
    slots: HashMap<TimeInterval, usize>,

    /// Total number of spans stored
    len: usize,
}

impl IntervalIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one span
    ///
    /// Spans with an empty interval can never overlap a query and are not
    /// stored. Returns whether the span was stored.
    pub fn insert(&mut self, span: Arc<Span>) -> bool {
        let interval = span.interval();
        if interval.is_empty() {
            return false;
        }

        match self.slots.get(&interval) {
            Some(&slot) => self.buckets[slot].push(span),
            None => {
                let slot = self.buckets.len();
                self.buckets.push(vec![span]);
                self.slots.insert(interval, slot);
                self.tree.insert(interval.from..interval.to, slot);
            }
        }
        self.len += 1;
        true
    }

    /// Insert every span of `spans`, returning how many were stored
    pub fn insert_all<I>(&mut self, spans: I) -> usize
    where
        I: IntoIterator<Item = Arc<Span>>,
    {
        spans.into_iter().filter(|s| self.insert(Arc::clone(s))).count()
    }

    /// Every stored span whose interval overlaps `interval`, in no particular order
    pub fn overlapping(&self, interval: &TimeInterval) -> Vec<Arc<Span>> {
        if interval.is_empty() {
            return Vec::new();
        }

        let query = interval.from..interval.to;
        self.tree
            .iter_overlaps(&query)
            .flat_map(|(_, &slot)| self.buckets[slot].iter().cloned())
            .collect()
    }

    /// Number of spans stored
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no span is stored
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct intervals indexed
    pub fn interval_count(&self) -> usize {
        self.buckets.len()
    }
}
