//! Disjoint union of half-open time intervals
//!
//! `TimeRangeSet` records which parts of a pixel column are certainly
//! covered by folded data. Inserted intervals are coalesced with any
//! overlapping or adjacent piece, so the set always holds the minimal number
//! of disjoint pieces.

use crate::types::TimeInterval;
use std::collections::BTreeMap;

/// Set of disjoint, non-adjacent time intervals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeRangeSet {
    /// Piece start -> piece end
    ranges: BTreeMap<i64, i64>,
}

impl TimeRangeSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an interval, merging it with touching pieces
    pub fn add(&mut self, interval: TimeInterval) {
        if interval.is_empty() {
            return;
        }

        let mut from = interval.from;
        let mut to = interval.to;

        if let Some((&start, &end)) = self.ranges.range(..=from).next_back() {
            if end >= from {
                from = start;
                to = to.max(end);
            }
        }

        let touching: Vec<i64> = self.ranges.range(from..=to).map(|(&s, _)| s).collect();
        for start in touching {
            if let Some(end) = self.ranges.remove(&start) {
                to = to.max(end);
            }
        }

        self.ranges.insert(from, to);
    }

    /// Number of disjoint pieces
    pub fn piece_count(&self) -> usize {
        self.ranges.len()
    }

    /// True when nothing has been added
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The only piece, if the set consists of exactly one
    pub fn single_piece(&self) -> Option<TimeInterval> {
        if self.ranges.len() != 1 {
            return None;
        }
        self.iter().next()
    }

    /// Check whether `interval` lies entirely inside one piece
    pub fn encloses(&self, interval: &TimeInterval) -> bool {
        if interval.is_empty() {
            return true;
        }
        match self.ranges.range(..=interval.from).next_back() {
            Some((_, &end)) => end >= interval.to,
            None => false,
        }
    }

    /// Check whether any piece shares a timestamp with `interval`
    pub fn overlaps(&self, interval: &TimeInterval) -> bool {
        if interval.is_empty() {
            return false;
        }
        match self.ranges.range(..interval.to).next_back() {
            Some((_, &end)) => end > interval.from,
            None => false,
        }
    }

    /// Check whether a timestamp is covered
    pub fn contains(&self, timestamp: i64) -> bool {
        match self.ranges.range(..=timestamp).next_back() {
            Some((_, &end)) => timestamp < end,
            None => false,
        }
    }

    /// Total covered duration in milliseconds
    pub fn covered_duration(&self) -> i64 {
        self.ranges.iter().map(|(s, e)| e - s).sum()
    }

    /// Parts of `within` that no piece covers, in ascending order
    pub fn gaps(&self, within: &TimeInterval) -> Vec<TimeInterval> {
        let mut gaps = Vec::new();
        let mut cursor = within.from;

        for piece in self.iter() {
            if piece.to <= cursor {
                continue;
            }
            if piece.from >= within.to {
                break;
            }
            if piece.from > cursor {
                gaps.push(TimeInterval::new_unchecked(cursor, piece.from));
            }
            cursor = cursor.max(piece.to);
        }

        if cursor < within.to {
            gaps.push(TimeInterval::new_unchecked(cursor, within.to));
        }
        gaps
    }

    /// Iterate over the pieces in ascending order
    pub fn iter(&self) -> impl Iterator<Item = TimeInterval> + '_ {
        self.ranges
            .iter()
            .map(|(&from, &to)| TimeInterval::new_unchecked(from, to))
    }

    /// Remove every piece
    pub fn clear(&mut self) {
        self.ranges.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(from: i64, to: i64) -> TimeInterval {
        TimeInterval::new(from, to).unwrap()
    }

    #[test]
    fn test_adjacent_pieces_coalesce() {
        let mut set = TimeRangeSet::new();
        set.add(iv(0, 40));
        set.add(iv(40, 80));
        assert_eq!(set.piece_count(), 1);
        assert_eq!(set.single_piece(), Some(iv(0, 80)));
    }

    #[test]
    fn test_gap_keeps_pieces_apart() {
        let mut set = TimeRangeSet::new();
        set.add(iv(0, 40));
        set.add(iv(60, 80));
        assert_eq!(set.piece_count(), 2);
        assert_eq!(set.single_piece(), None);

        // Filling the hole merges everything
        set.add(iv(30, 65));
        assert_eq!(set.single_piece(), Some(iv(0, 80)));
    }

    #[test]
    fn test_insert_spanning_many_pieces() {
        let mut set = TimeRangeSet::new();
        for start in (0..100).step_by(20) {
            set.add(iv(start, start + 5));
        }
        assert_eq!(set.piece_count(), 5);
        set.add(iv(-10, 200));
        assert_eq!(set.single_piece(), Some(iv(-10, 200)));
    }

    #[test]
    fn test_empty_interval_ignored() {
        let mut set = TimeRangeSet::new();
        set.add(iv(5, 5));
        assert!(set.is_empty());
    }

    #[test]
    fn test_encloses_and_contains() {
        let mut set = TimeRangeSet::new();
        set.add(iv(100, 200));
        set.add(iv(300, 400));

        assert!(set.encloses(&iv(120, 180)));
        assert!(set.encloses(&iv(100, 200)));
        assert!(!set.encloses(&iv(150, 250)));
        assert!(!set.encloses(&iv(190, 310)));
        assert!(set.contains(100));
        assert!(!set.contains(200));
        assert!(!set.contains(50));
    }

    #[test]
    fn test_overlaps() {
        let mut set = TimeRangeSet::new();
        set.add(iv(100, 200));
        set.add(iv(300, 400));

        assert!(set.overlaps(&iv(190, 210)));
        assert!(set.overlaps(&iv(250, 301)));
        assert!(set.overlaps(&iv(0, 1000)));
        assert!(!set.overlaps(&iv(200, 300)));
        assert!(!set.overlaps(&iv(0, 100)));
        assert!(!set.overlaps(&iv(400, 500)));
        assert!(!set.overlaps(&iv(150, 150)));
    }

    #[test]
    fn test_gaps() {
        let mut set = TimeRangeSet::new();
        set.add(iv(10, 20));
        set.add(iv(30, 40));

        assert_eq!(set.gaps(&iv(0, 50)), vec![iv(0, 10), iv(20, 30), iv(40, 50)]);
        assert_eq!(set.gaps(&iv(12, 18)), Vec::<TimeInterval>::new());
        assert_eq!(set.gaps(&iv(15, 35)), vec![iv(20, 30)]);
        assert_eq!(set.covered_duration(), 20);
    }
}
