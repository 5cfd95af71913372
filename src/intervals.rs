//! Time intervals a reader can answer for
//!
//! Readers advertise the closed-open epoch-second ranges they actually
//! hold data for; a `MultiReader` unions the ranges of its sources.

/// A closed-open `[start, end)` range of epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    /// Create an interval. An inverted range collapses to empty.
    pub fn new(start: i64, end: i64) -> Self {
        if end < start {
            Self { start, end: start }
        } else {
            Self { start, end }
        }
    }

    /// Length of the interval in seconds.
    pub fn size(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether two intervals overlap or touch.
    pub fn intersects(&self, other: &Interval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Smallest interval covering both.
    pub fn union(&self, other: &Interval) -> Interval {
        Interval::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// A normalized set of non-overlapping intervals, kept sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
}

impl IntervalSet {
    /// Build a set from arbitrary intervals, merging any that overlap.
    pub fn new(mut intervals: Vec<Interval>) -> Self {
        intervals.retain(|i| !i.is_empty());
        intervals.sort();
        let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
        for interval in intervals {
            match merged.last_mut() {
                Some(last) if last.intersects(&interval) => *last = last.union(&interval),
                _ => merged.push(interval),
            }
        }
        Self { intervals: merged }
    }

    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Union with another set.
    pub fn union(&self, other: &IntervalSet) -> IntervalSet {
        let mut all = self.intervals.clone();
        all.extend_from_slice(&other.intervals);
        IntervalSet::new(all)
    }

    /// Whether any interval in the set overlaps `[start, end)`.
    pub fn intersects(&self, start: i64, end: i64) -> bool {
        let probe = Interval::new(start, end);
        self.intervals.iter().any(|i| i.intersects(&probe))
    }
}
