//! Time-series data model
//!
//! The sample-sequence type returned by every fetch and produced by
//! every transform function, plus the alignment machinery that makes
//! series from backends with different native sampling intervals
//! combinable:
//!
//! - consolidation: an iteration *view* that reduces `values_per_point`
//!   raw samples into one output point; raw storage is never mutated
//! - normalization: bringing several series to a common step (LCM of
//!   their steps) and a common time window before combining them

use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// How consolidation reduces a window of raw samples into one point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsolidationFunc {
    #[default]
    Average,
    Sum,
    Max,
    Min,
}

impl ConsolidationFunc {
    /// Parse a user-supplied function name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "average" | "avg" => Some(Self::Average),
            "sum" => Some(Self::Sum),
            "max" => Some(Self::Max),
            "min" => Some(Self::Min),
            _ => None,
        }
    }

    /// Reduce a non-empty slice of usable (non-null) samples.
    fn apply(&self, usable: &[f64]) -> f64 {
        match self {
            Self::Sum => usable.iter().sum(),
            Self::Average => usable.iter().sum::<f64>() / usable.len() as f64,
            Self::Max => usable.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            Self::Min => usable.iter().cloned().fold(f64::INFINITY, f64::min),
        }
    }
}

impl std::fmt::Display for ConsolidationFunc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Average => write!(f, "average"),
            Self::Sum => write!(f, "sum"),
            Self::Max => write!(f, "max"),
            Self::Min => write!(f, "min"),
        }
    }
}

/// An ordered sequence of optional samples over a fixed-step window.
///
/// `start`, `end` and `step` are epoch seconds; the sample for
/// timestamp `t` lives at index `(t - start) / step`. A missing sample
/// is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub name: String,
    pub start: i64,
    pub end: i64,
    pub step: i64,
    pub consolidation_func: ConsolidationFunc,
    /// The path expression this series was resolved from; transform
    /// functions that rename a series update this too.
    pub path_expression: String,
    /// Render options, opaque to the engine core.
    pub options: HashMap<String, JsonValue>,
    pub values: Vec<Option<f64>>,
    values_per_point: usize,
}

impl TimeSeries {
    pub fn new(
        name: impl Into<String>,
        start: i64,
        end: i64,
        step: i64,
        values: Vec<Option<f64>>,
    ) -> Self {
        let name = name.into();
        Self {
            path_expression: name.clone(),
            name,
            start,
            end,
            step,
            consolidation_func: ConsolidationFunc::Average,
            options: HashMap::new(),
            values,
            values_per_point: 1,
        }
    }

    /// Builder method: set the originating path expression.
    pub fn with_path_expression(mut self, expr: impl Into<String>) -> Self {
        self.path_expression = expr.into();
        self
    }

    /// Builder method: set the consolidation function.
    pub fn with_consolidation(mut self, func: ConsolidationFunc) -> Self {
        self.consolidation_func = func;
        self
    }

    /// Number of raw samples.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Request consolidation of `values_per_point` raw samples per
    /// output point. Only the iteration view changes; raw values stay
    /// untouched.
    pub fn consolidate(&mut self, values_per_point: usize) {
        self.values_per_point = values_per_point.max(1);
    }

    pub fn values_per_point(&self) -> usize {
        self.values_per_point
    }

    /// Number of points the consolidated view yields:
    /// `ceil(len / values_per_point)`.
    pub fn points(&self) -> usize {
        if self.values.is_empty() {
            0
        } else {
            (self.values.len() + self.values_per_point - 1) / self.values_per_point
        }
    }

    /// The consolidated view of this series.
    pub fn iter(&self) -> ConsolidatedValues<'_> {
        ConsolidatedValues {
            series: self,
            pos: 0,
        }
    }

    /// Materialize the consolidated view.
    pub fn consolidated_values(&self) -> Vec<Option<f64>> {
        self.iter().collect()
    }

    /// Whether any sample is non-null.
    pub fn has_data(&self) -> bool {
        self.values.iter().any(|v| v.is_some())
    }

    fn consolidate_window(&self, window: &[Option<f64>]) -> Option<f64> {
        let usable: Vec<f64> = window.iter().filter_map(|v| *v).collect();
        if usable.is_empty() {
            None
        } else {
            Some(self.consolidation_func.apply(&usable))
        }
    }
}

/// Iterator over a series' consolidated view.
pub struct ConsolidatedValues<'a> {
    series: &'a TimeSeries,
    pos: usize,
}

impl Iterator for ConsolidatedValues<'_> {
    type Item = Option<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        let values = &self.series.values;
        if self.pos >= values.len() {
            return None;
        }
        let end = (self.pos + self.series.values_per_point).min(values.len());
        let window = &values[self.pos..end];
        self.pos = end;
        Some(self.series.consolidate_window(window))
    }
}

impl<'a> IntoIterator for &'a TimeSeries {
    type Item = Option<f64>;
    type IntoIter = ConsolidatedValues<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Greatest common divisor.
fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Least common multiple.
pub fn lcm(a: i64, b: i64) -> i64 {
    if a == b {
        return a;
    }
    let (a, b) = if a < b { (b, a) } else { (a, b) };
    a / gcd(a, b) * b
}

/// Align several series lists to a shared step and window.
///
/// The shared step is the LCM of all steps; each series is consolidated
/// by `step / own_step`. The window is `[min(starts), max(ends))` with
/// the end rounded down to a step boundary. Returns `None` when no
/// series were given.
pub fn normalize(series_lists: Vec<Vec<TimeSeries>>) -> Option<(Vec<TimeSeries>, i64, i64, i64)> {
    let mut series: Vec<TimeSeries> = series_lists.into_iter().flatten().collect();
    if series.is_empty() {
        return None;
    }
    let step = series.iter().map(|s| s.step).fold(1, lcm);
    for s in series.iter_mut() {
        s.consolidate((step / s.step) as usize);
    }
    let start = series.iter().map(|s| s.start).min()?;
    let mut end = series.iter().map(|s| s.end).max()?;
    end -= (end - start) % step;
    Some((series, start, end, step))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series_of(step: i64, values: Vec<Option<f64>>) -> TimeSeries {
        let end = step * values.len() as i64;
        TimeSeries::new("test", 0, end, step, values)
    }

    fn raw(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().map(|v| Some(*v)).collect()
    }

    #[test]
    fn test_iter_without_consolidation() {
        let s = series_of(1, raw(&[1.0, 2.0, 3.0]));
        assert_eq!(s.consolidated_values(), raw(&[1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_consolidate_average() {
        let mut s = series_of(1, (0..100).map(|i| Some(i as f64)).collect());
        s.consolidate(2);
        let consolidated = s.consolidated_values();
        assert_eq!(consolidated.len(), 50);
        assert_eq!(consolidated[0], Some(0.5));
        assert_eq!(consolidated[1], Some(2.5));
        assert_eq!(consolidated[2], Some(4.5));
    }

    #[test]
    fn test_consolidate_sum() {
        let mut s =
            series_of(1, (0..100).map(|i| Some(i as f64)).collect()).with_consolidation(ConsolidationFunc::Sum);
        s.consolidate(2);
        let consolidated = s.consolidated_values();
        assert_eq!(consolidated[0], Some(1.0));
        assert_eq!(consolidated[1], Some(5.0));
        assert_eq!(consolidated[2], Some(9.0));
    }

    #[test]
    fn test_consolidate_max_min() {
        let mut s = series_of(1, raw(&[1.0, 4.0, 2.0, 3.0])).with_consolidation(ConsolidationFunc::Max);
        s.consolidate(2);
        assert_eq!(s.consolidated_values(), vec![Some(4.0), Some(3.0)]);

        let mut s = series_of(1, raw(&[1.0, 4.0, 2.0, 3.0])).with_consolidation(ConsolidationFunc::Min);
        s.consolidate(2);
        assert_eq!(s.consolidated_values(), vec![Some(1.0), Some(2.0)]);
    }

    #[test]
    fn test_consolidate_nulls_skipped() {
        let mut s = series_of(1, vec![Some(1.0), None, None, None]);
        s.consolidate(2);
        // A half-null window averages the usable sample; an all-null
        // window consolidates to null.
        assert_eq!(s.consolidated_values(), vec![Some(1.0), None]);
    }

    #[test]
    fn test_consolidate_uneven_tail() {
        let mut s = series_of(1, raw(&[2.0, 4.0, 6.0]));
        s.consolidate(2);
        assert_eq!(s.points(), 2);
        assert_eq!(s.consolidated_values(), vec![Some(3.0), Some(6.0)]);
    }

    #[test]
    fn test_lcm() {
        assert_eq!(lcm(10, 20), 20);
        assert_eq!(lcm(20, 10), 20);
        assert_eq!(lcm(6, 4), 12);
        assert_eq!(lcm(7, 7), 7);
    }

    #[test]
    fn test_normalize_mixed_steps() {
        let fine = TimeSeries::new("fine", 0, 60, 10, vec![Some(1.0); 6]);
        let coarse = TimeSeries::new("coarse", 0, 60, 20, vec![Some(2.0); 3]);
        let (series, start, end, step) = normalize(vec![vec![fine, coarse]]).unwrap();
        assert_eq!((start, end, step), (0, 60, 20));
        assert_eq!(series[0].values_per_point(), 2);
        assert_eq!(series[1].values_per_point(), 1);
    }

    #[test]
    fn test_normalize_idempotent_on_aligned_series() {
        let a = TimeSeries::new("a", 0, 60, 10, vec![Some(1.0); 6]);
        let b = TimeSeries::new("b", 0, 60, 10, vec![Some(2.0); 6]);
        let (series, start, end, step) = normalize(vec![vec![a.clone(), b.clone()]]).unwrap();
        assert_eq!((start, end, step), (0, 60, 10));
        assert_eq!(series[0].values, a.values);
        assert_eq!(series[1].values, b.values);
        assert_eq!(series[0].values_per_point(), 1);
    }

    #[test]
    fn test_normalize_rounds_end_down() {
        let a = TimeSeries::new("a", 0, 25, 10, vec![Some(1.0); 3]);
        let (_, start, end, step) = normalize(vec![vec![a]]).unwrap();
        assert_eq!((start, end, step), (0, 20, 10));
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize(vec![]).is_none());
        assert!(normalize(vec![vec![]]).is_none());
    }

    #[test]
    fn test_consolidation_func_from_name() {
        assert_eq!(
            ConsolidationFunc::from_name("average"),
            Some(ConsolidationFunc::Average)
        );
        assert_eq!(ConsolidationFunc::from_name("sum"), Some(ConsolidationFunc::Sum));
        assert_eq!(ConsolidationFunc::from_name("bogus"), None);
    }
}
