//! Reader contract and multi-source merging
//!
//! A [`Reader`] is the backend-specific object able to fetch raw
//! samples for one leaf. When the same logical leaf is visible through
//! several backends, the resolver wraps the duplicates in a
//! [`MultiReader`], which prefers the finest-resolution source and
//! fills its gaps from the coarser ones.

use crate::intervals::IntervalSet;
use crate::storage::node::LeafNode;
use crate::storage::{StorageError, StorageResult};
use async_trait::async_trait;
use uuid::Uuid;

/// The window metadata of one raw fetch: `(start, end, step)` in epoch
/// seconds, with values covering `start..end` at `step` spacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInfo {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

impl TimeInfo {
    pub fn new(start: i64, end: i64, step: i64) -> Self {
        Self { start, end, step }
    }
}

/// A raw fetch result: the window and one optional sample per slot.
pub type FetchResult = (TimeInfo, Vec<Option<f64>>);

/// Options threaded from the request into every backend read.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// The request's notion of "now", when pinned by the caller.
    pub now: Option<i64>,
    /// Id of the originating render request, for log correlation.
    pub request_id: Option<Uuid>,
}

/// Backend-specific sample access for one leaf.
#[async_trait]
pub trait Reader: Send + Sync {
    /// The time ranges this reader can actually answer for.
    fn get_intervals(&self) -> IntervalSet;

    /// Fetch raw samples covering `[start, end)`.
    async fn fetch(&self, start: i64, end: i64, opts: &FetchOptions) -> StorageResult<FetchResult>;
}

/// A reader that merges results from several underlying leaves
/// claiming the same logical path.
pub struct MultiReader {
    nodes: Vec<LeafNode>,
}

impl MultiReader {
    pub fn new(nodes: Vec<LeafNode>) -> Self {
        Self { nodes }
    }

    pub fn nodes(&self) -> &[LeafNode] {
        &self.nodes
    }

    /// Merge two fetch results. The finer-resolution result wins per
    /// slot; the coarser one fills the gaps, sampled at the bucket
    /// containing each output timestamp.
    fn merge(results1: FetchResult, results2: FetchResult) -> FetchResult {
        // Ensure results1 is finer than results2.
        let (results1, results2) = if results1.0.step > results2.0.step {
            (results2, results1)
        } else {
            (results1, results2)
        };
        let (time_info1, values1) = results1;
        let (time_info2, values2) = results2;

        let step = time_info1.step;
        let start = time_info1.start.min(time_info2.start);
        let end = time_info1.end.max(time_info2.end);

        let sample = |time_info: &TimeInfo, values: &[Option<f64>], t: i64| -> Option<f64> {
            if t < time_info.start {
                return None;
            }
            let i = ((t - time_info.start) / time_info.step) as usize;
            values.get(i).copied().flatten()
        };

        let mut values = Vec::with_capacity(((end - start) / step) as usize);
        let mut t = start;
        while t < end {
            let v = sample(&time_info1, &values1, t).or_else(|| sample(&time_info2, &values2, t));
            values.push(v);
            t += step;
        }

        (TimeInfo::new(start, end, step), values)
    }
}

#[async_trait]
impl Reader for MultiReader {
    fn get_intervals(&self) -> IntervalSet {
        self.nodes
            .iter()
            .fold(IntervalSet::default(), |acc, node| acc.union(&node.intervals()))
    }

    async fn fetch(&self, start: i64, end: i64, opts: &FetchOptions) -> StorageResult<FetchResult> {
        let mut merged: Option<FetchResult> = None;

        for node in &self.nodes {
            match node.reader.fetch(start, end, opts).await {
                Ok(result) => {
                    merged = Some(match merged.take() {
                        None => result,
                        Some(data) => Self::merge(data, result),
                    });
                }
                Err(error) => {
                    tracing::error!(path = %node.path, %error, "sub-fetch failed");
                }
            }
        }

        merged.ok_or_else(|| {
            StorageError::AllSourcesFailed(
                self.nodes
                    .first()
                    .map(|n| n.path.clone())
                    .unwrap_or_default(),
            )
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::intervals::Interval;
    use std::sync::Arc;

    /// A reader over a fixed window of samples, for tests.
    pub(crate) struct StaticReader {
        pub start: i64,
        pub step: i64,
        pub values: Vec<Option<f64>>,
        pub fail: bool,
    }

    impl StaticReader {
        pub fn new(start: i64, step: i64, values: Vec<Option<f64>>) -> Self {
            Self {
                start,
                step,
                values,
                fail: false,
            }
        }

        pub fn failing() -> Self {
            Self {
                start: 0,
                step: 1,
                values: Vec::new(),
                fail: true,
            }
        }

        fn end(&self) -> i64 {
            self.start + self.step * self.values.len() as i64
        }
    }

    #[async_trait]
    impl Reader for StaticReader {
        fn get_intervals(&self) -> IntervalSet {
            IntervalSet::new(vec![Interval::new(self.start, self.end())])
        }

        async fn fetch(
            &self,
            _start: i64,
            _end: i64,
            _opts: &FetchOptions,
        ) -> StorageResult<FetchResult> {
            if self.fail {
                return Err(StorageError::fetch("static", "injected failure"));
            }
            Ok((
                TimeInfo::new(self.start, self.end(), self.step),
                self.values.clone(),
            ))
        }
    }

    fn leaf(path: &str, reader: StaticReader) -> LeafNode {
        LeafNode::new(path, Arc::new(reader))
    }

    #[tokio::test]
    async fn test_merge_prefers_finer_and_fills_gaps() {
        // Fine series (step=10) has a hole at t=10; the coarse series
        // (step=20) covers that slot with 5.
        let fine = StaticReader::new(0, 10, vec![Some(1.0), None, Some(3.0), Some(4.0)]);
        let coarse = StaticReader::new(0, 20, vec![Some(5.0), Some(6.0)]);

        let reader = MultiReader::new(vec![leaf("a.b", fine), leaf("a.b", coarse)]);
        let (time_info, values) = reader.fetch(0, 40, &FetchOptions::default()).await.unwrap();

        assert_eq!(time_info, TimeInfo::new(0, 40, 10));
        assert_eq!(values, vec![Some(1.0), Some(5.0), Some(3.0), Some(4.0)]);
    }

    #[tokio::test]
    async fn test_merge_order_independent() {
        let fine = StaticReader::new(0, 10, vec![Some(1.0), None, Some(3.0), Some(4.0)]);
        let coarse = StaticReader::new(0, 20, vec![Some(5.0), Some(6.0)]);

        // Coarse source listed first; the finer one must still win.
        let reader = MultiReader::new(vec![leaf("a.b", coarse), leaf("a.b", fine)]);
        let (_, values) = reader.fetch(0, 40, &FetchOptions::default()).await.unwrap();
        assert_eq!(values, vec![Some(1.0), Some(5.0), Some(3.0), Some(4.0)]);
    }

    #[tokio::test]
    async fn test_merge_extends_window() {
        let early = StaticReader::new(0, 10, vec![Some(1.0), Some(2.0)]);
        let late = StaticReader::new(20, 10, vec![Some(3.0), Some(4.0)]);

        let reader = MultiReader::new(vec![leaf("a.b", early), leaf("a.b", late)]);
        let (time_info, values) = reader.fetch(0, 40, &FetchOptions::default()).await.unwrap();

        assert_eq!(time_info, TimeInfo::new(0, 40, 10));
        assert_eq!(values, vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[tokio::test]
    async fn test_single_failure_is_tolerated() {
        let good = StaticReader::new(0, 10, vec![Some(1.0)]);
        let reader = MultiReader::new(vec![leaf("a.b", StaticReader::failing()), leaf("a.b", good)]);

        let (_, values) = reader.fetch(0, 10, &FetchOptions::default()).await.unwrap();
        assert_eq!(values, vec![Some(1.0)]);
    }

    #[tokio::test]
    async fn test_all_failures_error() {
        let reader = MultiReader::new(vec![
            leaf("a.b", StaticReader::failing()),
            leaf("a.b", StaticReader::failing()),
        ]);

        let err = reader.fetch(0, 10, &FetchOptions::default()).await.unwrap_err();
        assert!(matches!(err, StorageError::AllSourcesFailed(_)));
    }

    #[tokio::test]
    async fn test_intervals_union() {
        let reader = MultiReader::new(vec![
            leaf("a.b", StaticReader::new(0, 10, vec![Some(1.0); 2])),
            leaf("a.b", StaticReader::new(30, 10, vec![Some(1.0); 2])),
        ]);
        assert_eq!(
            reader.get_intervals().intervals(),
            &[Interval::new(0, 20), Interval::new(30, 50)]
        );
    }
}
