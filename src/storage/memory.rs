//! In-memory backend
//!
//! A glob-aware namespace tree over seeded, fixed-step series. This is
//! the crate's reference backend: tests and the CLI demo run against
//! it, and it exercises both sides of the finder contract (per-node
//! readers and batched multi-fetch).

use crate::intervals::{Interval, IntervalSet};
use crate::pattern::match_entries;
use crate::storage::finder::Finder;
use crate::storage::node::{BranchNode, LeafNode, Node};
use crate::storage::reader::{FetchOptions, FetchResult, Reader, TimeInfo};
use crate::storage::{FindQuery, StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Samples for one seeded leaf.
#[derive(Debug)]
struct SeriesData {
    start: i64,
    step: i64,
    values: Vec<Option<f64>>,
}

impl SeriesData {
    fn end(&self) -> i64 {
        self.start + self.step * self.values.len() as i64
    }

    /// The sample in the bucket containing `t`, if any.
    fn sample(&self, t: i64) -> Option<f64> {
        if t < self.start || t >= self.end() {
            return None;
        }
        let i = ((t - self.start) / self.step) as usize;
        self.values.get(i).copied().flatten()
    }
}

#[derive(Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
    series: Option<Arc<SeriesData>>,
}

/// An in-memory finder over a dotted namespace of seeded series.
pub struct MemoryFinder {
    name: String,
    batched: bool,
    root: TreeNode,
    by_path: HashMap<String, Arc<SeriesData>>,
}

impl MemoryFinder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batched: false,
            root: TreeNode::default(),
            by_path: HashMap::new(),
        }
    }

    /// Builder method: advertise the batched multi-fetch capability.
    pub fn batched(mut self) -> Self {
        self.batched = true;
        self
    }

    /// Seed one leaf. Intermediate branches are created as needed.
    pub fn add_series(
        &mut self,
        path: impl Into<String>,
        start: i64,
        step: i64,
        values: Vec<Option<f64>>,
    ) {
        let path = path.into();
        let data = Arc::new(SeriesData { start, step, values });
        let mut node = &mut self.root;
        for segment in path.split('.') {
            node = node.children.entry(segment.to_string()).or_default();
        }
        node.series = Some(Arc::clone(&data));
        self.by_path.insert(path, data);
    }

    /// Builder-style [`add_series`](Self::add_series).
    pub fn with_series(
        mut self,
        path: impl Into<String>,
        start: i64,
        step: i64,
        values: Vec<Option<f64>>,
    ) -> Self {
        self.add_series(path, start, step, values);
        self
    }

    fn make_leaf(&self, path: String, data: Arc<SeriesData>) -> LeafNode {
        let leaf = LeafNode::new(
            path.clone(),
            Arc::new(MemoryReader { path, data }) as Arc<dyn Reader>,
        );
        if self.batched {
            leaf.with_fetch_group(&self.name)
        } else {
            leaf
        }
    }

    /// Recursively match `patterns` against the tree, one namespace
    /// segment per level.
    fn find_in(&self, node: &TreeNode, prefix: &str, patterns: &[&str], out: &mut Vec<Node>) {
        let (pattern, rest) = match patterns.split_first() {
            Some(split) => split,
            None => return,
        };
        let entries: Vec<&String> = node.children.keys().collect();
        for name in match_entries(&entries, pattern) {
            let child = match node.children.get(&name) {
                Some(child) => child,
                None => continue,
            };
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}.{}", prefix, name)
            };
            if rest.is_empty() {
                if let Some(data) = &child.series {
                    out.push(Node::Leaf(self.make_leaf(path.clone(), Arc::clone(data))));
                }
                if !child.children.is_empty() {
                    out.push(Node::Branch(BranchNode::new(path)));
                }
            } else {
                self.find_in(child, &path, rest, out);
            }
        }
    }
}

#[async_trait]
impl Finder for MemoryFinder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find_nodes(&self, query: &FindQuery) -> StorageResult<Vec<Node>> {
        tracing::debug!(
            finder = %self.name,
            pattern = %query.pattern,
            start = ?query.start_time,
            end = ?query.end_time,
            "find_nodes"
        );
        let patterns: Vec<&str> = query.pattern.split('.').collect();
        let mut out = Vec::new();
        self.find_in(&self.root, "", &patterns, &mut out);
        Ok(out)
    }

    fn fetch_multi_group(&self) -> Option<&str> {
        if self.batched {
            Some(&self.name)
        } else {
            None
        }
    }

    async fn fetch_multi(
        &self,
        nodes: &[LeafNode],
        start: i64,
        end: i64,
        _opts: &FetchOptions,
    ) -> StorageResult<(TimeInfo, HashMap<String, Vec<Option<f64>>>)> {
        if !self.batched {
            return Err(StorageError::Unsupported {
                backend: self.name.clone(),
                capability: "fetch_multi".to_string(),
            });
        }
        tracing::debug!(finder = %self.name, nodes = nodes.len(), start, end, "fetch_multi");

        // One shared window at the finest step among the asked leaves;
        // coarser series are sampled per bucket.
        let step = nodes
            .iter()
            .filter_map(|n| self.by_path.get(&n.path).map(|d| d.step))
            .min()
            .unwrap_or(1);
        let time_info = aligned_window(start, end, step);

        let mut series = HashMap::new();
        for node in nodes {
            let data = match self.by_path.get(&node.path) {
                Some(data) => data,
                None => {
                    return Err(StorageError::fetch(&node.path, "unknown path in multi-fetch"))
                }
            };
            let values = (time_info.start..time_info.end)
                .step_by(step as usize)
                .map(|t| data.sample(t))
                .collect();
            series.insert(node.path.clone(), values);
        }
        Ok((time_info, series))
    }
}

/// Reader over one seeded series.
struct MemoryReader {
    path: String,
    data: Arc<SeriesData>,
}

#[async_trait]
impl Reader for MemoryReader {
    fn get_intervals(&self) -> IntervalSet {
        IntervalSet::new(vec![Interval::new(self.data.start, self.data.end())])
    }

    async fn fetch(&self, start: i64, end: i64, _opts: &FetchOptions) -> StorageResult<FetchResult> {
        tracing::debug!(path = %self.path, start, end, "memory fetch");
        let step = self.data.step;
        let time_info = aligned_window(start, end, step);
        let values = (time_info.start..time_info.end)
            .step_by(step as usize)
            .map(|t| self.data.sample(t))
            .collect();
        Ok((time_info, values))
    }
}

/// Round the requested window outward to step boundaries.
fn aligned_window(start: i64, end: i64, step: i64) -> TimeInfo {
    let aligned_start = start - start.rem_euclid(step);
    let rem = end.rem_euclid(step);
    let aligned_end = if rem == 0 { end } else { end + step - rem };
    TimeInfo::new(aligned_start, aligned_end.max(aligned_start), step)
}
