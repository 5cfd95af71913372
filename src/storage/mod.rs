//! Multi-backend storage resolution
//!
//! This module provides the read contract over pluggable storage
//! backends:
//!
//! - **finder**: the backend registration contract
//! - **node**: branch/leaf namespace entries
//! - **reader**: per-leaf sample access and multi-source merging
//! - **memory**: the in-memory reference backend
//! - **error**: error types
//!
//! # Architecture
//!
//! ```text
//! Resolve Path:
//!   pattern → FindQuery → every Finder → union of Nodes
//!           → group by path → dedup → MultiReader for duplicates
//!
//! Read Path:
//!   LeafNode → Reader::fetch → (TimeInfo, values)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use carbide::storage::{MemoryFinder, Store};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let finder = MemoryFinder::new("mem")
//!         .with_series("servers.web01.cpu", 0, 60, vec![Some(0.5); 10]);
//!     let store = Store::new(vec![Arc::new(finder)]);
//!
//!     for node in store.find("servers.*.cpu", None, None).await? {
//!         println!("{}", node.path());
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod finder;
pub mod memory;
pub mod node;
pub mod reader;

// Re-export commonly used types
pub use error::{StorageError, StorageResult};
pub use finder::Finder;
pub use memory::MemoryFinder;
pub use node::{BranchNode, LeafNode, Node};
pub use reader::{FetchOptions, FetchResult, MultiReader, Reader, TimeInfo};

use crate::intervals::Interval;
use crate::pattern::is_pattern;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A node-resolution query handed to every registered backend.
#[derive(Debug, Clone)]
pub struct FindQuery {
    pub pattern: String,
    /// Lower time bound; `None` means unconstrained.
    pub start_time: Option<i64>,
    /// Upper time bound; `None` means unconstrained.
    pub end_time: Option<i64>,
    /// Whether the pattern contains wildcard or alternation syntax.
    pub is_pattern: bool,
}

impl FindQuery {
    pub fn new(pattern: impl Into<String>, start_time: Option<i64>, end_time: Option<i64>) -> Self {
        let pattern = pattern.into();
        let is_pattern = is_pattern(&pattern);
        Self {
            pattern,
            start_time,
            end_time,
            is_pattern,
        }
    }

    /// The query bounds as an interval, unbounded sides saturated.
    pub fn interval(&self) -> Interval {
        Interval::new(
            self.start_time.unwrap_or(i64::MIN),
            self.end_time.unwrap_or(i64::MAX),
        )
    }
}

impl std::fmt::Display for FindQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = |b: Option<i64>| b.map(|v| v.to_string()).unwrap_or_else(|| "*".to_string());
        write!(
            f,
            "<FindQuery: {} from {} until {}>",
            self.pattern,
            bound(self.start_time),
            bound(self.end_time)
        )
    }
}

/// The multi-backend storage resolver.
///
/// Holds the backends registered at startup and reduces their
/// overlapping views of the namespace to one node per path.
pub struct Store {
    finders: Vec<Arc<dyn Finder>>,
}

impl Store {
    pub fn new(finders: Vec<Arc<dyn Finder>>) -> Self {
        Self { finders }
    }

    pub fn finders(&self) -> &[Arc<dyn Finder>] {
        &self.finders
    }

    /// Look up the backend advertising the given multi-fetch group.
    pub fn finder_by_group(&self, group: &str) -> Option<&Arc<dyn Finder>> {
        self.finders
            .iter()
            .find(|f| f.fetch_multi_group() == Some(group))
    }

    /// Resolve a pattern against every backend, deduplicating results.
    ///
    /// Results are ordered by path ascending. For each path: a leaf
    /// wins over a branch reported by another backend; a single leaf
    /// is yielded as-is; several leaves collapse into one leaf backed
    /// by a [`MultiReader`]. Every call re-queries the backends.
    pub async fn find(
        &self,
        pattern: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> StorageResult<Vec<Node>> {
        let query = FindQuery::new(pattern, start_time, end_time);
        tracing::debug!(%query, "store find");

        let mut nodes_by_path: BTreeMap<String, Vec<Node>> = BTreeMap::new();
        for finder in &self.finders {
            for node in finder.find_nodes(&query).await? {
                nodes_by_path
                    .entry(node.path().to_string())
                    .or_default()
                    .push(node);
            }
        }

        let mut found = Vec::with_capacity(nodes_by_path.len());
        for (path, nodes) in nodes_by_path {
            let mut leaves: Vec<LeafNode> = Vec::new();
            let mut branch: Option<BranchNode> = None;
            for node in nodes {
                match node {
                    Node::Leaf(leaf) => leaves.push(leaf),
                    Node::Branch(b) => {
                        branch.get_or_insert(b);
                    }
                }
            }

            match leaves.len() {
                0 => {
                    if let Some(b) = branch {
                        found.push(Node::Branch(b));
                    }
                }
                1 => found.push(Node::Leaf(leaves.remove(0))),
                _ => {
                    let reader = Arc::new(MultiReader::new(leaves));
                    found.push(Node::Leaf(LeafNode::new(path, reader)));
                }
            }
        }
        Ok(found)
    }
}
