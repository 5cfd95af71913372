//! Namespace nodes
//!
//! A node is one entry in the dotted namespace: a branch (has
//! children) or a leaf (has data via a reader). Node identity is
//! `(path, is_leaf)`; leaves with the same path from multiple backends
//! are collapsed by the resolver into one leaf backed by a
//! [`MultiReader`](crate::storage::MultiReader).

use crate::intervals::IntervalSet;
use crate::storage::reader::{FetchOptions, FetchResult, Reader};
use crate::storage::StorageResult;
use std::fmt;
use std::sync::Arc;

/// A namespace entry from a backend.
#[derive(Clone)]
pub enum Node {
    Branch(BranchNode),
    Leaf(LeafNode),
}

impl Node {
    pub fn path(&self) -> &str {
        match self {
            Node::Branch(b) => &b.path,
            Node::Leaf(l) => &l.path,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// The last path segment.
    pub fn name(&self) -> &str {
        self.path().rsplit('.').next().unwrap_or_default()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Branch(b) => f.debug_tuple("Branch").field(&b.path).finish(),
            Node::Leaf(l) => f.debug_tuple("Leaf").field(&l.path).finish(),
        }
    }
}

/// A namespace entry with children and no data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNode {
    pub path: String,
}

impl BranchNode {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// A namespace entry that owns a reader for its samples.
#[derive(Clone)]
pub struct LeafNode {
    pub path: String,
    pub reader: Arc<dyn Reader>,
    /// Set when the originating backend supports batched multi-fetch;
    /// the tag groups this leaf with its backend in the orchestrator.
    pub fetch_group: Option<String>,
}

impl LeafNode {
    pub fn new(path: impl Into<String>, reader: Arc<dyn Reader>) -> Self {
        Self {
            path: path.into(),
            reader,
            fetch_group: None,
        }
    }

    /// Builder method: tag this leaf for batched multi-fetch.
    pub fn with_fetch_group(mut self, group: impl Into<String>) -> Self {
        self.fetch_group = Some(group.into());
        self
    }

    /// The time ranges the underlying reader can answer for.
    pub fn intervals(&self) -> IntervalSet {
        self.reader.get_intervals()
    }

    /// Fetch raw samples for this leaf.
    pub async fn fetch(&self, start: i64, end: i64, opts: &FetchOptions) -> StorageResult<FetchResult> {
        tracing::debug!(path = %self.path, start, end, "leaf fetch");
        self.reader.fetch(start, end, opts).await
    }
}

impl fmt::Debug for LeafNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeafNode")
            .field("path", &self.path)
            .field("fetch_group", &self.fetch_group)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::reader::tests::StaticReader;

    #[test]
    fn test_node_accessors() {
        let branch = Node::Branch(BranchNode::new("a.b"));
        assert_eq!(branch.path(), "a.b");
        assert_eq!(branch.name(), "b");
        assert!(!branch.is_leaf());

        let leaf = Node::Leaf(LeafNode::new(
            "a.b.c",
            Arc::new(StaticReader::new(0, 10, vec![Some(1.0)])),
        ));
        assert_eq!(leaf.path(), "a.b.c");
        assert_eq!(leaf.name(), "c");
        assert!(leaf.is_leaf());
    }
}
