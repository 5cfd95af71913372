//! Backend finder contract
//!
//! A finder is one registered storage backend: it resolves namespace
//! patterns to nodes and, optionally, supports fetching many of its
//! leaves in one batched call. Backends are constructed from
//! configuration at startup and registered with the
//! [`Store`](crate::storage::Store); the engine never discovers them
//! by name at runtime.

use crate::storage::node::{LeafNode, Node};
use crate::storage::reader::{FetchOptions, TimeInfo};
use crate::storage::{FindQuery, StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::HashMap;

/// One registered storage backend.
#[async_trait]
pub trait Finder: Send + Sync {
    /// Backend identity, used for logging and multi-fetch grouping.
    fn name(&self) -> &str;

    /// Resolve a pattern query to the matching branch and leaf nodes.
    async fn find_nodes(&self, query: &FindQuery) -> StorageResult<Vec<Node>>;

    /// Capability tag: a backend that can fetch many leaves in one
    /// round-trip returns a group tag here and stamps it onto the
    /// leaves it yields (see [`LeafNode::with_fetch_group`]).
    fn fetch_multi_group(&self) -> Option<&str> {
        None
    }

    /// Fetch samples for several leaves of this backend at once.
    ///
    /// Only called for backends advertising a `fetch_multi_group`.
    /// Returns one shared window plus the values per leaf path.
    async fn fetch_multi(
        &self,
        nodes: &[LeafNode],
        start: i64,
        end: i64,
        opts: &FetchOptions,
    ) -> StorageResult<(TimeInfo, HashMap<String, Vec<Option<f64>>>)> {
        let _ = (nodes, start, end, opts);
        Err(StorageError::Unsupported {
            backend: self.name().to_string(),
            capability: "fetch_multi".to_string(),
        })
    }
}
