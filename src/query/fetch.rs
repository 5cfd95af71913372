//! Fetch orchestration
//!
//! Given the set of path patterns referenced by one or more parse
//! trees, resolves and fetches all of them in one batched pass before
//! any evaluation happens:
//!
//! 1. every pattern is resolved to leaf nodes via the store
//! 2. leaves of backends that support batched multi-fetch are grouped
//!    by backend; the rest fetch per node
//! 3. the batched calls and the per-node calls are all issued
//!    concurrently and joined
//! 4. raw results land in the per-request [`DataStore`] accumulator,
//!    tagged with every pattern that referenced their path
//!
//! Individual fetch failures are logged and contribute no data; they
//! never abort the request.

use crate::query::context::RequestContext;
use crate::query::error::QueryResult;
use crate::series::TimeSeries;
use crate::storage::{FetchResult, LeafNode, Node, StorageResult, TimeInfo};
use futures_util::future::{join_all, BoxFuture};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// One raw backend result, kept until evaluation turns it into series.
#[derive(Debug, Clone)]
pub struct RawFetch {
    pub time_info: TimeInfo,
    pub values: Vec<Option<f64>>,
}

/// Per-request accumulator of resolved paths and raw fetch results.
///
/// Built once by [`fetch_data`], then treated as read-only during
/// evaluation and discarded at request end.
#[derive(Debug, Default)]
pub struct DataStore {
    /// pattern -> concrete paths it resolved to
    paths: HashMap<String, BTreeSet<String>>,
    /// concrete path -> raw results (more than one only transiently,
    /// when several sources answered for the same path)
    data: HashMap<String, Vec<RawFetch>>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All concrete paths a pattern resolved to, sorted.
    pub fn get_paths(&self, path_expr: &str) -> Vec<&str> {
        self.paths
            .get(path_expr)
            .map(|paths| paths.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Record one raw result for `path`, tagged with every pattern
    /// that referenced it.
    ///
    /// An entirely empty result is suppressed when a non-empty result
    /// already exists for the same path, so an empty duplicate from
    /// another pattern reference never masks real data. The rule is
    /// order-sensitive and kept exactly as stated.
    pub fn add_data(
        &mut self,
        path: &str,
        time_info: TimeInfo,
        values: Vec<Option<f64>>,
        exprs: &[String],
    ) {
        if values.iter().all(|v| v.is_none()) {
            if let Some(existing) = self.data.get(path) {
                if existing
                    .iter()
                    .any(|d| d.values.iter().any(|v| v.is_some()))
                {
                    return;
                }
            }
        }
        for expr in exprs {
            self.paths
                .entry(expr.clone())
                .or_default()
                .insert(path.to_string());
        }
        self.data
            .entry(path.to_string())
            .or_default()
            .push(RawFetch { time_info, values });
    }

    /// Materialize every raw result for a pattern as time series.
    pub fn get_series_list(&self, path_expr: &str) -> Vec<TimeSeries> {
        let mut series_list = Vec::new();
        for path in self.get_paths(path_expr) {
            let raws = match self.data.get(path) {
                Some(raws) => raws,
                None => continue,
            };
            for raw in raws {
                let series = TimeSeries::new(
                    path,
                    raw.time_info.start,
                    raw.time_info.end,
                    raw.time_info.step,
                    raw.values.clone(),
                )
                .with_path_expression(path_expr);
                series_list.push(series);
            }
        }
        series_list
    }
}

enum FetchOutcome {
    Multi(StorageResult<(TimeInfo, HashMap<String, Vec<Option<f64>>>)>),
    Single(String, StorageResult<FetchResult>),
}

/// Resolve and fetch every pattern in one batched pass.
pub async fn fetch_data(ctx: &RequestContext, path_exprs: &[String]) -> QueryResult<DataStore> {
    let (start_time, end_time) = ctx.epoch_range();
    let opts = ctx.fetch_options();

    let mut path_to_exprs: HashMap<String, Vec<String>> = HashMap::new();
    let mut multi_nodes: HashMap<String, Vec<LeafNode>> = HashMap::new();
    let mut single_nodes: Vec<LeafNode> = Vec::new();

    for expr in path_exprs {
        let nodes = ctx
            .store()
            .find(expr, Some(start_time), Some(end_time))
            .await?;
        for node in nodes {
            let leaf = match node {
                Node::Leaf(leaf) => leaf,
                Node::Branch(_) => continue,
            };
            let first_visit = !path_to_exprs.contains_key(&leaf.path);
            path_to_exprs
                .entry(leaf.path.clone())
                .or_default()
                .push(expr.clone());
            if first_visit {
                match leaf.fetch_group.clone() {
                    Some(group) => multi_nodes.entry(group).or_default().push(leaf),
                    None => single_nodes.push(leaf),
                }
            }
        }
    }

    // One batched call per multi-fetch-capable backend plus one call
    // per remaining node, all issued concurrently and joined.
    let mut fetches: Vec<BoxFuture<'_, FetchOutcome>> = Vec::new();
    for (group, nodes) in multi_nodes {
        let finder = match ctx.store().finder_by_group(&group) {
            Some(finder) => Arc::clone(finder),
            None => {
                tracing::warn!(%group, "no registered backend advertises multi-fetch group");
                continue;
            }
        };
        let opts = opts.clone();
        fetches.push(Box::pin(async move {
            FetchOutcome::Multi(finder.fetch_multi(&nodes, start_time, end_time, &opts).await)
        }));
    }
    for node in single_nodes {
        let opts = opts.clone();
        fetches.push(Box::pin(async move {
            let result = node.fetch(start_time, end_time, &opts).await;
            FetchOutcome::Single(node.path, result)
        }));
    }

    let mut data_store = DataStore::new();
    for outcome in join_all(fetches).await {
        match outcome {
            FetchOutcome::Multi(Ok((time_info, series))) => {
                for (path, values) in series {
                    let exprs = path_to_exprs.get(&path).cloned().unwrap_or_default();
                    data_store.add_data(&path, time_info, values, &exprs);
                }
            }
            FetchOutcome::Multi(Err(error)) => {
                tracing::warn!(%error, "multi-fetch failed");
            }
            FetchOutcome::Single(path, Ok((time_info, values))) => {
                let exprs = path_to_exprs.get(&path).cloned().unwrap_or_default();
                data_store.add_data(&path, time_info, values, &exprs);
            }
            FetchOutcome::Single(path, Err(error)) => {
                tracing::warn!(%path, %error, "node fetch failed");
            }
        }
    }

    Ok(data_store)
}
