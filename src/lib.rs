//! # Carbide
//!
//! Read-only time-series query engine: a small functional query
//! language evaluated against one or more pluggable storage backends
//! organized as a dotted hierarchical namespace.
//!
//! ## Features
//!
//! - **Query language**: nested function calls, numeric/string/boolean
//!   literals, wildcarded path expressions, templates with `$name`
//!   substitution
//! - **Multi-backend resolution**: overlapping backends deduplicate per
//!   path; redundant sources merge, preferring the finest resolution
//! - **Batched fetching**: all leaf paths of a request resolve and
//!   fetch in one concurrent pass before any evaluation
//! - **Function library**: combining, transforming, filtering and
//!   forecasting functions behind a pluggable registry
//!
//! ## Modules
//!
//! - [`pattern`]: glob and brace matching over namespace segments
//! - [`series`]: the time-series data model
//! - [`storage`]: backend contract, node resolution, multi-source merge
//! - [`query`]: grammar, fetch orchestration and evaluation
//! - [`functions`]: the transform function registry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use carbide::functions::FunctionRegistry;
//! use carbide::query::{evaluate_targets, RequestContext};
//! use carbide::storage::{MemoryFinder, Store};
//! use chrono::{Duration, Utc};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let finder = MemoryFinder::new("mem")
//!         .with_series("servers.web01.cpu", 0, 60, vec![Some(0.5); 60])
//!         .with_series("servers.web02.cpu", 0, 60, vec![Some(0.8); 60]);
//!
//!     let store = Arc::new(Store::new(vec![Arc::new(finder)]));
//!     let functions = Arc::new(FunctionRegistry::with_builtins());
//!
//!     let now = Utc::now();
//!     let ctx = RequestContext::new(store, functions, now - Duration::hours(1), now);
//!
//!     for series in evaluate_targets(&ctx, &["sumSeries(servers.*.cpu)"]).await? {
//!         println!("{}: {} points", series.name, series.len());
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod functions;
pub mod intervals;
pub mod pattern;
pub mod query;
pub mod series;
pub mod storage;

// Re-export top-level types for convenience
pub use config::{ConfigError, EngineConfig, FinderConfig, LoggingConfig, SeriesSeed};

pub use functions::{CallArgs, FunctionImpl, FunctionRegistry, Value};

pub use intervals::{Interval, IntervalSet};

pub use pattern::{expand_braces, is_pattern, match_entries};

pub use query::{
    evaluate_target, evaluate_targets, fetch_data, parse_target, DataStore, ParseNode, QueryError,
    QueryResult, RequestContext,
};

pub use series::{normalize, ConsolidationFunc, TimeSeries};

pub use storage::{
    BranchNode, FetchOptions, FindQuery, Finder, LeafNode, MemoryFinder, MultiReader, Node, Reader,
    Store, StorageError, StorageResult, TimeInfo,
};
