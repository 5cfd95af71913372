//! Query language and evaluation pipeline
//!
//! Provides the functional query language and its resolution pipeline:
//!
//! - **ast**: the typed parse tree
//! - **parser**: parse target strings into trees
//! - **context**: the per-request evaluation context
//! - **fetch**: batched path resolution and fetching
//! - **evaluator**: two-pass tree evaluation
//!
//! # Query Language
//!
//! ```text
//! function(arg, arg, name=arg)
//! dotted.path.with.{braces,wildcards}.*
//! template(inner, positional..., name=value...)
//! ```
//!
//! # Example
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
//!         .with_series("servers.web01.cpu", 0, 60, vec![Some(0.5); 10]);
//!     let store = Arc::new(Store::new(vec![Arc::new(finder)]));
//!     let functions = Arc::new(FunctionRegistry::with_builtins());
//!
//!     let now = Utc::now();
//!     let ctx = RequestContext::new(store, functions, now - Duration::hours(1), now);
//!
//!     let series = evaluate_targets(&ctx, &["movingAverage(servers.*.cpu, 3)"]).await?;
//!     println!("{} series", series.len());
//!     Ok(())
//! }
//! ```

pub mod ast;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod fetch;
pub mod parser;

pub use ast::ParseNode;
pub use context::RequestContext;
pub use error::{QueryError, QueryResult};
pub use evaluator::{
    evaluate_target, evaluate_target_with_store, evaluate_targets, paths_from_target, BindValue,
    TemplateBindings,
};
pub use fetch::{fetch_data, DataStore, RawFetch};
pub use parser::parse_target;
