//! Per-request evaluation context
//!
//! Everything a render request carries through parsing, fetching and
//! evaluation: the time window, the backend store, the function
//! registry, caller-supplied template bindings, and the scratch state
//! some functions use to communicate across calls within one request.
//! The store and registry are injected here once at request start;
//! nothing in the engine reaches for global state.

use crate::functions::FunctionRegistry;
use crate::storage::{FetchOptions, Store};
use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// The context threaded through one render request.
#[derive(Clone)]
pub struct RequestContext {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// The request's notion of "now", when pinned by the caller.
    pub now: Option<DateTime<Utc>>,
    /// Display timezone; the engine itself computes in UTC.
    pub tz: FixedOffset,
    /// Caller-supplied template bindings, overriding in-target ones.
    pub template: HashMap<String, String>,
    pub request_id: Uuid,
    store: Arc<Store>,
    functions: Arc<FunctionRegistry>,
    /// Cumulative stack totals, keyed by stack name.
    total_stacks: Arc<Mutex<HashMap<String, Vec<Option<f64>>>>>,
}

impl RequestContext {
    pub fn new(
        store: Arc<Store>,
        functions: Arc<FunctionRegistry>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            start_time,
            end_time,
            now: None,
            tz: Utc.fix(),
            template: HashMap::new(),
            request_id: Uuid::new_v4(),
            store,
            functions,
            total_stacks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Builder method: pin the request's "now".
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Builder method: set the display timezone.
    pub fn with_tz(mut self, tz: FixedOffset) -> Self {
        self.tz = tz;
        self
    }

    /// Builder method: supply template binding overrides.
    pub fn with_template(mut self, template: HashMap<String, String>) -> Self {
        self.template = template;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    /// The request window as epoch seconds.
    pub fn epoch_range(&self) -> (i64, i64) {
        (self.start_time.timestamp(), self.end_time.timestamp())
    }

    /// Options handed to every backend read of this request.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            now: self.now.map(|n| n.timestamp()),
            request_id: Some(self.request_id),
        }
    }

    /// A copy of this context with the whole window shifted.
    pub fn shifted(&self, delta: Duration) -> Self {
        let mut ctx = self.clone();
        ctx.start_time = self.start_time + delta;
        ctx.end_time = self.end_time + delta;
        ctx
    }

    /// A copy of this context covering the bootstrap window directly
    /// before the visible range.
    pub fn bootstrap(&self, seconds: i64) -> Self {
        let mut ctx = self.clone();
        ctx.start_time = self.start_time - Duration::seconds(seconds);
        ctx.end_time = self.start_time;
        ctx
    }

    /// Read-modify-write access to one named cumulative stack.
    pub fn with_total_stack<R>(
        &self,
        stack_name: &str,
        f: impl FnOnce(&mut Vec<Option<f64>>) -> R,
    ) -> R {
        let mut stacks = self
            .total_stacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(stacks.entry(stack_name.to_string()).or_default())
    }
}
