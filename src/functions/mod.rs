//! Transform function library
//!
//! A registry of named, callable transform functions plus the shared
//! helpers they are built from. Each callable consumes evaluated
//! arguments and produces time series (or a scalar) under a fixed
//! contract; multiple names may alias one implementation. The registry
//! is built once at startup and injected into the request context,
//! never reached through global state.
//!
//! # Contract
//!
//! A function receives the [`RequestContext`] and its evaluated
//! [`CallArgs`]; it may mutate and return its input series in place or
//! construct new ones. Argument extraction reports
//! [`QueryError::InvalidArguments`] with the function name; invalid
//! values are never silently coerced.

pub mod calculate;
pub mod combine;
pub mod filter;
pub mod special;
pub mod transform;

use crate::query::context::RequestContext;
use crate::query::error::{QueryError, QueryResult};
use crate::series::TimeSeries;
use futures_util::future::BoxFuture;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// An evaluated argument or return value.
#[derive(Debug, Clone)]
pub enum Value {
    Series(Vec<TimeSeries>),
    Number(f64),
    Str(String),
    Bool(bool),
}

impl Value {
    /// Short type label for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Series(_) => "series list",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "boolean",
        }
    }
}

/// A synchronous transform function.
pub type SyncFunction = fn(&RequestContext, CallArgs) -> QueryResult<Value>;

/// A transform function that awaits further fetches (bootstrap-window
/// statistics, time shifting).
pub type AsyncFunction = for<'a> fn(&'a RequestContext, CallArgs) -> BoxFuture<'a, QueryResult<Value>>;

/// One registered callable.
#[derive(Clone, Copy)]
pub enum FunctionImpl {
    Sync(SyncFunction),
    Async(AsyncFunction),
}

impl FunctionImpl {
    pub async fn call(&self, ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
        match self {
            FunctionImpl::Sync(f) => f(ctx, args),
            FunctionImpl::Async(f) => f(ctx, args).await,
        }
    }
}

/// The name -> callable mapping consulted by the evaluator.
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionImpl>,
}

impl FunctionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// A registry loaded with every built-in function.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        combine::register(&mut registry);
        transform::register(&mut registry);
        calculate::register(&mut registry);
        filter::register(&mut registry);
        special::register(&mut registry);
        registry
    }

    /// Register one implementation under one or more names.
    pub fn register(&mut self, names: &[&str], implementation: FunctionImpl) {
        for name in names {
            self.functions.insert(name.to_string(), implementation);
        }
    }

    pub fn get(&self, name: &str) -> Option<FunctionImpl> {
        self.functions.get(name).copied()
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// The evaluated arguments of one call, consumed positionally.
#[derive(Debug)]
pub struct CallArgs {
    function: String,
    args: VecDeque<Value>,
    kwargs: HashMap<String, Value>,
}

impl CallArgs {
    pub fn new(function: impl Into<String>, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Self {
        Self {
            function: function.into(),
            args: args.into(),
            kwargs: kwargs.into_iter().collect(),
        }
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn remaining(&self) -> usize {
        self.args.len()
    }

    fn error(&self, message: impl std::fmt::Display) -> QueryError {
        QueryError::InvalidArguments(format!("{}: {}", self.function, message))
    }

    /// Take the next positional argument, if any.
    pub fn next_value(&mut self) -> Option<Value> {
        self.args.pop_front()
    }

    /// Take the next positional argument as a series list.
    pub fn expect_series(&mut self) -> QueryResult<Vec<TimeSeries>> {
        match self.next_value() {
            Some(Value::Series(series)) => Ok(series),
            Some(other) => Err(self.error(format_args!(
                "expected a series list, got {}",
                other.type_name()
            ))),
            None => Err(self.error("missing series list argument")),
        }
    }

    /// Take the next positional argument as a number.
    pub fn expect_number(&mut self) -> QueryResult<f64> {
        match self.next_value() {
            Some(Value::Number(n)) => Ok(n),
            Some(other) => Err(self.error(format_args!(
                "expected a number, got {}",
                other.type_name()
            ))),
            None => Err(self.error("missing number argument")),
        }
    }

    /// Take the next positional argument as a string.
    pub fn expect_string(&mut self) -> QueryResult<String> {
        match self.next_value() {
            Some(Value::Str(s)) => Ok(s),
            Some(other) => Err(self.error(format_args!(
                "expected a string, got {}",
                other.type_name()
            ))),
            None => Err(self.error("missing string argument")),
        }
    }

    /// Next positional argument, or the named keyword argument.
    fn optional_value(&mut self, name: &str) -> Option<Value> {
        self.args.pop_front().or_else(|| self.kwargs.remove(name))
    }

    /// Optional numeric argument with a default.
    pub fn optional_number(&mut self, name: &str, default: f64) -> QueryResult<f64> {
        match self.optional_value(name) {
            None => Ok(default),
            Some(Value::Number(n)) => Ok(n),
            Some(other) => Err(self.error(format_args!(
                "'{}' expects a number, got {}",
                name,
                other.type_name()
            ))),
        }
    }

    /// Optional numeric argument with no default.
    pub fn optional_number_opt(&mut self, name: &str) -> QueryResult<Option<f64>> {
        match self.optional_value(name) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(Some(n)),
            Some(other) => Err(self.error(format_args!(
                "'{}' expects a number, got {}",
                name,
                other.type_name()
            ))),
        }
    }

    /// Optional string argument with a default.
    pub fn optional_string(&mut self, name: &str, default: &str) -> QueryResult<String> {
        match self.optional_value(name) {
            None => Ok(default.to_string()),
            Some(Value::Str(s)) => Ok(s),
            Some(other) => Err(self.error(format_args!(
                "'{}' expects a string, got {}",
                name,
                other.type_name()
            ))),
        }
    }

    /// Optional boolean argument with a default.
    pub fn optional_bool(&mut self, name: &str, default: bool) -> QueryResult<bool> {
        match self.optional_value(name) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(b),
            Some(other) => Err(self.error(format_args!(
                "'{}' expects a boolean, got {}",
                name,
                other.type_name()
            ))),
        }
    }

    /// Drain the remaining positional arguments as series lists
    /// (the `*seriesLists` shape).
    pub fn rest_series(&mut self) -> QueryResult<Vec<Vec<TimeSeries>>> {
        let mut lists = Vec::with_capacity(self.args.len());
        while let Some(value) = self.next_value() {
            match value {
                Value::Series(series) => lists.push(series),
                other => {
                    return Err(self.error(format_args!(
                        "expected series lists, got {}",
                        other.type_name()
                    )))
                }
            }
        }
        Ok(lists)
    }

    /// Drain the remaining positional arguments as numbers.
    pub fn rest_numbers(&mut self) -> QueryResult<Vec<f64>> {
        let mut numbers = Vec::with_capacity(self.args.len());
        while let Some(value) = self.next_value() {
            match value {
                Value::Number(n) => numbers.push(n),
                other => {
                    return Err(self.error(format_args!(
                        "expected numbers, got {}",
                        other.type_name()
                    )))
                }
            }
        }
        Ok(numbers)
    }
}

// Null-skipping arithmetic shared by the built-ins. A helper returns
// None when no usable sample exists, never zero.

pub fn not_none(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().filter_map(|v| *v).collect()
}

pub fn safe_sum(values: &[Option<f64>]) -> Option<f64> {
    let usable = not_none(values);
    if usable.is_empty() {
        None
    } else {
        Some(usable.iter().sum())
    }
}

pub fn safe_min(values: &[Option<f64>]) -> Option<f64> {
    not_none(values).into_iter().reduce(f64::min)
}

pub fn safe_max(values: &[Option<f64>]) -> Option<f64> {
    not_none(values).into_iter().reduce(f64::max)
}

pub fn safe_len(values: &[Option<f64>]) -> usize {
    values.iter().filter(|v| v.is_some()).count()
}

pub fn safe_avg(values: &[Option<f64>]) -> Option<f64> {
    safe_div(safe_sum(values), Some(safe_len(values) as f64))
}

pub fn safe_last(values: &[Option<f64>]) -> Option<f64> {
    values.iter().rev().find_map(|v| *v)
}

pub fn safe_div(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) if b != 0.0 => Some(a / b),
        _ => None,
    }
}

pub fn safe_mul(factors: &[Option<f64>]) -> Option<f64> {
    factors
        .iter()
        .try_fold(1.0, |product, f| f.map(|f| product * f))
}

pub fn safe_sub(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a - b),
        _ => None,
    }
}

/// First usable value minus the sum of the remaining usable values.
pub fn safe_diff(values: &[Option<f64>]) -> Option<f64> {
    let usable = not_none(values);
    let (first, rest) = usable.split_first()?;
    Some(first - rest.iter().sum::<f64>())
}

pub fn safe_abs(value: Option<f64>) -> Option<f64> {
    value.map(f64::abs)
}

pub fn safe_std_dev(values: &[Option<f64>]) -> Option<f64> {
    let usable = not_none(values);
    if usable.is_empty() {
        return None;
    }
    let avg = usable.iter().sum::<f64>() / usable.len() as f64;
    let variance = usable.iter().map(|v| (v - avg) * (v - avg)).sum::<f64>() / usable.len() as f64;
    Some(variance.sqrt())
}

/// Consolidated rows across several series, padded with nulls where a
/// series runs short.
pub(crate) fn zip_rows(series_list: &[TimeSeries]) -> Vec<Vec<Option<f64>>> {
    let columns: Vec<Vec<Option<f64>>> = series_list
        .iter()
        .map(|s| s.consolidated_values())
        .collect();
    let rows = columns.iter().map(Vec::len).max().unwrap_or(0);
    (0..rows)
        .map(|i| {
            columns
                .iter()
                .map(|col| col.get(i).copied().flatten())
                .collect()
        })
        .collect()
}

/// Comma-separated list of the unique path expressions behind a
/// series list, sorted.
pub fn format_path_expressions(series_list: &[TimeSeries]) -> String {
    let unique: BTreeSet<&str> = series_list
        .iter()
        .map(|s| s.path_expression.as_str())
        .collect();
    unique.into_iter().collect::<Vec<_>>().join(",")
}

/// Parse a relative time offset like `5min`, `1h30min`, `-7d` into
/// seconds. A leading `-` negates the whole offset.
pub fn parse_time_offset(offset: &str) -> QueryResult<i64> {
    let (sign, rest) = match offset.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, offset.strip_prefix('+').unwrap_or(offset)),
    };

    let token = Regex::new(r"(\d+)([a-zA-Z]+)")
        .map_err(|e| QueryError::Execution(format!("offset regex: {}", e)))?;
    let mut total = 0_i64;
    let mut covered = 0;
    for capture in token.captures_iter(rest) {
        let whole = capture
            .get(0)
            .ok_or_else(|| QueryError::Execution("offset capture".to_string()))?;
        if whole.start() != covered {
            break;
        }
        covered = whole.end();
        let amount: i64 = capture[1]
            .parse()
            .map_err(|_| QueryError::InvalidArguments(format!("bad time offset '{}'", offset)))?;
        total += amount * unit_seconds(&capture[2])?;
    }
    if covered != rest.len() || covered == 0 {
        return Err(QueryError::InvalidArguments(format!(
            "bad time offset '{}'",
            offset
        )));
    }
    Ok(sign * total)
}

fn unit_seconds(unit: &str) -> QueryResult<i64> {
    let unit = unit.to_ascii_lowercase();
    let seconds = if unit.starts_with('s') {
        1
    } else if unit.starts_with("min") {
        60
    } else if unit.starts_with("mon") {
        30 * 86_400
    } else if unit.starts_with('h') {
        3_600
    } else if unit.starts_with('d') {
        86_400
    } else if unit.starts_with('w') {
        7 * 86_400
    } else if unit.starts_with('y') {
        365 * 86_400
    } else {
        return Err(QueryError::InvalidArguments(format!(
            "unknown time unit '{}'",
            unit
        )));
    };
    Ok(seconds)
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::query::context::RequestContext;
    use crate::series::TimeSeries;
    use crate::storage::{MemoryFinder, Store};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    /// A context over an empty store, for functions that never fetch.
    pub fn context(start: i64, end: i64) -> RequestContext {
        context_with(MemoryFinder::new("test"), start, end)
    }

    pub fn context_with(finder: MemoryFinder, start: i64, end: i64) -> RequestContext {
        RequestContext::new(
            Arc::new(Store::new(vec![Arc::new(finder)])),
            Arc::new(super::FunctionRegistry::with_builtins()),
            Utc.timestamp_opt(start, 0).unwrap(),
            Utc.timestamp_opt(end, 0).unwrap(),
        )
    }

    pub fn series(name: &str, step: i64, values: Vec<Option<f64>>) -> TimeSeries {
        let end = step * values.len() as i64;
        TimeSeries::new(name, 0, end, step, values)
    }

    pub fn raw(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().map(|v| Some(*v)).collect()
    }
}
