//! Special functions
//!
//! Legend aliasing, synthetic series and presentation helpers.

use crate::functions::{CallArgs, FunctionImpl, FunctionRegistry, Value};
use crate::query::context::RequestContext;
use crate::query::error::{QueryError, QueryResult};
use crate::series::TimeSeries;
use regex::Regex;

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(&["alias"], FunctionImpl::Sync(alias));
    registry.register(&["aliasSub"], FunctionImpl::Sync(alias_sub));
    registry.register(&["aliasByNode"], FunctionImpl::Sync(alias_by_node));
    registry.register(&["aliasByMetric"], FunctionImpl::Sync(alias_by_metric));
    registry.register(&["substr"], FunctionImpl::Sync(substr));
    registry.register(&["constantLine"], FunctionImpl::Sync(constant_line));
    registry.register(&["threshold"], FunctionImpl::Sync(threshold));
    registry.register(
        &["identity", "time", "timeFunction"],
        FunctionImpl::Sync(identity),
    );
    registry.register(&["isNonNull"], FunctionImpl::Sync(is_non_null));
    registry.register(&["stacked"], FunctionImpl::Sync(stacked));
}

/// Print the given string instead of the metric name in the legend.
fn alias(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    let new_name = args.expect_string()?;
    for series in series_list.iter_mut() {
        series.name = new_name.clone();
    }
    Ok(Value::Series(series_list))
}

/// Regex search-and-replace on every series name.
fn alias_sub(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    let search = args.expect_string()?;
    let replace = args.expect_string()?;
    let regex = Regex::new(&search)
        .map_err(|e| QueryError::InvalidArguments(format!("aliasSub: bad pattern: {}", e)))?;
    for series in series_list.iter_mut() {
        series.name = regex.replace_all(&series.name, replace.as_str()).into_owned();
    }
    Ok(Value::Series(series_list))
}

/// The first path-looking token inside a (possibly nested) legend
/// name, split into segments.
fn metric_pieces(name: &str) -> Vec<String> {
    let extractor = match Regex::new(r"(?:.*\()?(?P<name>[-\w*.]+)(?:,|\)?.*)?") {
        Ok(re) => re,
        Err(_) => return vec![name.to_string()],
    };
    let extracted = extractor
        .captures(name)
        .and_then(|caps| caps.name("name"))
        .map(|m| m.as_str())
        .unwrap_or(name);
    extracted.split('.').map(str::to_string).collect()
}

fn pick(pieces: &[String], index: i64) -> Option<&String> {
    let len = pieces.len() as i64;
    let index = if index < 0 { len + index } else { index };
    if (0..len).contains(&index) {
        pieces.get(index as usize)
    } else {
        None
    }
}

/// Alias each series by one or more dot-separated segments of its
/// name; indices are 0-based and may be negative.
fn alias_by_node(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    let nodes = args.rest_numbers()?;
    if nodes.is_empty() {
        return Err(QueryError::InvalidArguments(
            "aliasByNode: at least one node index is required".to_string(),
        ));
    }
    for series in series_list.iter_mut() {
        let pieces = metric_pieces(&series.name);
        let picked: Vec<&str> = nodes
            .iter()
            .filter_map(|n| pick(&pieces, *n as i64).map(String::as_str))
            .collect();
        if !picked.is_empty() {
            series.name = picked.join(".");
        }
    }
    Ok(Value::Series(series_list))
}

/// Alias each series by the base metric name (last segment).
fn alias_by_metric(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    for series in series_list.iter_mut() {
        let base = series
            .name
            .rsplit('.')
            .next()
            .and_then(|last| last.split(',').next())
            .unwrap_or(&series.name)
            .to_string();
        series.name = base;
    }
    Ok(Value::Series(series_list))
}

/// Keep only segments `start..stop` of each dotted name.
fn substr(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    let start = args.optional_number("start", 0.0)? as i64;
    let stop = args.optional_number("stop", 0.0)? as i64;

    for series in series_list.iter_mut() {
        let left = series.name.rfind('(').map(|i| i + 1).unwrap_or(0);
        let right = series.name.find(')').unwrap_or(series.name.len()).max(left);
        let pieces: Vec<String> = series.name[left..right]
            .split('.')
            .map(str::to_string)
            .collect();

        let len = pieces.len() as i64;
        let clamp = |i: i64| -> usize {
            let i = if i < 0 { len + i } else { i };
            i.clamp(0, len) as usize
        };
        let lo = clamp(start);
        let hi = if stop == 0 { len as usize } else { clamp(stop) };
        if lo < hi {
            series.name = pieces[lo..hi].join(".");
        }
        // Trim a trailing argument left over from a nested call name.
        if let Some(comma) = series.name.find(',') {
            series.name.truncate(comma);
        }
    }
    Ok(Value::Series(series_list))
}

/// A horizontal line at the given value across the request window.
fn constant_line(ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let value = args.expect_number()?;
    let (start, end) = ctx.epoch_range();
    let step = end - start;
    let series = TimeSeries::new(
        format!("{}", value),
        start,
        end,
        step,
        vec![Some(value), Some(value)],
    )
    .with_path_expression(format!("constantLine({})", value));
    Ok(Value::Series(vec![series]))
}

/// [`constant_line`] with an optional label and color.
fn threshold(ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let value = args.expect_number()?;
    let label = args.optional_string("label", "")?;
    let color = args.optional_string("color", "")?;

    let mut series_list = match constant_line(ctx, CallArgs::new("threshold", vec![Value::Number(value)], vec![]))? {
        Value::Series(list) => list,
        other => return Ok(other),
    };
    if let Some(series) = series_list.first_mut() {
        if !label.is_empty() {
            series.name = label;
        }
        if !color.is_empty() {
            series.options.insert("color".to_string(), color.into());
        }
    }
    Ok(Value::Series(series_list))
}

/// Points whose value equals their own timestamp; useful for
/// comparing a series of timestamps against time itself.
fn identity(ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let name = args.expect_string()?;
    let step = args.optional_number("step", 60.0)? as i64;
    if step <= 0 {
        return Err(QueryError::InvalidArguments(
            "identity: step must be positive".to_string(),
        ));
    }
    let (start, end) = ctx.epoch_range();
    let values = (start..end).step_by(step as usize).map(|t| Some(t as f64)).collect();
    let series = TimeSeries::new(name.clone(), start, end, step, values)
        .with_path_expression(format!("identity(\"{}\")", name));
    Ok(Value::Series(vec![series]))
}

/// 1 where a value exists, 0 where it is null.
fn is_non_null(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    for series in series_list.iter_mut() {
        series.name = format!("isNonNull({})", series.name);
        series.path_expression = series.name.clone();
        for value in series.values.iter_mut() {
            *value = Some(if value.is_some() { 1.0 } else { 0.0 });
        }
    }
    Ok(Value::Series(series_list))
}

/// Stack the given series on top of the request's running stack
/// total, so a mixed stacked/unstacked graph can be built.
fn stacked(ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let series_list = args.expect_series()?;
    let stack_name = args.optional_string("stackName", "__DEFAULT__")?;

    let results = ctx.with_total_stack(&stack_name, |total| {
        let mut results = Vec::with_capacity(series_list.len());
        for series in &series_list {
            let mut new_values = Vec::with_capacity(series.len());
            for (i, value) in series.values.iter().enumerate() {
                if total.len() <= i {
                    total.push(Some(0.0));
                }
                match value {
                    Some(v) => {
                        let stacked_value = total[i].unwrap_or(0.0) + v;
                        total[i] = Some(stacked_value);
                        new_values.push(Some(stacked_value));
                    }
                    None => new_values.push(None),
                }
            }
            let name = if stack_name == "__DEFAULT__" {
                format!("stacked({})", series.name)
            } else {
                series.name.clone()
            };
            let mut stacked_series =
                TimeSeries::new(name, series.start, series.end, series.step, new_values);
            stacked_series.options.insert("stacked".to_string(), true.into());
            results.push(stacked_series);
        }
        results
    });
    Ok(Value::Series(results))
}
