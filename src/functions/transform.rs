//! Transform functions
//!
//! Per-series value transformations. Most of these rename the series
//! they touch so the output legend reflects the applied pipeline.

use crate::functions::{parse_time_offset, safe_div, CallArgs, FunctionImpl, FunctionRegistry, Value};
use crate::query::context::RequestContext;
use crate::query::error::{QueryError, QueryResult};
use crate::query::evaluator::evaluate_target;
use crate::series::{ConsolidationFunc, TimeSeries};
use chrono::Duration;
use futures_util::future::BoxFuture;

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(&["scale"], FunctionImpl::Sync(scale));
    registry.register(&["scaleToSeconds"], FunctionImpl::Sync(scale_to_seconds));
    registry.register(&["offset"], FunctionImpl::Sync(offset));
    registry.register(&["invert"], FunctionImpl::Sync(invert));
    registry.register(&["absolute"], FunctionImpl::Sync(absolute));
    registry.register(&["derivative"], FunctionImpl::Sync(derivative));
    registry.register(&["nonNegativeDerivative"], FunctionImpl::Sync(non_negative_derivative));
    registry.register(&["perSecond"], FunctionImpl::Sync(per_second));
    registry.register(&["integral"], FunctionImpl::Sync(integral));
    registry.register(&["log", "logarithm"], FunctionImpl::Sync(logarithm));
    registry.register(&["transformNull"], FunctionImpl::Sync(transform_null));
    registry.register(&["keepLastValue"], FunctionImpl::Sync(keep_last_value));
    registry.register(&["changed"], FunctionImpl::Sync(changed));
    registry.register(&["consolidateBy"], FunctionImpl::Sync(consolidate_by));
    registry.register(&["cumulative"], FunctionImpl::Sync(cumulative));
    registry.register(&["timeShift"], FunctionImpl::Async(time_shift));
}

fn rename(series: &mut TimeSeries, name: String) {
    series.name = name.clone();
    series.path_expression = name;
}

fn scale(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    let factor = args.expect_number()?;
    for series in series_list.iter_mut() {
        rename(series, format!("scale({},{})", series.name, factor));
        for value in series.values.iter_mut() {
            *value = value.map(|v| v * factor);
        }
    }
    Ok(Value::Series(series_list))
}

/// Value-per-second rates scaled to value-per-`seconds`.
fn scale_to_seconds(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    let seconds = args.expect_number()?;
    for series in series_list.iter_mut() {
        rename(series, format!("scaleToSeconds({},{})", series.name, seconds));
        let factor = seconds / series.step as f64;
        for value in series.values.iter_mut() {
            *value = value.map(|v| v * factor);
        }
    }
    Ok(Value::Series(series_list))
}

fn offset(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    let factor = args.expect_number()?;
    for series in series_list.iter_mut() {
        rename(series, format!("offset({},{})", series.name, factor));
        for value in series.values.iter_mut() {
            *value = value.map(|v| v + factor);
        }
    }
    Ok(Value::Series(series_list))
}

fn invert(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    for series in series_list.iter_mut() {
        rename(series, format!("invert({})", series.name));
        for value in series.values.iter_mut() {
            *value = safe_div(Some(1.0), *value);
        }
    }
    Ok(Value::Series(series_list))
}

fn absolute(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    for series in series_list.iter_mut() {
        rename(series, format!("absolute({})", series.name));
        for value in series.values.iter_mut() {
            *value = value.map(f64::abs);
        }
    }
    Ok(Value::Series(series_list))
}

/// Delta between subsequent points; the inverse of [`integral`].
fn derivative(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let series_list = args.expect_series()?;
    let mut results = Vec::with_capacity(series_list.len());
    for series in series_list {
        let mut new_values = Vec::with_capacity(series.len());
        let mut prev: Option<f64> = None;
        for value in &series.values {
            new_values.push(match (prev, value) {
                (Some(p), Some(v)) => Some(v - p),
                _ => None,
            });
            prev = *value;
        }
        let name = format!("derivative({})", series.name);
        results.push(TimeSeries::new(name, series.start, series.end, series.step, new_values));
    }
    Ok(Value::Series(results))
}

/// Like [`derivative`] but treats decreases as counter wraps.
fn non_negative_derivative(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let series_list = args.expect_series()?;
    let max_value = args.optional_number_opt("maxValue")?;

    let mut results = Vec::with_capacity(series_list.len());
    for series in series_list {
        let mut new_values = Vec::with_capacity(series.len());
        let mut prev: Option<f64> = None;
        for value in &series.values {
            new_values.push(counter_delta(prev, *value, max_value));
            prev = *value;
        }
        let name = format!("nonNegativeDerivative({})", series.name);
        results.push(TimeSeries::new(name, series.start, series.end, series.step, new_values));
    }
    Ok(Value::Series(results))
}

fn per_second(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let series_list = args.expect_series()?;
    let max_value = args.optional_number_opt("maxValue")?;

    let mut results = Vec::with_capacity(series_list.len());
    for series in series_list {
        let step = series.step as f64;
        let mut new_values = Vec::with_capacity(series.len());
        let mut prev: Option<f64> = None;
        for value in &series.values {
            new_values.push(counter_delta(prev, *value, max_value).map(|d| d / step));
            prev = *value;
        }
        let name = format!("perSecond({})", series.name);
        results.push(TimeSeries::new(name, series.start, series.end, series.step, new_values));
    }
    Ok(Value::Series(results))
}

/// Counter-aware delta: a decrease is a wrap when `max_value` covers
/// it, otherwise unknown.
fn counter_delta(prev: Option<f64>, value: Option<f64>, max_value: Option<f64>) -> Option<f64> {
    let (prev, value) = match (prev, value) {
        (Some(p), Some(v)) => (p, v),
        _ => return None,
    };
    let diff = value - prev;
    if diff >= 0.0 {
        Some(diff)
    } else {
        match max_value {
            Some(max) if max >= value => Some((max - prev) + value + 1.0),
            _ => None,
        }
    }
}

/// Running sum over time; nulls stay null but do not reset the total.
fn integral(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let series_list = args.expect_series()?;
    let mut results = Vec::with_capacity(series_list.len());
    for series in series_list {
        let mut new_values = Vec::with_capacity(series.len());
        let mut current = 0.0;
        for value in &series.values {
            match value {
                None => new_values.push(None),
                Some(v) => {
                    current += v;
                    new_values.push(Some(current));
                }
            }
        }
        let name = format!("integral({})", series.name);
        results.push(TimeSeries::new(name, series.start, series.end, series.step, new_values));
    }
    Ok(Value::Series(results))
}

fn logarithm(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    let base = args.optional_number("base", 10.0)?;
    if base <= 0.0 || base == 1.0 {
        return Err(QueryError::InvalidArguments(format!(
            "log: invalid base {}",
            base
        )));
    }
    for series in series_list.iter_mut() {
        rename(series, format!("log({}, {})", series.name, base));
        for value in series.values.iter_mut() {
            *value = match *value {
                Some(v) if v > 0.0 => Some(v.log(base)),
                _ => None,
            };
        }
    }
    Ok(Value::Series(series_list))
}

fn transform_null(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    let default = args.optional_number("default", 0.0)?;
    for series in series_list.iter_mut() {
        rename(series, format!("transformNull({},{})", series.name, default));
        for value in series.values.iter_mut() {
            if value.is_none() {
                *value = Some(default);
            }
        }
    }
    Ok(Value::Series(series_list))
}

/// Continue the line with the last received value across gaps of up
/// to `limit` consecutive nulls.
fn keep_last_value(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    let limit = args.optional_number("limit", f64::INFINITY)?;
    for series in series_list.iter_mut() {
        rename(series, format!("keepLastValue({})", series.name));

        let len = series.len();
        let mut consecutive = 0usize;
        for i in 1..len {
            if series.values[i].is_none() {
                consecutive += 1;
            } else {
                if consecutive > 0 && consecutive as f64 <= limit {
                    let fill = series.values[i - consecutive - 1];
                    for j in (i - consecutive)..i {
                        series.values[j] = fill;
                    }
                }
                consecutive = 0;
            }
        }
        // Backfill a trailing gap that stayed under the limit.
        if consecutive > 0 && (consecutive as f64) < limit {
            let fill = series.values[len - consecutive - 1];
            for j in (len - consecutive)..len {
                series.values[j] = fill;
            }
        }
    }
    Ok(Value::Series(series_list))
}

/// 1 where the value changed from the previous point, else 0.
fn changed(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    for series in series_list.iter_mut() {
        rename(series, format!("changed({})", series.name));
        let mut previous: Option<f64> = None;
        for i in 0..series.len() {
            let value = series.values[i];
            series.values[i] = match (previous, value) {
                (Some(p), Some(v)) if p != v => Some(1.0),
                _ => Some(0.0),
            };
            previous = value;
        }
    }
    Ok(Value::Series(series_list))
}

fn consolidate_by(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let series_list = args.expect_series()?;
    let func_name = args.expect_string()?;
    apply_consolidation(series_list, &func_name)
}

/// Alias for `consolidateBy(series, 'sum')`.
fn cumulative(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let series_list = args.expect_series()?;
    apply_consolidation(series_list, "sum")
}

fn apply_consolidation(mut series_list: Vec<TimeSeries>, func_name: &str) -> QueryResult<Value> {
    let func = ConsolidationFunc::from_name(func_name).ok_or_else(|| {
        QueryError::InvalidArguments(format!(
            "consolidateBy: invalid consolidation function '{}'",
            func_name
        ))
    })?;
    for series in series_list.iter_mut() {
        series.consolidation_func = func;
        rename(series, format!("consolidateBy({},\"{}\")", series.name, func));
    }
    Ok(Value::Series(series_list))
}

/// Draw the selected metrics shifted in time. Re-evaluates the
/// underlying expression over the shifted window, then maps the
/// result back onto the visible range.
fn time_shift<'a>(ctx: &'a RequestContext, mut args: CallArgs) -> BoxFuture<'a, QueryResult<Value>> {
    Box::pin(async move {
        let series_list = args.expect_series()?;
        let mut shift = args.expect_string()?;
        let reset_end = args.optional_bool("resetEnd", true)?;

        // A bare offset shifts into the past.
        if !shift.starts_with('-') && !shift.starts_with('+') {
            shift = format!("-{}", shift);
        }
        let delta = parse_time_offset(&shift)?;

        let mut results = Vec::new();
        let reference = match series_list.first() {
            Some(series) => series,
            None => return Ok(Value::Series(results)),
        };

        let shifted_ctx = ctx.shifted(Duration::seconds(delta));
        for mut shifted in evaluate_target(&shifted_ctx, &reference.path_expression).await? {
            shifted.name = format!("timeShift({}, \"{}\")", shifted.name, shift);
            if reset_end {
                shifted.end = reference.end;
            } else {
                shifted.end = shifted.end - shifted.start + reference.start;
            }
            shifted.start = reference.start;
            results.push(shifted);
        }
        Ok(Value::Series(results))
    })
}
