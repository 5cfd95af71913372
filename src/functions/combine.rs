//! Combine functions
//!
//! Functions reducing several series (or several wildcard series
//! lists) into one, normalized to a shared step and window first.

use crate::functions::{
    format_path_expressions, safe_avg, safe_diff, safe_max, safe_min, safe_mul, safe_std_dev,
    safe_sub, safe_sum, zip_rows, CallArgs, FunctionImpl, FunctionRegistry, Value,
};
use crate::functions::calculate::get_percentile;
use crate::query::context::RequestContext;
use crate::query::error::{QueryError, QueryResult};
use crate::series::{normalize, TimeSeries};

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(&["sumSeries", "sum"], FunctionImpl::Sync(sum_series));
    registry.register(&["averageSeries", "avg"], FunctionImpl::Sync(average_series));
    registry.register(&["minSeries"], FunctionImpl::Sync(min_series));
    registry.register(&["maxSeries"], FunctionImpl::Sync(max_series));
    registry.register(&["diffSeries"], FunctionImpl::Sync(diff_series));
    registry.register(&["multiplySeries"], FunctionImpl::Sync(multiply_series));
    registry.register(&["stddevSeries"], FunctionImpl::Sync(stddev_series));
    registry.register(&["rangeOfSeries"], FunctionImpl::Sync(range_of_series));
    registry.register(&["countSeries"], FunctionImpl::Sync(count_series));
    registry.register(&["percentileOfSeries"], FunctionImpl::Sync(percentile_of_series));
    registry.register(&["group"], FunctionImpl::Sync(group));
}

/// Shared shape of the row-reducing combiners: normalize all inputs,
/// then reduce each aligned row to one value.
fn combine(
    mut args: CallArgs,
    label: &str,
    reduce: impl Fn(&[Option<f64>]) -> Option<f64>,
) -> QueryResult<Value> {
    let series_lists = args.rest_series()?;
    let (series, start, end, step) = match normalize(series_lists) {
        Some(normalized) => normalized,
        None => return Ok(Value::Series(Vec::new())),
    };
    let name = format!("{}({})", label, format_path_expressions(&series));
    let values = zip_rows(&series).iter().map(|row| reduce(row)).collect();
    let result = TimeSeries::new(name, start, end, step, values);
    Ok(Value::Series(vec![result]))
}

fn sum_series(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    combine(args, "sumSeries", safe_sum)
}

fn average_series(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    combine(args, "averageSeries", safe_avg)
}

fn min_series(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    combine(args, "minSeries", safe_min)
}

fn max_series(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    combine(args, "maxSeries", safe_max)
}

/// First series minus the sum of the rest, per row.
fn diff_series(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    combine(args, "diffSeries", safe_diff)
}

fn stddev_series(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    combine(args, "stddevSeries", safe_std_dev)
}

fn range_of_series(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    combine(args, "rangeOfSeries", |row| {
        safe_sub(safe_max(row), safe_min(row))
    })
}

/// A constant line carrying the number of series combined.
fn count_series(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    combine(args, "countSeries", |row| Some(row.len() as f64))
}

fn multiply_series(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let series_lists = args.rest_series()?;
    let (series, start, end, step) = match normalize(series_lists) {
        Some(normalized) => normalized,
        None => return Ok(Value::Series(Vec::new())),
    };
    if series.len() == 1 {
        return Ok(Value::Series(series));
    }
    let names: Vec<&str> = series.iter().map(|s| s.name.as_str()).collect();
    let name = format!("multiplySeries({})", names.join(","));
    let values = zip_rows(&series).iter().map(|row| safe_mul(row)).collect();
    let result = TimeSeries::new(name, start, end, step, values);
    Ok(Value::Series(vec![result]))
}

/// One series holding the n-percentile taken across the inputs at
/// each point.
fn percentile_of_series(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let series_list = args.expect_series()?;
    let n = args.expect_number()?;
    let interpolate = args.optional_bool("interpolate", false)?;
    if n <= 0.0 {
        return Err(QueryError::InvalidArguments(
            "percentileOfSeries: the requested percent must be greater than 0".to_string(),
        ));
    }
    if series_list.is_empty() {
        return Ok(Value::Series(Vec::new()));
    }

    let name = format!("percentileOfSeries({},{})", series_list[0].path_expression, n);
    let (series, start, end, step) = match normalize(vec![series_list]) {
        Some(normalized) => normalized,
        None => return Ok(Value::Series(Vec::new())),
    };
    let values = zip_rows(&series)
        .iter()
        .map(|row| get_percentile(row, n, interpolate))
        .collect();
    let result = TimeSeries::new(name, start, end, step, values);
    Ok(Value::Series(vec![result]))
}

/// Concatenate any number of series lists into one, so functions that
/// take a single list can be fed several.
fn group(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let series_lists = args.rest_series()?;
    Ok(Value::Series(series_lists.into_iter().flatten().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::test_util::{context, raw, series};

    fn call(values: Vec<Value>) -> CallArgs {
        CallArgs::new("test", values, vec![])
    }

    fn single(result: QueryResult<Value>) -> TimeSeries {
        match result.unwrap() {
            Value::Series(mut list) => {
                assert_eq!(list.len(), 1);
                list.remove(0)
            }
            other => panic!("expected series, got {:?}", other),
        }
    }

    #[test]
    fn test_sum_series() {
        let ctx = context(0, 60);
        let a = series("a", 1, raw(&[1.0, 2.0, 3.0]));
        let b = series("b", 1, raw(&[10.0, 20.0, 30.0]));
        let result = single(sum_series(
            &ctx,
            call(vec![Value::Series(vec![a]), Value::Series(vec![b])]),
        ));
        assert_eq!(result.name, "sumSeries(a,b)");
        assert_eq!(result.values, raw(&[11.0, 22.0, 33.0]));
    }

    #[test]
    fn test_sum_series_skips_nulls() {
        let ctx = context(0, 60);
        let a = series("a", 1, vec![Some(1.0), None]);
        let b = series("b", 1, vec![Some(2.0), None]);
        let result = single(sum_series(
            &ctx,
            call(vec![Value::Series(vec![a, b])]),
        ));
        assert_eq!(result.values, vec![Some(3.0), None]);
    }

    #[test]
    fn test_sum_series_normalizes_steps() {
        let ctx = context(0, 60);
        let fine = series("fine", 10, raw(&[1.0, 1.0, 1.0, 1.0, 1.0, 1.0]));
        let coarse = series("coarse", 20, raw(&[10.0, 10.0, 10.0]));
        let result = single(sum_series(
            &ctx,
            call(vec![Value::Series(vec![fine]), Value::Series(vec![coarse])]),
        ));
        assert_eq!(result.step, 20);
        // The fine series consolidates (average) to 1.0 per bucket.
        assert_eq!(result.values, raw(&[11.0, 11.0, 11.0]));
    }

    #[test]
    fn test_sum_series_empty_input() {
        let ctx = context(0, 60);
        match sum_series(&ctx, call(vec![])).unwrap() {
            Value::Series(list) => assert!(list.is_empty()),
            other => panic!("expected series, got {:?}", other),
        }
    }

    #[test]
    fn test_average_and_bounds() {
        let ctx = context(0, 60);
        let a = series("a", 1, raw(&[1.0, 5.0]));
        let b = series("b", 1, raw(&[3.0, 7.0]));
        let result = single(average_series(
            &ctx,
            call(vec![Value::Series(vec![a.clone(), b.clone()])]),
        ));
        assert_eq!(result.values, raw(&[2.0, 6.0]));

        let result = single(min_series(&ctx, call(vec![Value::Series(vec![a.clone(), b.clone()])])));
        assert_eq!(result.values, raw(&[1.0, 5.0]));

        let result = single(max_series(&ctx, call(vec![Value::Series(vec![a, b])])));
        assert_eq!(result.values, raw(&[3.0, 7.0]));
    }

    #[test]
    fn test_diff_series() {
        let ctx = context(0, 60);
        let a = series("a", 1, raw(&[10.0, 10.0]));
        let b = series("b", 1, vec![Some(3.0), None]);
        let result = single(diff_series(
            &ctx,
            call(vec![Value::Series(vec![a]), Value::Series(vec![b])]),
        ));
        // A null subtrahend is skipped, not treated as zero.
        assert_eq!(result.values, raw(&[7.0, 10.0]));
    }

    #[test]
    fn test_multiply_series() {
        let ctx = context(0, 60);
        let a = series("a", 1, raw(&[2.0, 3.0]));
        let b = series("b", 1, vec![Some(4.0), None]);
        let result = single(multiply_series(
            &ctx,
            call(vec![Value::Series(vec![a]), Value::Series(vec![b])]),
        ));
        assert_eq!(result.name, "multiplySeries(a,b)");
        assert_eq!(result.values, vec![Some(8.0), None]);
    }

    #[test]
    fn test_range_and_count() {
        let ctx = context(0, 60);
        let a = series("a", 1, raw(&[1.0, 5.0]));
        let b = series("b", 1, raw(&[3.0, 1.0]));
        let result = single(range_of_series(
            &ctx,
            call(vec![Value::Series(vec![a.clone(), b.clone()])]),
        ));
        assert_eq!(result.values, raw(&[2.0, 4.0]));

        let result = single(count_series(&ctx, call(vec![Value::Series(vec![a, b])])));
        assert_eq!(result.values, raw(&[2.0, 2.0]));
    }

    #[test]
    fn test_percentile_of_series_rejects_nonpositive() {
        let ctx = context(0, 60);
        let a = series("a", 1, raw(&[1.0]));
        let err = percentile_of_series(
            &ctx,
            call(vec![Value::Series(vec![a]), Value::Number(0.0)]),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidArguments(_)));
    }

    #[test]
    fn test_percentile_of_series() {
        let ctx = context(0, 60);
        let list: Vec<TimeSeries> = (1..=10)
            .map(|i| series(&format!("s{}", i), 1, raw(&[i as f64])))
            .collect();
        let result = single(percentile_of_series(
            &ctx,
            call(vec![Value::Series(list), Value::Number(50.0)]),
        ));
        // NIST rank for 50% over 10 samples is ceil(5.5) = 6.
        assert_eq!(result.values, raw(&[6.0]));
    }

    #[test]
    fn test_group_concatenates() {
        let ctx = context(0, 60);
        let a = series("a", 1, raw(&[1.0]));
        let b = series("b", 1, raw(&[2.0]));
        match group(&ctx, call(vec![Value::Series(vec![a]), Value::Series(vec![b])])).unwrap() {
            Value::Series(list) => {
                assert_eq!(list.len(), 2);
                assert_eq!(list[0].name, "a");
                assert_eq!(list[1].name, "b");
            }
            other => panic!("expected series, got {:?}", other),
        }
    }
}
