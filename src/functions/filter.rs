//! Series filter functions
//!
//! Functions that select, order or clip members of a series list by
//! simple statistics over the visible window.

use crate::functions::calculate::get_percentile;
use crate::functions::{
    safe_avg, safe_last, safe_max, safe_min, safe_sum, CallArgs, FunctionImpl, FunctionRegistry,
    Value,
};
use crate::query::context::RequestContext;
use crate::query::error::{QueryError, QueryResult};
use crate::series::TimeSeries;
use std::cmp::Ordering;

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(&["limit"], FunctionImpl::Sync(limit));
    registry.register(&["maximumAbove"], FunctionImpl::Sync(maximum_above));
    registry.register(&["maximumBelow"], FunctionImpl::Sync(maximum_below));
    registry.register(&["minimumAbove"], FunctionImpl::Sync(minimum_above));
    registry.register(&["minimumBelow"], FunctionImpl::Sync(minimum_below));
    registry.register(&["averageAbove"], FunctionImpl::Sync(average_above));
    registry.register(&["averageBelow"], FunctionImpl::Sync(average_below));
    registry.register(&["currentAbove"], FunctionImpl::Sync(current_above));
    registry.register(&["currentBelow"], FunctionImpl::Sync(current_below));
    registry.register(&["highestCurrent"], FunctionImpl::Sync(highest_current));
    registry.register(&["lowestCurrent"], FunctionImpl::Sync(lowest_current));
    registry.register(&["highestMax"], FunctionImpl::Sync(highest_max));
    registry.register(&["highestAverage"], FunctionImpl::Sync(highest_average));
    registry.register(&["lowestAverage"], FunctionImpl::Sync(lowest_average));
    registry.register(&["sortByName"], FunctionImpl::Sync(sort_by_name));
    registry.register(&["sortByTotal"], FunctionImpl::Sync(sort_by_total));
    registry.register(&["sortByMaxima"], FunctionImpl::Sync(sort_by_maxima));
    registry.register(&["sortByMinima"], FunctionImpl::Sync(sort_by_minima));
    registry.register(&["removeAboveValue"], FunctionImpl::Sync(remove_above_value));
    registry.register(&["removeBelowValue"], FunctionImpl::Sync(remove_below_value));
    registry.register(&["removeAbovePercentile"], FunctionImpl::Sync(remove_above_percentile));
    registry.register(&["removeBelowPercentile"], FunctionImpl::Sync(remove_below_percentile));
}

/// Sort key over an optional statistic; absent values sort first.
fn key_cmp(a: Option<f64>, b: Option<f64>) -> Ordering {
    let a = a.unwrap_or(f64::NEG_INFINITY);
    let b = b.unwrap_or(f64::NEG_INFINITY);
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

fn keep(
    mut args: CallArgs,
    predicate: impl Fn(&TimeSeries, f64) -> bool,
) -> QueryResult<Value> {
    let series_list = args.expect_series()?;
    let n = args.expect_number()?;
    Ok(Value::Series(
        series_list.into_iter().filter(|s| predicate(s, n)).collect(),
    ))
}

fn select(
    mut args: CallArgs,
    stat: fn(&[Option<f64>]) -> Option<f64>,
    take_highest: bool,
) -> QueryResult<Value> {
    let series_list = args.expect_series()?;
    let n = args.optional_number("n", 1.0)?.max(0.0) as usize;
    let mut sorted = series_list;
    sorted.sort_by(|a, b| key_cmp(stat(&a.values), stat(&b.values)));
    let result = if take_highest {
        let skip = sorted.len().saturating_sub(n);
        sorted.split_off(skip)
    } else {
        sorted.truncate(n);
        sorted
    };
    Ok(Value::Series(result))
}

/// Only draw the first n metrics of the list.
fn limit(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    let n = args.expect_number()?.max(0.0) as usize;
    series_list.truncate(n);
    Ok(Value::Series(series_list))
}

fn maximum_above(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    keep(args, |s, n| safe_max(&s.values).map_or(false, |m| m > n))
}

fn maximum_below(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    keep(args, |s, n| safe_max(&s.values).map_or(false, |m| m <= n))
}

fn minimum_above(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    keep(args, |s, n| safe_min(&s.values).map_or(false, |m| m > n))
}

fn minimum_below(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    keep(args, |s, n| safe_min(&s.values).map_or(false, |m| m <= n))
}

fn average_above(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    keep(args, |s, n| safe_avg(&s.values).map_or(false, |m| m >= n))
}

fn average_below(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    keep(args, |s, n| safe_avg(&s.values).map_or(false, |m| m <= n))
}

fn current_above(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    keep(args, |s, n| safe_last(&s.values).map_or(false, |m| m >= n))
}

fn current_below(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    keep(args, |s, n| safe_last(&s.values).map_or(false, |m| m <= n))
}

fn highest_current(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    select(args, safe_last, true)
}

fn lowest_current(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    select(args, safe_last, false)
}

/// The n series with the highest maximum, ordered highest first.
fn highest_max(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    let result = select(args, safe_max, true)?;
    match result {
        Value::Series(mut list) => {
            list.sort_by(|a, b| key_cmp(safe_max(&b.values), safe_max(&a.values)));
            Ok(Value::Series(list))
        }
        other => Ok(other),
    }
}

fn highest_average(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    select(args, safe_avg, true)
}

fn lowest_average(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    select(args, safe_avg, false)
}

fn sort_by_name(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    series_list.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(Value::Series(series_list))
}

/// Descending by the sum over the visible window.
fn sort_by_total(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    series_list.sort_by(|a, b| key_cmp(safe_sum(&b.values), safe_sum(&a.values)));
    Ok(Value::Series(series_list))
}

fn sort_by_maxima(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    series_list.sort_by(|a, b| key_cmp(safe_max(&a.values), safe_max(&b.values)));
    Ok(Value::Series(series_list))
}

fn sort_by_minima(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    series_list.sort_by(|a, b| key_cmp(safe_min(&a.values), safe_min(&b.values)));
    Ok(Value::Series(series_list))
}

fn clip(
    mut args: CallArgs,
    label: &str,
    remove: impl Fn(f64, f64) -> bool,
) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    let n = args.expect_number()?;
    for series in series_list.iter_mut() {
        series.name = format!("{}({}, {})", label, series.name, n);
        series.path_expression = series.name.clone();
        for value in series.values.iter_mut() {
            if let Some(v) = *value {
                if remove(v, n) {
                    *value = None;
                }
            }
        }
    }
    Ok(Value::Series(series_list))
}

fn remove_above_value(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    clip(args, "removeAboveValue", |v, n| v > n)
}

fn remove_below_value(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    clip(args, "removeBelowValue", |v, n| v < n)
}

fn clip_percentile(
    mut args: CallArgs,
    label: &str,
    remove: impl Fn(f64, f64) -> bool,
) -> QueryResult<Value> {
    let mut series_list = args.expect_series()?;
    let n = args.expect_number()?;
    if n <= 0.0 {
        return Err(QueryError::InvalidArguments(format!(
            "{}: the requested percent must be greater than 0",
            label
        )));
    }
    for series in series_list.iter_mut() {
        series.name = format!("{}({}, {})", label, series.name, n);
        series.path_expression = series.name.clone();
        let percentile = match get_percentile(&series.values, n, false) {
            Some(value) => value,
            None => continue,
        };
        for value in series.values.iter_mut() {
            if let Some(v) = *value {
                if remove(v, percentile) {
                    *value = None;
                }
            }
        }
    }
    Ok(Value::Series(series_list))
}

fn remove_above_percentile(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    clip_percentile(args, "removeAbovePercentile", |v, p| v > p)
}

fn remove_below_percentile(_ctx: &RequestContext, args: CallArgs) -> QueryResult<Value> {
    clip_percentile(args, "removeBelowPercentile", |v, p| v < p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::test_util::{context, raw, series};

    fn call(values: Vec<Value>) -> CallArgs {
        CallArgs::new("test", values, vec![])
    }

    fn fleet() -> Vec<TimeSeries> {
        vec![
            series("a", 1, raw(&[1.0, 2.0, 3.0])),
            series("b", 1, raw(&[4.0, 5.0, 6.0])),
            series("c", 1, raw(&[7.0, 8.0, 9.0])),
        ]
    }

    fn names(value: Value) -> Vec<String> {
        match value {
            Value::Series(list) => list.into_iter().map(|s| s.name).collect(),
            other => panic!("expected series, got {:?}", other),
        }
    }

    #[test]
    fn test_limit() {
        let ctx = context(0, 60);
        let result = limit(&ctx, call(vec![Value::Series(fleet()), Value::Number(2.0)])).unwrap();
        assert_eq!(names(result), vec!["a", "b"]);
    }

    #[test]
    fn test_above_below_filters() {
        let ctx = context(0, 60);
        let result =
            maximum_above(&ctx, call(vec![Value::Series(fleet()), Value::Number(6.0)])).unwrap();
        assert_eq!(names(result), vec!["c"]);

        let result =
            maximum_below(&ctx, call(vec![Value::Series(fleet()), Value::Number(6.0)])).unwrap();
        assert_eq!(names(result), vec!["a", "b"]);

        let result =
            minimum_above(&ctx, call(vec![Value::Series(fleet()), Value::Number(1.0)])).unwrap();
        assert_eq!(names(result), vec!["b", "c"]);

        let result =
            average_above(&ctx, call(vec![Value::Series(fleet()), Value::Number(5.0)])).unwrap();
        assert_eq!(names(result), vec!["b", "c"]);

        let result =
            current_above(&ctx, call(vec![Value::Series(fleet()), Value::Number(6.0)])).unwrap();
        assert_eq!(names(result), vec!["b", "c"]);
    }

    #[test]
    fn test_all_null_series_is_filtered_out() {
        let ctx = context(0, 60);
        let list = vec![series("empty", 1, vec![None, None])];
        let result =
            maximum_above(&ctx, call(vec![Value::Series(list), Value::Number(0.0)])).unwrap();
        assert!(names(result).is_empty());
    }

    #[test]
    fn test_highest_and_lowest_selectors() {
        let ctx = context(0, 60);
        let result =
            highest_current(&ctx, call(vec![Value::Series(fleet()), Value::Number(2.0)])).unwrap();
        assert_eq!(names(result), vec!["b", "c"]);

        let result =
            lowest_current(&ctx, call(vec![Value::Series(fleet()), Value::Number(2.0)])).unwrap();
        assert_eq!(names(result), vec!["a", "b"]);

        // highestMax orders highest first.
        let result =
            highest_max(&ctx, call(vec![Value::Series(fleet()), Value::Number(2.0)])).unwrap();
        assert_eq!(names(result), vec!["c", "b"]);

        // n defaults to 1.
        let result = highest_average(&ctx, call(vec![Value::Series(fleet())])).unwrap();
        assert_eq!(names(result), vec!["c"]);
    }

    #[test]
    fn test_sorters() {
        let ctx = context(0, 60);
        let shuffled = vec![
            series("b", 1, raw(&[4.0])),
            series("c", 1, raw(&[9.0])),
            series("a", 1, raw(&[1.0])),
        ];
        let result = sort_by_name(&ctx, call(vec![Value::Series(shuffled.clone())])).unwrap();
        assert_eq!(names(result), vec!["a", "b", "c"]);

        let result = sort_by_total(&ctx, call(vec![Value::Series(shuffled.clone())])).unwrap();
        assert_eq!(names(result), vec!["c", "b", "a"]);

        let result = sort_by_maxima(&ctx, call(vec![Value::Series(shuffled.clone())])).unwrap();
        assert_eq!(names(result), vec!["a", "b", "c"]);

        let result = sort_by_minima(&ctx, call(vec![Value::Series(shuffled)])).unwrap();
        assert_eq!(names(result), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_remove_above_value() {
        let ctx = context(0, 60);
        let list = vec![series("a", 1, raw(&[1.0, 5.0, 3.0]))];
        let result =
            remove_above_value(&ctx, call(vec![Value::Series(list), Value::Number(3.0)])).unwrap();
        match result {
            Value::Series(list) => {
                assert_eq!(list[0].name, "removeAboveValue(a, 3)");
                assert_eq!(list[0].values, vec![Some(1.0), None, Some(3.0)]);
            }
            other => panic!("expected series, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_below_percentile() {
        let ctx = context(0, 60);
        let list = vec![series("a", 1, (1..=10).map(|i| Some(i as f64)).collect())];
        let result = remove_below_percentile(
            &ctx,
            call(vec![Value::Series(list), Value::Number(50.0)]),
        )
        .unwrap();
        match result {
            Value::Series(list) => {
                // The 50th-percentile sample of 1..10 is 6; everything
                // below it is blanked.
                let kept = list[0].values.iter().filter(|v| v.is_some()).count();
                assert_eq!(kept, 5);
                assert_eq!(list[0].values[5], Some(6.0));
                assert_eq!(list[0].values[0], None);
            }
            other => panic!("expected series, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_percentile_rejects_nonpositive() {
        let ctx = context(0, 60);
        let list = vec![series("a", 1, raw(&[1.0]))];
        let err = remove_above_percentile(
            &ctx,
            call(vec![Value::Series(list), Value::Number(-5.0)]),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidArguments(_)));
    }
}
