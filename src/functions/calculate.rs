//! Calculation functions
//!
//! Windowed statistics and forecasting. The moving-window and
//! Holt-Winters functions re-enter the fetch pipeline: they refetch
//! the same path expressions over an earlier bootstrap window, splice
//! those samples in front of the visible range, compute over the
//! concatenation, then trim back to the original length.

use crate::functions::{
    not_none, parse_time_offset, safe_avg, CallArgs, FunctionImpl, FunctionRegistry, Value,
};
use crate::query::context::RequestContext;
use crate::query::error::{QueryError, QueryResult};
use crate::query::evaluator::{evaluate_target_with_store, paths_from_target};
use crate::query::fetch::fetch_data;
use crate::series::TimeSeries;
use futures_util::future::BoxFuture;
use std::collections::HashSet;

pub fn register(registry: &mut FunctionRegistry) {
    registry.register(&["movingAverage"], FunctionImpl::Async(moving_average));
    registry.register(&["movingMedian"], FunctionImpl::Async(moving_median));
    registry.register(&["nPercentile"], FunctionImpl::Sync(n_percentile));
    registry.register(&["holtWintersForecast"], FunctionImpl::Async(holt_winters_forecast));
    registry.register(
        &["holtWintersConfidenceBands"],
        FunctionImpl::Async(holt_winters_confidence_bands),
    );
    registry.register(
        &["holtWintersAberration"],
        FunctionImpl::Async(holt_winters_aberration),
    );
}

/// Percentile by the NIST Engineering Statistics Handbook method.
///
/// The default mode rounds the fractional rank up to an actual sample;
/// interpolated mode blends linearly between the floor rank and the
/// next sample.
pub(crate) fn get_percentile(points: &[Option<f64>], n: f64, interpolate: bool) -> Option<f64> {
    let mut sorted = not_none(points);
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if sorted.is_empty() {
        return None;
    }

    let len = sorted.len() as i64;
    let fractional_rank = (n / 100.0) * (len + 1) as f64;
    let mut rank = fractional_rank.trunc() as i64;
    let rank_fraction = fractional_rank - rank as f64;

    if !interpolate {
        rank += rank_fraction.ceil() as i64;
    }

    let mut percentile = if rank <= 0 {
        sorted[0]
    } else if rank > len {
        sorted[(len - 1) as usize]
    } else {
        sorted[(rank - 1) as usize]
    };

    if interpolate && (0..len).contains(&rank) {
        let next_value = sorted[rank as usize];
        percentile += rank_fraction * (next_value - percentile);
    }

    Some(percentile)
}

/// A constant line at the n-percentile of each series.
fn n_percentile(_ctx: &RequestContext, mut args: CallArgs) -> QueryResult<Value> {
    let series_list = args.expect_series()?;
    let n = args.expect_number()?;
    if n <= 0.0 {
        return Err(QueryError::InvalidArguments(
            "nPercentile: the requested percent must be greater than 0".to_string(),
        ));
    }

    let mut results = Vec::new();
    for series in series_list {
        let percentile = match get_percentile(&series.values, n, false) {
            Some(value) => value,
            None => continue,
        };
        let name = format!("nPercentile({}, {})", series.name, n);
        let point_count = ((series.end - series.start) / series.step).max(0) as usize;
        let result = TimeSeries::new(
            name,
            series.start,
            series.end,
            series.step,
            vec![Some(percentile); point_count],
        );
        results.push(result);
    }
    Ok(Value::Series(results))
}

/// Refetch the expressions behind `series_list` over the bootstrap
/// window directly before the visible range, and return each series
/// with the bootstrap samples spliced in front.
async fn fetch_with_bootstrap(
    ctx: &RequestContext,
    series_list: &[TimeSeries],
    seconds: i64,
) -> QueryResult<Vec<TimeSeries>> {
    let bootstrap_ctx = ctx.bootstrap(seconds);

    let mut paths = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for series in series_list {
        if seen.insert(&series.path_expression) {
            paths.extend(paths_from_target(&bootstrap_ctx, &series.path_expression)?);
        }
    }
    let data_store = fetch_data(&bootstrap_ctx, &paths).await?;

    let mut bootstrap_list = Vec::new();
    let mut evaluated: HashSet<&str> = HashSet::new();
    for series in series_list {
        if evaluated.insert(&series.path_expression) {
            bootstrap_list.extend(
                evaluate_target_with_store(&bootstrap_ctx, &series.path_expression, &data_store)
                    .await?,
            );
        }
    }

    let mut spliced = Vec::with_capacity(series_list.len());
    for (i, original) in series_list.iter().enumerate() {
        let bootstrap = bootstrap_list.get(i).ok_or_else(|| {
            QueryError::Execution(format!(
                "bootstrap fetch for '{}' returned fewer series than the visible window",
                original.path_expression
            ))
        })?;

        let mut values = Vec::with_capacity(bootstrap.len() + original.len());
        if bootstrap.step != original.step {
            // Upsample a coarser bootstrap by repetition so the
            // concatenation stays on the original step.
            let ratio = (bootstrap.step / original.step).max(1);
            for value in &bootstrap.values {
                for _ in 0..ratio {
                    values.push(*value);
                }
            }
        } else {
            values.extend_from_slice(&bootstrap.values);
        }
        values.extend_from_slice(&original.values);

        let series = TimeSeries::new(
            original.name.clone(),
            bootstrap.start,
            original.end,
            original.step,
            values,
        )
        .with_path_expression(original.path_expression.clone());
        spliced.push(series);
    }
    Ok(spliced)
}

/// Trim the bootstrap period off the front so the series matches the
/// original window again.
fn trim_bootstrap(bootstrap: &TimeSeries, original: &TimeSeries) -> TimeSeries {
    let length_limit = ((original.len() as i64 * original.step) / bootstrap.step)
        .clamp(0, bootstrap.len() as i64) as usize;
    let trim_start = bootstrap.end - length_limit as i64 * bootstrap.step;
    let values = bootstrap.values[bootstrap.len() - length_limit..].to_vec();
    TimeSeries::new(
        bootstrap.name.clone(),
        trim_start,
        bootstrap.end,
        bootstrap.step,
        values,
    )
}

/// The moving window size: a point count, or a quoted duration.
enum WindowSize {
    Points(usize),
    Interval(i64),
}

impl WindowSize {
    fn bootstrap_seconds(&self, series_list: &[TimeSeries]) -> i64 {
        match self {
            WindowSize::Interval(seconds) => *seconds,
            WindowSize::Points(points) => {
                let max_step = series_list.iter().map(|s| s.step).max().unwrap_or(1);
                max_step * *points as i64
            }
        }
    }

    fn points_for(&self, series: &TimeSeries) -> usize {
        match self {
            WindowSize::Points(points) => *points,
            WindowSize::Interval(seconds) => (*seconds / series.step).max(1) as usize,
        }
    }
}

/// Shared frame of the moving-window statistics.
async fn moving_window(
    ctx: &RequestContext,
    mut args: CallArgs,
    label: &str,
    stat: fn(&[Option<f64>]) -> Option<f64>,
) -> QueryResult<Value> {
    let series_list = args.expect_series()?;
    if series_list.is_empty() {
        return Ok(Value::Series(Vec::new()));
    }
    let (window, window_label) = match args.next_value() {
        Some(Value::Number(n)) if n >= 1.0 => (WindowSize::Points(n as usize), format!("{}", n)),
        Some(Value::Str(offset)) => {
            let seconds = parse_time_offset(&offset)?.abs();
            if seconds == 0 {
                return Err(QueryError::InvalidArguments(format!(
                    "{}: window must cover at least one second",
                    label
                )));
            }
            (WindowSize::Interval(seconds), format!("\"{}\"", offset))
        }
        Some(other) => {
            return Err(QueryError::InvalidArguments(format!(
                "{}: window must be a positive point count or a duration string, got {}",
                label,
                other.type_name()
            )))
        }
        None => {
            return Err(QueryError::InvalidArguments(format!(
                "{}: missing window argument",
                label
            )))
        }
    };

    let bootstrap_seconds = window.bootstrap_seconds(&series_list);
    let bootstraps = fetch_with_bootstrap(ctx, &series_list, bootstrap_seconds).await?;

    let mut results = Vec::with_capacity(series_list.len());
    for (series, bootstrap) in series_list.iter().zip(bootstraps.iter()) {
        let window_points = window.points_for(series);
        let name = format!("{}({},{})", label, series.name, window_label);

        let offset = bootstrap.len().saturating_sub(series.len());
        let mut values = Vec::with_capacity(series.len());
        for i in 0..series.len() {
            let hi = i + offset;
            let lo = hi.saturating_sub(window_points);
            values.push(stat(&bootstrap.values[lo..hi]));
        }
        results.push(TimeSeries::new(name, series.start, series.end, series.step, values));
    }
    Ok(Value::Series(results))
}

fn moving_average<'a>(
    ctx: &'a RequestContext,
    args: CallArgs,
) -> BoxFuture<'a, QueryResult<Value>> {
    Box::pin(moving_window(ctx, args, "movingAverage", safe_avg))
}

fn moving_median<'a>(
    ctx: &'a RequestContext,
    args: CallArgs,
) -> BoxFuture<'a, QueryResult<Value>> {
    Box::pin(moving_window(ctx, args, "movingMedian", median))
}

fn median(window: &[Option<f64>]) -> Option<f64> {
    let mut usable = not_none(window);
    if usable.is_empty() {
        return None;
    }
    usable.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(usable[usable.len() / 2])
}

// Holt-Winters triple exponential smoothing with a one-day seasonal
// period, bootstrapped from one week of prior data.

const HW_ALPHA: f64 = 0.1;
const HW_GAMMA: f64 = 0.1;
const HW_BETA: f64 = 0.0035;
const HW_SEASON_SECONDS: i64 = 24 * 60 * 60;
const HW_BOOTSTRAP_SECONDS: i64 = 7 * 24 * 60 * 60;

fn hw_intercept(actual: f64, last_season: f64, last_intercept: f64, last_slope: f64) -> f64 {
    HW_ALPHA * (actual - last_season) + (1.0 - HW_ALPHA) * (last_intercept + last_slope)
}

fn hw_slope(intercept: f64, last_intercept: f64, last_slope: f64) -> f64 {
    HW_BETA * (intercept - last_intercept) + (1.0 - HW_BETA) * last_slope
}

fn hw_seasonal(actual: f64, intercept: f64, last_season: f64) -> f64 {
    HW_GAMMA * (actual - intercept) + (1.0 - HW_GAMMA) * last_season
}

fn hw_deviation(actual: f64, prediction: Option<f64>, last_seasonal_dev: f64) -> f64 {
    let prediction = prediction.unwrap_or(0.0);
    HW_GAMMA * (actual - prediction).abs() + (1.0 - HW_GAMMA) * last_seasonal_dev
}

/// Run the smoothing over one series, producing the forecast and
/// deviation series.
pub(crate) fn holt_winters_analysis(series: &TimeSeries) -> (TimeSeries, TimeSeries) {
    let season_length = (HW_SEASON_SECONDS / series.step).max(1) as usize;

    let mut intercepts: Vec<Option<f64>> = Vec::with_capacity(series.len());
    let mut slopes: Vec<f64> = Vec::with_capacity(series.len());
    let mut seasonals: Vec<f64> = Vec::with_capacity(series.len());
    let mut predictions: Vec<Option<f64>> = Vec::with_capacity(series.len());
    let mut deviations: Vec<f64> = Vec::with_capacity(series.len());

    let seasonal_at = |store: &Vec<f64>, i: usize| -> f64 {
        i.checked_sub(season_length)
            .and_then(|j| store.get(j).copied())
            .unwrap_or(0.0)
    };

    let mut next_pred: Option<f64> = None;

    for (i, actual) in series.values.iter().enumerate() {
        let actual = match actual {
            Some(value) => *value,
            None => {
                // Missing input breaks the math; carry what we can.
                intercepts.push(None);
                slopes.push(0.0);
                seasonals.push(0.0);
                predictions.push(next_pred);
                deviations.push(0.0);
                next_pred = None;
                continue;
            }
        };

        let (last_intercept, last_slope, prediction) = if i == 0 {
            (actual, 0.0, Some(actual))
        } else {
            (
                intercepts[i - 1].unwrap_or(actual),
                slopes[i - 1],
                next_pred,
            )
        };

        let last_seasonal = seasonal_at(&seasonals, i);
        let next_last_seasonal = seasonal_at(&seasonals, i + 1);
        let last_seasonal_dev = i
            .checked_sub(season_length)
            .and_then(|j| deviations.get(j).copied())
            .unwrap_or(0.0);

        let intercept = hw_intercept(actual, last_seasonal, last_intercept, last_slope);
        let slope = hw_slope(intercept, last_intercept, last_slope);
        let seasonal = hw_seasonal(actual, intercept, last_seasonal);
        let deviation = hw_deviation(actual, prediction, last_seasonal_dev);
        next_pred = Some(intercept + slope + next_last_seasonal);

        intercepts.push(Some(intercept));
        slopes.push(slope);
        seasonals.push(seasonal);
        predictions.push(prediction);
        deviations.push(deviation);
    }

    let forecast = TimeSeries::new(
        format!("holtWintersForecast({})", series.name),
        series.start,
        series.end,
        series.step,
        predictions,
    );
    let deviation = TimeSeries::new(
        format!("holtWintersDeviation({})", series.name),
        series.start,
        series.end,
        series.step,
        deviations.into_iter().map(Some).collect(),
    );
    (forecast, deviation)
}

fn holt_winters_forecast<'a>(
    ctx: &'a RequestContext,
    mut args: CallArgs,
) -> BoxFuture<'a, QueryResult<Value>> {
    Box::pin(async move {
        let series_list = args.expect_series()?;
        let bootstraps = fetch_with_bootstrap(ctx, &series_list, HW_BOOTSTRAP_SECONDS).await?;
        let mut results = Vec::with_capacity(series_list.len());
        for (series, bootstrap) in series_list.iter().zip(bootstraps.iter()) {
            let (forecast, _) = holt_winters_analysis(bootstrap);
            results.push(trim_bootstrap(&forecast, series));
        }
        Ok(Value::Series(results))
    })
}

fn holt_winters_confidence_bands<'a>(
    ctx: &'a RequestContext,
    mut args: CallArgs,
) -> BoxFuture<'a, QueryResult<Value>> {
    Box::pin(async move {
        let series_list = args.expect_series()?;
        let delta = args.optional_number("delta", 3.0)?;
        let bands = confidence_bands(ctx, &series_list, delta).await?;
        Ok(Value::Series(bands))
    })
}

/// Lower and upper confidence bands, interleaved per input series.
async fn confidence_bands(
    ctx: &RequestContext,
    series_list: &[TimeSeries],
    delta: f64,
) -> QueryResult<Vec<TimeSeries>> {
    let bootstraps = fetch_with_bootstrap(ctx, series_list, HW_BOOTSTRAP_SECONDS).await?;
    let mut results = Vec::with_capacity(series_list.len() * 2);
    for (series, bootstrap) in series_list.iter().zip(bootstraps.iter()) {
        let (forecast, deviation) = holt_winters_analysis(bootstrap);
        let forecast = trim_bootstrap(&forecast, series);
        let deviation = trim_bootstrap(&deviation, series);

        let mut upper = Vec::with_capacity(forecast.len());
        let mut lower = Vec::with_capacity(forecast.len());
        for (f, d) in forecast.values.iter().zip(deviation.values.iter()) {
            match (f, d) {
                (Some(f), Some(d)) => {
                    upper.push(Some(f + delta * d));
                    lower.push(Some(f - delta * d));
                }
                _ => {
                    upper.push(None);
                    lower.push(None);
                }
            }
        }

        let lower_series = TimeSeries::new(
            format!("holtWintersConfidenceLower({})", series.name),
            forecast.start,
            forecast.end,
            forecast.step,
            lower,
        )
        .with_path_expression(series.path_expression.clone());
        let upper_series = TimeSeries::new(
            format!("holtWintersConfidenceUpper({})", series.name),
            forecast.start,
            forecast.end,
            forecast.step,
            upper,
        )
        .with_path_expression(series.path_expression.clone());
        results.push(lower_series);
        results.push(upper_series);
    }
    Ok(results)
}

fn holt_winters_aberration<'a>(
    ctx: &'a RequestContext,
    mut args: CallArgs,
) -> BoxFuture<'a, QueryResult<Value>> {
    Box::pin(async move {
        let series_list = args.expect_series()?;
        let delta = args.optional_number("delta", 3.0)?;

        let mut results = Vec::with_capacity(series_list.len());
        for series in &series_list {
            let bands = confidence_bands(ctx, std::slice::from_ref(series), delta).await?;
            let (lower, upper) = (&bands[0], &bands[1]);

            let mut aberration = Vec::with_capacity(series.len());
            for (i, actual) in series.values.iter().enumerate() {
                let value = match actual {
                    None => 0.0,
                    Some(actual) => {
                        let upper_bound = upper.values.get(i).copied().flatten();
                        let lower_bound = lower.values.get(i).copied().flatten();
                        if upper_bound.map_or(false, |u| *actual > u) {
                            actual - upper_bound.unwrap_or(0.0)
                        } else if lower_bound.map_or(false, |l| *actual < l) {
                            actual - lower_bound.unwrap_or(0.0)
                        } else {
                            0.0
                        }
                    }
                };
                aberration.push(Some(value));
            }

            results.push(TimeSeries::new(
                format!("holtWintersAberration({})", series.name),
                series.start,
                series.end,
                series.step,
                aberration,
            ));
        }
        Ok(Value::Series(results))
    })
}
