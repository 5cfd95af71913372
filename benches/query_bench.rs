//! Benchmarks for the Carbide query pipeline
//!
//! Run with: cargo bench

use carbide::functions::FunctionRegistry;
use carbide::pattern::{expand_braces, match_entries};
use carbide::query::{evaluate_targets, parse_target, RequestContext};
use carbide::storage::{MemoryFinder, Store};
use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

fn bench_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("parser");

    let targets = [
        ("path", "servers.web01.cpu.user"),
        ("wildcards", "servers.{web,db}*.cpu.[us]*"),
        (
            "nested_call",
            "movingAverage(sumSeries(servers.web*.cpu.user), '5min')",
        ),
        (
            "kwargs",
            "removeAbovePercentile(scale(servers.*.mem, 0.001), 95)",
        ),
    ];

    for (label, target) in targets {
        group.bench_function(label, |b| {
            b.iter(|| parse_target(black_box(target)).unwrap())
        });
    }

    group.finish();
}

fn bench_pattern(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern");

    group.bench_function("expand_braces_nested", |b| {
        b.iter(|| expand_braces(black_box("servers.{web{01,02,03},db{01,02}}.cpu")))
    });

    let entries: Vec<String> = (0..500).map(|i| format!("web{:03}", i)).collect();
    group.throughput(Throughput::Elements(entries.len() as u64));
    group.bench_function("match_entries_500", |b| {
        b.iter(|| match_entries(black_box(&entries), "web1*"))
    });

    group.finish();
}

fn bench_evaluation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("evaluation");

    // A day of minutely samples across 20 hosts.
    let mut finder = MemoryFinder::new("bench");
    for host in 0..20 {
        let values = (0..1440).map(|i| Some((i % 60) as f64)).collect();
        finder.add_series(format!("servers.web{:02}.cpu", host), 0, 60, values);
    }
    let store = Arc::new(Store::new(vec![Arc::new(finder)]));
    let functions = Arc::new(FunctionRegistry::with_builtins());

    let context = || {
        RequestContext::new(
            Arc::clone(&store),
            Arc::clone(&functions),
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.timestamp_opt(86_400, 0).unwrap(),
        )
    };

    group.bench_function("fetch_wildcard_20_hosts", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ctx = context();
                evaluate_targets(&ctx, black_box(&["servers.*.cpu"])).await.unwrap()
            })
        })
    });

    group.bench_function("sum_and_scale", |b| {
        b.iter(|| {
            rt.block_on(async {
                let ctx = context();
                evaluate_targets(&ctx, black_box(&["scale(sumSeries(servers.*.cpu), 0.05)"]))
                    .await
                    .unwrap()
            })
        })
    });

    group.finish();
}

criterion_group!(benches, bench_parser, bench_pattern, bench_evaluation);
criterion_main!(benches);
