//! Flush benchmarks
//!
//! Measures how the scheduler behaves as the number of watchers sharing one
//! dependency grows, and the cost of batching many writes into one flush.

use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use ripple_core::reactive::{observe, Callback, Object, Value, Watcher, WatcherOptions};
use ripple_core::scheduler::pump;

fn observed(json: serde_json::Value) -> Object {
    let value = Value::from(json);
    observe(&value);
    value.as_object().cloned().unwrap_or_default()
}

fn noop_callback() -> Callback {
    Rc::new(|new: &Value, _: &Value| {
        black_box(new);
        Ok(())
    })
}

fn fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    for watchers in [10usize, 100, 1_000] {
        group.throughput(Throughput::Elements(watchers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(watchers), &watchers, |b, &n| {
            let state = observed(json!({"count": 0}));
            let handles: Vec<Watcher> = (0..n)
                .map(|i| {
                    let source = state.clone();
                    Watcher::user(
                        format!("w{i}"),
                        Rc::new(move || Ok(source.get("count").unwrap_or_default())),
                        noop_callback(),
                        WatcherOptions::default(),
                    )
                })
                .collect();

            let mut next = 0.0;
            b.iter(|| {
                next += 1.0;
                state.assign("count", next);
                pump();
            });
            drop(handles);
        });
    }

    group.finish();
}

fn batched_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_writes");

    for writes in [1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(writes), &writes, |b, &n| {
            let state = observed(json!({"count": 0}));
            let source = state.clone();
            let _watcher = Watcher::user(
                "count",
                Rc::new(move || Ok(source.get("count").unwrap_or_default())),
                noop_callback(),
                WatcherOptions::default(),
            );

            let mut next = 0.0;
            b.iter(|| {
                for _ in 0..n {
                    next += 1.0;
                    state.assign("count", next);
                }
                pump();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, fan_out, batched_writes);
criterion_main!(benches);
