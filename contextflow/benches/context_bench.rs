//! Benchmarks for plugin resolution and run preparation.

use contextflow::context::ContextConfig;
use contextflow::manager::ContextManager;
use contextflow::registry::ContextRegistry;
use contextflow::testing::{Journal, RecordingContext};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::sync::Arc;

const PLUGINS: i32 = 32;

fn registry() -> Arc<ContextRegistry> {
    let journal = Journal::new();
    let registry = Arc::new(ContextRegistry::new());
    for i in 0..PLUGINS {
        let plugin = RecordingContext::new(format!("ctx_{i:02}"), (PLUGINS - i) * 10, &journal);
        registry.register(Arc::new(plugin)).unwrap();
    }
    registry
}

fn resolve_benchmark(c: &mut Criterion) {
    let registry = registry();

    c.bench_function("resolve_on_platform", |b| {
        b.iter(|| black_box(registry.resolve(black_box("ctx_17"), "test", false)))
    });

    c.bench_function("resolve_default_fallback_miss", |b| {
        b.iter(|| black_box(registry.resolve(black_box("absent"), "openstack", true)))
    });
}

fn prepare_benchmark(c: &mut Criterion) {
    let manager = ContextManager::for_task(registry(), "test");
    let config: ContextConfig = (0..PLUGINS)
        .map(|i| (format!("ctx_{i:02}"), json!({})))
        .collect();

    c.bench_function("prepare_32_contexts", |b| {
        b.iter(|| black_box(manager.prepare(black_box(&config)).map(|stack| stack.len())))
    });
}

criterion_group!(benches, resolve_benchmark, prepare_benchmark);
criterion_main!(benches);
