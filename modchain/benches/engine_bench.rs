//! Benchmarks for fingerprinting, ranking and a cached pipeline run.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use modchain::cache::Fingerprint;
use modchain::engine::Engine;
use modchain::pipeline::{PipelineDefinition, StageSpec};
use modchain::registry::{FnModule, InMemoryRegistry, ModuleDescriptor, SelectionSignals};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

fn registry(modules: usize) -> Arc<InMemoryRegistry> {
    let registry = InMemoryRegistry::new();
    for i in 0..modules {
        let id = format!("ocr-{i:02}");
        #[allow(clippy::cast_precision_loss)]
        let reliability = 0.5 + (i as f64 / (modules as f64 * 2.0));
        registry.register(
            ModuleDescriptor::new(&id, "ocr").with_reliability(reliability),
            Arc::new(FnModule::new(id.clone(), |input: Value| Ok(input))),
        );
    }
    Arc::new(registry)
}

fn fingerprint_benchmark(c: &mut Criterion) {
    let input = json!({
        "document": "invoice-2291",
        "pages": [1, 2, 3, 4],
        "options": {"language": "en", "dpi": 300, "deskew": true}
    });

    c.bench_function("fingerprint_compute", |b| {
        b.iter(|| Fingerprint::compute(black_box("ocr"), black_box(&input), black_box("ocr-01")));
    });
}

fn ranking_benchmark(c: &mut Criterion) {
    let engine = Engine::builder(registry(16)).build().expect("default config is valid");
    let signals = SelectionSignals::new().with_text("scanned invoice from supplier");
    let excluded = HashSet::new();

    c.bench_function("rank_16_candidates", |b| {
        b.iter(|| engine.selector().rank(black_box("ocr"), &excluded, &signals));
    });
}

fn cached_run_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime starts");
    let engine = Engine::builder(registry(4)).build().expect("default config is valid");
    let definition = PipelineDefinition::new("bench").stage(StageSpec::new("ocr", "ocr"));
    let input = json!("page one");
    runtime.block_on(engine.run(&definition, input.clone()));

    c.bench_function("cached_single_stage_run", |b| {
        b.iter(|| runtime.block_on(engine.run(&definition, black_box(input.clone()))));
    });
}

criterion_group!(
    benches,
    fingerprint_benchmark,
    ranking_benchmark,
    cached_run_benchmark
);
criterion_main!(benches);
