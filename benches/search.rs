//! Benchmarks for search operations.
//!
//! Measures the filtered scan and the relevance scorer across graph
//! sizes, plus the cost of a scored query that matches nothing.

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use engram::{CancelToken, EngineConfig, MemoryEngine};

const GRAPH_SIZES: &[usize] = &[100, 1_000, 10_000];

/// Builds an engine seeded with `n` entities across a few types.
fn seeded_engine(n: usize) -> MemoryEngine {
    let engine = MemoryEngine::new(EngineConfig {
        enable_persistence: false,
        max_entities: n + 1,
        ..EngineConfig::default()
    });
    let token = CancelToken::new();
    engine.initialize(&token).expect("initialize");

    let types = ["concept", "person", "technology", "project"];
    for i in 0..n {
        engine
            .create_entity(
                &token,
                &format!("entity {i}"),
                types[i % types.len()],
                vec![
                    format!("observation about machine learning topic {i}"),
                    format!("secondary note {i}"),
                ],
                None,
            )
            .expect("create entity");
    }
    engine
}

fn bench_filtered_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("filtered_scan");
    for &size in GRAPH_SIZES {
        let engine = seeded_engine(size);
        let token = CancelToken::new();

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                engine
                    .search_entities(&token, "machine learning", "concept", 50)
                    .expect("search")
            });
        });
    }
    group.finish();
}

fn bench_relevance_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("relevance_search");
    for &size in GRAPH_SIZES {
        let engine = seeded_engine(size);
        let token = CancelToken::new();

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                engine
                    .search_with_relevance(&token, "machine learning", 20)
                    .expect("search")
            });
        });
    }
    group.finish();
}

fn bench_relevance_no_match(c: &mut Criterion) {
    let engine = seeded_engine(1_000);
    let token = CancelToken::new();

    c.bench_function("relevance_no_match_1000", |b| {
        b.iter(|| {
            engine
                .search_with_relevance(&token, "zzz qqq xxx", 20)
                .expect("search")
        });
    });
}

criterion_group!(
    benches,
    bench_filtered_scan,
    bench_relevance_search,
    bench_relevance_no_match
);
criterion_main!(benches);
