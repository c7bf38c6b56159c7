//! Criterion micro-benchmarks for service registry lookups.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use strata_arena::{Allocator, CachedService};
use strata_bench::bench_config;
use strata_test_utils::fixtures::{BaseStats, Counter, HeroStats, Transform};

fn registry() -> Allocator {
    let mut allocator = Allocator::new(bench_config()).unwrap();
    allocator.get_or_register_service::<Counter>().unwrap();
    allocator.get_or_register_service::<Transform>().unwrap();
    allocator.get_or_register_service::<BaseStats>().unwrap();
    allocator.get_or_register_service::<HeroStats>().unwrap();
    allocator
}

/// Benchmark: table lookup on every access.
fn bench_get_service(c: &mut Criterion) {
    let allocator = registry();
    c.bench_function("get_service", |b| {
        b.iter(|| black_box(allocator.get_service::<Transform>().unwrap().scale));
    });
}

/// Benchmark: cached handle, revalidated by stamp on every access.
fn bench_cached_service(c: &mut Criterion) {
    let allocator = registry();
    let mut cache = CachedService::<Transform>::new();
    c.bench_function("cached_service", |b| {
        b.iter(|| black_box(cache.get(&allocator).unwrap().scale));
    });
}

criterion_group!(benches, bench_get_service, bench_cached_service);
criterion_main!(benches);
