//! Criterion micro-benchmarks for allocation, free, and reallocation.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use strata_arena::Allocator;
use strata_bench::{bench_config, churn_sizes, populated};

/// Benchmark: 10K allocations into a fresh allocator.
fn bench_alloc_10k(c: &mut Criterion) {
    let sizes = churn_sizes(10_000, 1);
    c.bench_function("alloc_10k", |b| {
        b.iter_batched(
            || Allocator::new(bench_config()).unwrap(),
            |mut allocator| {
                for &size in &sizes {
                    black_box(allocator.alloc(size).unwrap());
                }
                allocator
            },
            BatchSize::LargeInput,
        );
    });
}

/// Benchmark: free-then-alloc churn against a fragmented 5K live set.
fn bench_churn_5k(c: &mut Criterion) {
    let (mut allocator, mut live) = populated(5_000, 2).unwrap();
    let sizes = churn_sizes(4096, 3);
    let mut cursor = 0usize;
    c.bench_function("churn_5k", |b| {
        b.iter(|| {
            let slot = cursor % live.len();
            allocator.free(live[slot]).unwrap();
            live[slot] = allocator.alloc(sizes[cursor % sizes.len()]).unwrap();
            cursor = cursor.wrapping_add(7919);
            black_box(live[slot]);
        });
    });
}

/// Benchmark: grow one block step by step, in place where possible.
fn bench_realloc_grow(c: &mut Criterion) {
    c.bench_function("realloc_grow_64_to_64k", |b| {
        b.iter_batched(
            || Allocator::new(bench_config()).unwrap(),
            |mut allocator| {
                let mut ptr = allocator.alloc(64).unwrap();
                let mut size = 64u32;
                while size < 64 * 1024 {
                    size += size / 2;
                    ptr = allocator.realloc(ptr, size).unwrap();
                }
                black_box(ptr);
                allocator
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_alloc_10k, bench_churn_5k, bench_realloc_grow);
criterion_main!(benches);
