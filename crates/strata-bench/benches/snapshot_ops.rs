//! Criterion micro-benchmarks for snapshots, wholesale copies, and hashing.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use strata_arena::Allocator;
use strata_bench::{bench_config, populated};

/// Benchmark: serialize a 10K-block allocator into a reused buffer.
fn bench_serialize_10k(c: &mut Criterion) {
    let (allocator, _) = populated(10_000, 11).unwrap();
    let mut buf = Vec::with_capacity(allocator.total_size() as usize + 64);
    c.bench_function("serialize_10k", |b| {
        b.iter(|| {
            buf.clear();
            allocator.serialize(&mut buf).unwrap();
            black_box(buf.len());
        });
    });
}

/// Benchmark: deserialize and verify a 10K-block snapshot.
fn bench_deserialize_10k(c: &mut Criterion) {
    let (allocator, _) = populated(10_000, 12).unwrap();
    let bytes = allocator.to_snapshot().unwrap();
    c.bench_function("deserialize_10k", |b| {
        b.iter(|| {
            let restored = Allocator::from_snapshot(black_box(&bytes)).unwrap();
            black_box(restored.zone_count());
        });
    });
}

/// Benchmark: copy every zone of a 10K-block allocator into a warm target.
fn bench_copy_from_10k(c: &mut Criterion) {
    let (source, _) = populated(10_000, 13).unwrap();
    let mut target = Allocator::new(bench_config()).unwrap();
    target.copy_from(&source);
    c.bench_function("copy_from_10k", |b| {
        b.iter(|| {
            target.copy_from(black_box(&source));
        });
    });
}

/// Benchmark: FNV-1a content hash over a 10K-block allocator.
fn bench_content_hash_10k(c: &mut Criterion) {
    let (allocator, _) = populated(10_000, 14).unwrap();
    c.bench_function("content_hash_10k", |b| {
        b.iter(|| black_box(allocator.content_hash()));
    });
}

criterion_group!(
    benches,
    bench_serialize_10k,
    bench_deserialize_10k,
    bench_copy_from_10k,
    bench_content_hash_10k
);
criterion_main!(benches);
