//! Benchmarks for allocation churn in `StablePositionAllocator`.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::time::{Duration, Instant};

use criterion::{Criterion, criterion_group, criterion_main};
use page_pool::StablePositionAllocator;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

/// Number of live ranges kept in the allocator while measuring.
const LIVE_RANGES: usize = 1000;

/// Elements per range.
const RANGE_SIZE: usize = 8;

fn prepared_allocator() -> (StablePositionAllocator<u64>, Vec<usize>) {
    let mut allocator = StablePositionAllocator::<u64>::with_capacity(LIVE_RANGES * RANGE_SIZE);

    let positions = (0..LIVE_RANGES)
        .map(|_| allocator.allocate(RANGE_SIZE))
        .collect();

    (allocator, positions)
}

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("stable_position_churn");

    group.bench_function("append_truncate", |b| {
        b.iter_custom(|iters| {
            let (mut allocator, _positions) = prepared_allocator();

            let start = Instant::now();

            for _ in 0..iters {
                let position = black_box(allocator.allocate(black_box(RANGE_SIZE)));
                allocator.free(position, RANGE_SIZE);
            }

            start.elapsed()
        });
    });

    group.bench_function("free_middle_reuse", |b| {
        b.iter_custom(|iters| {
            let (mut allocator, mut positions) = prepared_allocator();

            let start = Instant::now();

            for i in 0..iters {
                // Never the last range, so every free creates a gap.
                let slot = usize::try_from(i).unwrap() % (LIVE_RANGES - 1);

                allocator.free(positions[slot], RANGE_SIZE);
                positions[slot] = black_box(allocator.allocate(black_box(RANGE_SIZE)));
            }

            start.elapsed()
        });
    });

    group.bench_function("compact_fragmented", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;

            for _ in 0..iters {
                let mut allocator = StablePositionAllocator::<u64>::builder()
                    .initial_capacity(LIVE_RANGES * RANGE_SIZE)
                    .compaction_trigger(1.0)
                    .build();

                let positions = (0..LIVE_RANGES)
                    .map(|_| allocator.allocate(RANGE_SIZE))
                    .collect::<Vec<_>>();

                // Every range except the last becomes a gap next to another gap.
                for &position in &positions[..LIVE_RANGES - 1] {
                    allocator.free(position, RANGE_SIZE);
                }

                let start = Instant::now();
                allocator.compact_gaps();
                total += start.elapsed();

                drop(black_box(allocator));
            }

            total
        });
    });

    group.finish();
}
