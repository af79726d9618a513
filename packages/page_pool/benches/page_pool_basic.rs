//! Basic benchmarks for the page pools of the `page_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use page_pool::{ChunkedFixedPool, GrowablePagePool, StaticPool};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const PAGE_SIZE: usize = 64;
const PAGES_PER_CHUNK: usize = 256;
const CHUNK_COUNT: usize = 16;
const STATIC_PAGES: usize = 4096;

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_pool_basic");

    group.bench_function("growable_allocate_first", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(GrowablePagePool::<PAGE_SIZE>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate(black_box(PAGE_SIZE)));
            }

            start.elapsed()
        });
    });

    group.bench_function("growable_free_allocate_reuse", |b| {
        b.iter_custom(|iters| {
            let mut pool = GrowablePagePool::<PAGE_SIZE>::new();
            let mut page = pool.allocate(PAGE_SIZE);

            let start = Instant::now();

            for _ in 0..iters {
                pool.free(page);
                page = black_box(pool.allocate(black_box(PAGE_SIZE)));
            }

            start.elapsed()
        });
    });

    group.bench_function("chunked_allocate_first", |b| {
        b.iter_custom(|iters| {
            let mut pools =
                iter::repeat_with(ChunkedFixedPool::<PAGE_SIZE, CHUNK_COUNT, PAGES_PER_CHUNK>::new)
                    .take(usize::try_from(iters).unwrap())
                    .collect::<Vec<_>>();

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate(black_box(PAGE_SIZE)));
            }

            start.elapsed()
        });
    });

    group.bench_function("chunked_free_allocate_reuse", |b| {
        b.iter_custom(|iters| {
            let mut pool = ChunkedFixedPool::<PAGE_SIZE, CHUNK_COUNT, PAGES_PER_CHUNK>::new();
            let mut page = pool.allocate(PAGE_SIZE).unwrap();

            let start = Instant::now();

            for _ in 0..iters {
                // SAFETY: The page came from this pool and is freed exactly once.
                unsafe {
                    pool.free(page);
                }

                page = black_box(pool.allocate(black_box(PAGE_SIZE)).unwrap());
            }

            start.elapsed()
        });
    });

    group.bench_function("static_free_allocate_reuse", |b| {
        b.iter_custom(|iters| {
            let mut pool = StaticPool::<STATIC_PAGES, PAGE_SIZE>::new();
            let mut page = pool.allocate(PAGE_SIZE);

            let start = Instant::now();

            for _ in 0..iters {
                pool.free(page);
                page = black_box(pool.allocate(black_box(PAGE_SIZE)));
            }

            start.elapsed()
        });
    });

    group.bench_function("static_clear", |b| {
        b.iter_custom(|iters| {
            let mut pool = StaticPool::<STATIC_PAGES, PAGE_SIZE>::new();

            let start = Instant::now();

            for _ in 0..iters {
                pool.clear();
            }

            start.elapsed()
        });
    });

    group.finish();
}
