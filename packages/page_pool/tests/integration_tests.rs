//! Integration tests for the `page_pool` package.
//!
//! These exercise the allocators purely through their public API, including code that is generic
//! over [`PagePool`] and the behavior observable across allocate/free cycles.

use std::cell::Cell;
use std::ptr::NonNull;
use std::rc::Rc;
use std::thread;

use page_pool::{
    ChunkedFixedPool, DropPolicy, Error, GrowablePagePool, NO_POSITION, PAGE_ALIGN, PagePool,
    StablePositionAllocator, StaticPool,
};

fn round_trip_restores_counters<P: PagePool>(pool: &mut P) {
    // Warm up so that the pool has storage to recycle.
    let warm = pool.try_allocate(1).unwrap();

    // SAFETY: The page came from this pool and is freed exactly once.
    unsafe {
        pool.free_page(warm);
    }

    let alloc_size = pool.alloc_size();
    let freed_size = pool.freed_size();

    let page = pool.try_allocate(P::PAGE_SIZE).unwrap();

    // SAFETY: The page came from this pool and is freed exactly once.
    unsafe {
        pool.free_page(page);
    }

    assert_eq!(pool.alloc_size(), alloc_size);
    assert_eq!(pool.freed_size(), freed_size);
}

#[test]
fn round_trip_for_every_page_pool() {
    round_trip_restores_counters(&mut GrowablePagePool::<40>::new());
    round_trip_restores_counters(&mut ChunkedFixedPool::<40, 2, 3>::new());
    round_trip_restores_counters(&mut StaticPool::<3, 40>::new());
}

fn assert_fresh_page_zeroed_and_aligned<P: PagePool>(pool: &mut P) {
    let page = pool.try_allocate(P::PAGE_SIZE).unwrap();

    assert_eq!(page.as_ptr().addr() % PAGE_ALIGN, 0);

    for offset in 0..P::PAGE_SIZE {
        // SAFETY: The page is P::PAGE_SIZE bytes long and owned by the pool.
        assert_eq!(unsafe { page.add(offset).read() }, 0);
    }

    // SAFETY: The page came from this pool and is freed exactly once.
    unsafe {
        pool.free_page(page);
    }
}

#[test]
fn pages_are_zeroed_and_aligned_for_every_page_pool() {
    assert_fresh_page_zeroed_and_aligned(&mut GrowablePagePool::<33>::new());
    assert_fresh_page_zeroed_and_aligned(&mut ChunkedFixedPool::<33, 1, 4>::new());
    assert_fresh_page_zeroed_and_aligned(&mut StaticPool::<4, 33>::new());
}

#[test]
fn chunked_exhaustion_and_reuse() {
    let mut pool = ChunkedFixedPool::<16, 3, 4>::new();

    let pages: Vec<NonNull<u8>> = (0..12).map(|_| pool.allocate(16).unwrap()).collect();

    assert!(pool.is_full());
    assert!(pool.allocate(16).is_none());

    // SAFETY: The page came from this pool and is freed exactly once.
    unsafe {
        pool.free(pages[7]);
    }

    let reused = pool.allocate(16).unwrap();
    assert!(pages.contains(&reused));
    assert_eq!(reused, pages[7]);
}

#[test]
fn fall_back_from_bounded_to_growable_pool() {
    fn allocate_anywhere(
        bounded: &mut ChunkedFixedPool<8, 1, 2>,
        fallback: &mut GrowablePagePool<8>,
    ) -> (NonNull<u64>, bool) {
        match bounded.alloc(7_u64) {
            Ok(ptr) => (ptr, true),
            Err(Error::Exhausted { .. }) => (fallback.alloc(7_u64).unwrap(), false),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let mut bounded = ChunkedFixedPool::<8, 1, 2>::new();
    let mut fallback = GrowablePagePool::<8>::new();

    let placements: Vec<bool> = (0..4)
        .map(|_| allocate_anywhere(&mut bounded, &mut fallback).1)
        .collect();

    assert_eq!(placements, [true, true, false, false]);
    assert_eq!(bounded.len(), 2);
    assert_eq!(fallback.len(), 2);
}

#[test]
fn static_pool_try_allocate_reports_exhaustion() {
    let mut pool = StaticPool::<2, 8>::new();

    _ = pool.try_allocate(8).unwrap();
    _ = pool.try_allocate(8).unwrap();

    assert_eq!(pool.try_allocate(8), Err(Error::Exhausted { capacity: 2 }));
    assert_eq!(
        pool.try_allocate(9),
        Err(Error::PageTooSmall {
            requested: 9,
            page_size: 8
        })
    );
}

#[test]
fn static_pool_clear_zero_fills_every_page() {
    let mut pool = StaticPool::<8, 24>::new();

    let pages: Vec<NonNull<u8>> = (0..8).map(|_| pool.allocate(24)).collect();

    for page in &pages {
        // SAFETY: The page is 24 bytes long and nobody else uses it.
        unsafe { page.write_bytes(0xEE, 24) };
    }

    pool.clear();

    for page in &pages {
        for offset in 0..24 {
            // SAFETY: The memory still belongs to the pool, which is alive.
            assert_eq!(unsafe { page.add(offset).read() }, 0);
        }
    }

    assert!(pool.can_alloc());
    assert_eq!(pool.len(), 0);
}

#[test]
fn growable_free_unmaps_and_zeroes() {
    let mut pool = GrowablePagePool::<64>::new();

    let page = pool.allocate(64);

    // SAFETY: The page is 64 bytes long and nobody else uses it.
    unsafe { page.write_bytes(0x5A, 64) };

    pool.free(page);

    assert!(!pool.mapped(page));

    for offset in 0..64 {
        // SAFETY: The memory still belongs to the pool, which is alive.
        assert_eq!(unsafe { page.add(offset).read() }, 0);
    }
}

#[test]
fn typed_alloc_runs_destructor_exactly_once() {
    struct Tracked {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    let drops = Rc::new(Cell::new(0));
    let mut pool = StaticPool::<2, 16>::new();

    let tracked = pool
        .alloc(Tracked {
            drops: Rc::clone(&drops),
        })
        .unwrap();

    assert_eq!(drops.get(), 0);

    // SAFETY: The object came from this pool and is freed exactly once.
    unsafe {
        pool.free_typed(tracked);
    }

    assert_eq!(drops.get(), 1);
    assert!(pool.is_empty());
}

#[test]
fn pool_can_move_between_threads() {
    let mut pool = GrowablePagePool::<32>::new();
    let page = pool.allocate(32).as_ptr().addr();

    let pool = thread::spawn(move || {
        assert_eq!(pool.len(), 1);
        pool
    })
    .join()
    .unwrap();

    assert_eq!(pool.len(), 1);
    assert_ne!(page, 0);
}

#[test]
#[should_panic]
fn must_be_empty_policy_catches_leaked_page() {
    let mut pool = ChunkedFixedPool::<8, 1, 1>::builder()
        .drop_policy(DropPolicy::MustBeEmpty)
        .build();

    _ = pool.allocate(8).unwrap();
}

#[test]
fn stable_position_middle_free_reuses_position() {
    let mut allocator = StablePositionAllocator::<u32>::new();

    assert_eq!(allocator.allocate(10), 0);
    assert_eq!(allocator.allocate(5), 10);
    assert_eq!(allocator.allocate(10), 15);

    allocator.free(10, 5);

    assert_eq!(allocator.allocate(5), 10);
    assert_eq!(allocator.len(), 25);
}

#[test]
fn stable_position_tail_free_truncates() {
    let mut allocator = StablePositionAllocator::<u32>::new();

    _ = allocator.allocate(10);
    _ = allocator.allocate(5);
    _ = allocator.allocate(10);

    allocator.free(15, 10);

    assert_eq!(allocator.len(), 15);
    assert_eq!(allocator.gap_count(), 0);
}

#[test]
fn stable_position_compaction_merges_adjacent_gaps() {
    let mut allocator = StablePositionAllocator::<u32>::builder()
        .compaction_trigger(1.0)
        .build();

    _ = allocator.allocate(10);
    _ = allocator.allocate(5);
    _ = allocator.allocate(5);
    _ = allocator.allocate(10);

    allocator.free(10, 5);
    allocator.free(15, 5);
    allocator.compact_gaps();

    let gaps: Vec<(usize, usize)> = allocator
        .gaps()
        .map(|gap| (gap.position(), gap.size()))
        .collect();
    assert_eq!(gaps, [(10, 10)]);

    assert_eq!(allocator.allocate(10), 10);
    assert_eq!(allocator.len(), 30);
}

#[test]
fn stable_position_zero_count_is_sentinel() {
    let mut allocator = StablePositionAllocator::<u32>::new();

    assert_eq!(allocator.allocate(0), NO_POSITION);
    allocator.free(NO_POSITION, 0);

    assert!(allocator.is_empty());
}

#[test]
fn stable_position_stack_usage_never_creates_gaps() {
    let mut allocator = StablePositionAllocator::<u8>::new();

    let ranges: Vec<(usize, usize)> = (1..=20)
        .map(|count| (allocator.allocate(count), count))
        .collect();

    for &(position, count) in ranges.iter().rev() {
        allocator.free(position, count);
        assert_eq!(allocator.gap_count(), 0);
        assert_eq!(allocator.len(), position);
    }

    allocator.reset();
}

#[test]
fn shared_stable_position_allocates_from_many_threads() {
    let mut allocator = StablePositionAllocator::<u16>::new().into_shared();
    let shared = &allocator;

    let positions: Vec<usize> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(move || shared.allocate(4)))
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    assert_eq!(allocator.get_mut().len(), 32);

    for position in positions {
        allocator.free(position, 4);
    }

    allocator.reset();
}
