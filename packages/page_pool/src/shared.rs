use parking_lot::{Mutex, MutexGuard};

use crate::StablePositionAllocator;

/// A [`StablePositionAllocator`] that several threads can allocate from at the same time.
///
/// Only [`allocate()`][Self::allocate] takes `&self` and synchronizes through an internal mutex.
/// Freeing, compacting and accessing the backing sequence take `&mut self`, which means they
/// cannot overlap with any allocation or with each other. Share the allocator by reference
/// (e.g. via scoped threads) while allocating, then regain exclusive access for the rest.
///
/// # Example
///
/// ```
/// use std::thread;
///
/// use page_pool::StablePositionAllocator;
///
/// let mut particles = StablePositionAllocator::<u64>::new().into_shared();
///
/// let (a, b) = thread::scope(|s| {
///     let a = s.spawn(|| particles.allocate(16));
///     let b = s.spawn(|| particles.allocate(16));
///     (a.join().unwrap(), b.join().unwrap())
/// });
///
/// assert_ne!(a, b);
/// assert_eq!(particles.get_mut().len(), 32);
///
/// particles.free(a, 16);
/// particles.free(b, 16);
/// particles.reset();
/// ```
#[derive(Debug)]
pub struct SharedStablePositionAllocator<T> {
    inner: Mutex<StablePositionAllocator<T>>,
}

impl<T: Default> SharedStablePositionAllocator<T> {
    #[must_use]
    pub(crate) fn new(inner: StablePositionAllocator<T>) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Allocates a contiguous range of `count` elements and returns the position of the first.
    ///
    /// The internal lock is held for the duration of the call.
    ///
    /// See [`StablePositionAllocator::allocate()`].
    #[must_use]
    pub fn allocate(&self, count: usize) -> usize {
        self.inner.lock().allocate(count)
    }

    /// See [`StablePositionAllocator::free()`].
    pub fn free(&mut self, first: usize, count: usize) {
        self.inner.get_mut().free(first, count);
    }

    /// See [`StablePositionAllocator::compact_gaps()`].
    pub fn compact_gaps(&mut self) {
        self.inner.get_mut().compact_gaps();
    }

    /// See [`StablePositionAllocator::reset()`].
    pub fn reset(&mut self) {
        self.inner.get_mut().reset();
    }
}

impl<T> SharedStablePositionAllocator<T> {
    /// Exclusive access to the inner allocator without taking the lock.
    #[must_use]
    pub fn get_mut(&mut self) -> &mut StablePositionAllocator<T> {
        self.inner.get_mut()
    }

    /// Takes the lock and gives access to the inner allocator for as long as the guard lives.
    ///
    /// Other threads calling [`allocate()`][Self::allocate] wait until the guard is dropped.
    pub fn lock(&self) -> MutexGuard<'_, StablePositionAllocator<T>> {
        self.inner.lock()
    }

    /// Unwraps the inner allocator.
    #[must_use]
    pub fn into_inner(self) -> StablePositionAllocator<T> {
        self.inner.into_inner()
    }
}

impl<T: Default> From<StablePositionAllocator<T>> for SharedStablePositionAllocator<T> {
    fn from(inner: StablePositionAllocator<T>) -> Self {
        Self::new(inner)
    }
}

impl<T: Default> Default for SharedStablePositionAllocator<T> {
    fn default() -> Self {
        Self::new(StablePositionAllocator::new())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::thread;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(SharedStablePositionAllocator<u32>: Send, Sync);
    assert_impl_all!(SharedStablePositionAllocator<Cell<u32>>: Send, Sync);
    assert_not_impl_any!(SharedStablePositionAllocator<*const u8>: Send, Sync);

    #[test]
    fn concurrent_allocations_never_overlap() {
        const THREADS: usize = 4;
        const PER_THREAD: usize = 50;

        let mut allocator = StablePositionAllocator::<u8>::new().into_shared();

        let shared = &allocator;

        let mut positions: Vec<usize> = thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    s.spawn(move || {
                        (0..PER_THREAD)
                            .map(|_| shared.allocate(3))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect()
        });

        positions.sort_unstable();

        assert_eq!(positions.len(), THREADS * PER_THREAD);
        assert!(positions.windows(2).all(|pair| pair[1] - pair[0] == 3));
        assert_eq!(allocator.get_mut().len(), THREADS * PER_THREAD * 3);
    }

    #[test]
    fn free_and_reset_through_wrapper() {
        let mut allocator = SharedStablePositionAllocator::<u32>::default();

        let a = allocator.allocate(5);
        let b = allocator.allocate(5);

        allocator.free(a, 5);
        allocator.free(b, 5);
        allocator.compact_gaps();
        allocator.reset();

        assert!(allocator.into_inner().is_empty());
    }

    #[test]
    fn lock_gives_access_to_data() {
        let allocator = SharedStablePositionAllocator::from(StablePositionAllocator::<u32>::new());
        let position = allocator.allocate(2);

        allocator.lock()[position] = 9;

        assert_eq!(allocator.lock().data(), [9, 0]);
    }
}
