use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use crate::{
    ChunkedFixedPool, DEFAULT_COMPACTION_TRIGGER, DropPolicy, GrowablePagePool,
    StablePositionAllocator, StaticPool,
};

/// Builder for creating an instance of [`GrowablePagePool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`GrowablePagePool::new()`][1] is sufficient for most use
/// cases.
///
/// # Examples
///
/// ```
/// use page_pool::{DropPolicy, GrowablePagePool};
///
/// let pool = GrowablePagePool::<128>::builder()
///     .drop_policy(DropPolicy::MustBeEmpty)
///     .reserve(64)
///     .build();
/// ```
///
/// [1]: GrowablePagePool::new
#[derive(Debug)]
#[must_use]
pub struct GrowablePagePoolBuilder<const S: usize> {
    drop_policy: DropPolicy,
    reserve: usize,
}

impl<const S: usize> GrowablePagePoolBuilder<S> {
    pub(crate) fn new() -> Self {
        Self {
            drop_policy: DropPolicy::default(),
            reserve: 0,
        }
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs whether the pool may be
    /// dropped while pages are still handed out.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Preallocates bookkeeping for this many pages. Page storage itself is still only allocated
    /// when pages are first handed out.
    pub fn reserve(mut self, pages: usize) -> Self {
        self.reserve = pages;
        self
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if the page size `S` is zero.
    #[must_use]
    pub fn build(self) -> GrowablePagePool<S> {
        GrowablePagePool::new_inner(self.drop_policy, self.reserve)
    }
}

/// Builder for creating an instance of [`ChunkedFixedPool`].
///
/// # Examples
///
/// ```
/// use page_pool::ChunkedFixedPool;
///
/// // Room for 4 chunks of 256 pages of 48 bytes each.
/// let pool = ChunkedFixedPool::<48, 4, 256>::builder().reserve(256).build();
///
/// assert_eq!(pool.capacity(), 1024);
/// ```
#[derive(Debug)]
#[must_use]
pub struct ChunkedFixedPoolBuilder<const S: usize, const N: usize, const K: usize> {
    drop_policy: DropPolicy,
    reserve: usize,
}

impl<const S: usize, const N: usize, const K: usize> ChunkedFixedPoolBuilder<S, N, K> {
    pub(crate) fn new() -> Self {
        Self {
            drop_policy: DropPolicy::default(),
            reserve: 0,
        }
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs whether the pool may be
    /// dropped while pages are still handed out.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Preallocates free list capacity for this many pages. Chunks are still only materialized
    /// when their pages are first needed.
    pub fn reserve(mut self, pages: usize) -> Self {
        self.reserve = pages;
        self
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if any of `S`, `N` or `K` is zero or if the capacity `N × K` does not fit in `u32`.
    #[must_use]
    pub fn build(self) -> ChunkedFixedPool<S, N, K> {
        ChunkedFixedPool::new_inner(self.drop_policy, self.reserve)
    }
}

/// Builder for creating an instance of [`StaticPool`].
///
/// # Examples
///
/// ```
/// use page_pool::{DropPolicy, StaticPool};
///
/// let pool = StaticPool::<16, 64>::builder()
///     .drop_policy(DropPolicy::MustBeEmpty)
///     .build();
/// ```
#[derive(Debug)]
#[must_use]
pub struct StaticPoolBuilder<const N: usize, const S: usize> {
    drop_policy: DropPolicy,
}

impl<const N: usize, const S: usize> StaticPoolBuilder<N, S> {
    pub(crate) fn new() -> Self {
        Self {
            drop_policy: DropPolicy::default(),
        }
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs whether the pool may be
    /// dropped while pages are still handed out.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool with the specified configuration, allocating storage for all `N` pages.
    ///
    /// # Panics
    ///
    /// Panics if `N` or `S` is zero.
    #[must_use]
    pub fn build(self) -> StaticPool<N, S> {
        StaticPool::new_inner(self.drop_policy)
    }
}

/// Builder for creating an instance of [`StablePositionAllocator`].
///
/// # Examples
///
/// ```
/// use page_pool::StablePositionAllocator;
///
/// let allocator = StablePositionAllocator::<u32>::builder()
///     .initial_capacity(4096)
///     .compaction_trigger(0.1)
///     .build();
/// ```
#[must_use]
pub struct StablePositionAllocatorBuilder<T> {
    initial_capacity: usize,
    compaction_trigger: f64,

    _item: PhantomData<T>,
}

impl<T> fmt::Debug for StablePositionAllocatorBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StablePositionAllocatorBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("initial_capacity", &self.initial_capacity)
            .field("compaction_trigger", &self.compaction_trigger)
            .finish()
    }
}

impl<T: Default> StablePositionAllocatorBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            initial_capacity: 0,
            compaction_trigger: DEFAULT_COMPACTION_TRIGGER,
            _item: PhantomData,
        }
    }

    /// Sets how many elements the backing sequence can hold before it first reallocates.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Sets the share of the backing sequence length that the number of gaps must reach for a
    /// free to trigger a compaction pass. Defaults to [`DEFAULT_COMPACTION_TRIGGER`].
    ///
    /// `0.0` compacts after every free that creates a gap. `1.0` only compacts automatically
    /// once every element sits in its own gap, which in practice means compaction only happens
    /// when requested.
    ///
    /// # Panics
    ///
    /// Panics if `fraction` is not within `0.0..=1.0`.
    pub fn compaction_trigger(mut self, fraction: f64) -> Self {
        assert!(
            (0.0..=1.0).contains(&fraction),
            "compaction trigger must be within 0.0..=1.0, got {fraction}"
        );

        self.compaction_trigger = fraction;
        self
    }

    /// Builds the allocator with the specified configuration.
    #[must_use]
    pub fn build(self) -> StablePositionAllocator<T> {
        StablePositionAllocator::new_inner(self.initial_capacity, self.compaction_trigger)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn growable_builder_reserve_is_not_live() {
        let pool = GrowablePagePool::<32>::builder().reserve(10).build();

        assert!(pool.is_empty());
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn chunked_builder_does_not_materialize() {
        let pool = ChunkedFixedPool::<32, 2, 4>::builder().reserve(8).build();

        assert_eq!(pool.chunk_count(), 0);
        assert_eq!(pool.capacity(), 8);
    }

    #[test]
    fn static_builder_builds_empty_pool() {
        let pool = StaticPool::<3, 32>::builder().build();

        assert!(pool.is_empty());
        assert!(pool.can_alloc());
    }

    #[test]
    #[should_panic]
    fn compaction_trigger_above_one_panics() {
        _ = StablePositionAllocator::<u32>::builder().compaction_trigger(1.5);
    }

    #[test]
    #[should_panic]
    fn compaction_trigger_nan_panics() {
        _ = StablePositionAllocator::<u32>::builder().compaction_trigger(f64::NAN);
    }

    #[test]
    fn builder_debug_names_item_type() {
        let builder = StablePositionAllocator::<u32>::builder();

        assert!(format!("{builder:?}").contains("u32"));
    }
}
