use std::ptr::NonNull;
use std::thread;

use num_integer::Integer;
use tracing::{trace, warn};

use crate::{DropPolicy, Error, PagePool, RawBlock, Result, StaticPoolBuilder, page_stride};

/// A page pool with a fixed capacity of `N` pages of `S` bytes, backed by one contiguous block.
///
/// All storage is allocated when the pool is created and the pool never grows. Pages are handed
/// out in ascending order until the block is used up, after which only freed pages can be handed
/// out again, most recently freed first.
///
/// Unlike [`ChunkedFixedPool`][crate::ChunkedFixedPool], running out of pages is a contract
/// violation here: check [`can_alloc()`][Self::can_alloc] first, or go through
/// [`PagePool::try_allocate()`] to get an error instead of a panic.
///
/// # Example
///
/// ```
/// use page_pool::StaticPool;
///
/// let mut pool = StaticPool::<2, 32>::new();
///
/// let a = pool.allocate(32);
/// let b = pool.allocate(16);
/// assert!(!pool.can_alloc());
///
/// pool.free(a);
/// assert!(pool.can_alloc());
/// # pool.free(b);
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
#[derive(Debug)]
pub struct StaticPool<const N: usize, const S: usize> {
    /// Storage for all `N` pages, one page stride apart.
    block: RawBlock,

    /// Stack of freed page indices. Never holds more than `N` entries, so it never reallocates.
    free_indices: Vec<usize>,

    /// Number of pages handed out at least once since creation or the last `clear()`. Pages at
    /// and above this index have never been used.
    used_page_count: usize,

    /// Index of the page handed out by the most recent allocation.
    current_page_index: usize,

    drop_policy: DropPolicy,
}

impl<const N: usize, const S: usize> StaticPool<N, S> {
    const STRIDE: usize = page_stride(S);

    /// Creates a new pool with the default configuration, allocating storage for all `N` pages.
    ///
    /// # Panics
    ///
    /// Panics if `N` or `S` is zero.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new pool.
    pub fn builder() -> StaticPoolBuilder<N, S> {
        StaticPoolBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(drop_policy: DropPolicy) -> Self {
        assert!(N > 0, "StaticPool must have non-zero capacity");
        assert!(S > 0, "StaticPool must have non-zero page size");

        let block_size = Self::STRIDE
            .checked_mul(N)
            .expect("StaticPool storage size must not overflow usize");

        Self {
            block: RawBlock::zeroed(block_size),
            free_indices: Vec::with_capacity(N),
            used_page_count: 0,
            current_page_index: 0,
            drop_policy,
        }
    }

    /// Number of pages in the pool.
    #[must_use]
    pub const fn capacity() -> usize {
        N
    }

    /// Number of usable bytes in each page.
    #[must_use]
    pub const fn page_size() -> usize {
        S
    }

    /// Whether another page can be handed out.
    #[must_use]
    pub fn can_alloc(&self) -> bool {
        self.used_page_count < N || !self.free_indices.is_empty()
    }

    /// Whether another page can be returned.
    #[must_use]
    pub fn can_free(&self) -> bool {
        self.free_indices.len() < N
    }

    /// Allocates a page able to hold `size` bytes and returns a pointer to its first byte.
    ///
    /// The page is zero-filled and aligned to [`PAGE_ALIGN`][crate::PAGE_ALIGN].
    ///
    /// # Panics
    ///
    /// Panics if `size` is greater than the page size `S` or if every page is handed out
    /// (see [`can_alloc()`][Self::can_alloc]).
    #[must_use]
    pub fn allocate(&mut self, size: usize) -> NonNull<u8> {
        assert!(
            size <= S,
            "requested {size} bytes from a pool of {S}-byte pages"
        );
        assert!(
            self.can_alloc(),
            "cannot allocate from a full static pool of {N} pages"
        );

        let index = self.free_indices.pop().unwrap_or_else(|| {
            let index = self.used_page_count;

            // Cannot overflow because can_alloc() guarantees used_page_count < N here.
            self.used_page_count = self.used_page_count.wrapping_add(1);

            index
        });

        self.current_page_index = index;
        self.page_ptr(index)
    }

    /// Returns a page to the pool. The page is zero-filled before it becomes available for reuse.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` does not point exactly at the start of a page of this pool that has been
    /// handed out, or if every page is already free. Debug builds additionally detect double
    /// frees.
    pub fn free(&mut self, ptr: NonNull<u8>) {
        assert!(
            self.can_free(),
            "free({ptr:?}) called on a static pool with no pages handed out"
        );

        let index = self
            .page_index_of(ptr)
            .unwrap_or_else(|| panic!("free({ptr:?}) pointer is not a page of this pool"));

        assert!(
            index < self.used_page_count,
            "free({ptr:?}) page {index} was never handed out"
        );

        debug_assert!(
            !self.free_indices.contains(&index),
            "free({ptr:?}) page {index} is already free"
        );

        // Cannot overflow because page_index_of() confirmed the page lies within the block.
        self.block.zero_range(index.wrapping_mul(Self::STRIDE), S);

        self.free_indices.push(index);
    }

    /// Whether `ptr` points exactly at the start of one of the pool's pages.
    #[must_use]
    pub fn mapped(&self, ptr: NonNull<u8>) -> bool {
        self.page_index_of(ptr).is_some()
    }

    /// Whether `ptr` is the page handed out by the most recent allocation.
    #[must_use]
    pub fn alloced(&self, ptr: NonNull<u8>) -> bool {
        self.used_page_count > 0 && self.page_ptr(self.current_page_index) == ptr
    }

    /// Number of bytes in all pages handed out at least once since creation or the last
    /// [`clear()`][Self::clear].
    #[must_use]
    pub fn alloc_size(&self) -> usize {
        // Cannot overflow because the whole pool fits in memory.
        self.used_page_count.wrapping_mul(S)
    }

    /// Number of bytes in pages that were freed and are awaiting reuse.
    #[must_use]
    pub fn freed_size(&self) -> usize {
        // Cannot overflow because the whole pool fits in memory.
        self.free_indices.len().wrapping_mul(S)
    }

    /// Number of usable bytes in the whole pool.
    #[must_use]
    pub fn total_size(&self) -> usize {
        // Cannot overflow because the whole pool fits in memory.
        N.wrapping_mul(S)
    }

    /// Number of pages currently handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.used_page_count
            .checked_sub(self.free_indices.len())
            .expect("more pages were freed than were ever handed out")
    }

    /// Whether no pages are currently handed out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero-fills the whole pool and resets all bookkeeping.
    ///
    /// This is the only operation whose cost scales with the pool size. It is meant for resetting
    /// the pool between sessions, with all pages already freed by the caller.
    pub fn clear(&mut self) {
        if !self.is_empty() {
            warn!(
                live_pages = self.len(),
                page_size = S,
                "clearing static page pool with live pages"
            );
        }

        self.block.zero_all();
        self.free_indices.clear();
        self.used_page_count = 0;
        self.current_page_index = 0;
    }

    fn page_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < N,
            "page {index} out of bounds in static pool of {N} pages"
        );

        // Cannot overflow because the index is within the block.
        self.block.ptr_at(index.wrapping_mul(Self::STRIDE))
    }

    fn page_index_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let (index, offset_in_page) = self.block.offset_of(ptr)?.div_rem(&Self::STRIDE);

        (offset_in_page == 0).then_some(index)
    }
}

impl<const N: usize, const S: usize> Default for StaticPool<N, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const S: usize> PagePool for StaticPool<N, S> {
    const PAGE_SIZE: usize = S;

    fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        if size > S {
            return Err(Error::PageTooSmall {
                requested: size,
                page_size: S,
            });
        }

        if !self.can_alloc() {
            trace!(capacity = N, "static page pool is exhausted");
            return Err(Error::Exhausted { capacity: N });
        }

        Ok(self.allocate(size))
    }

    unsafe fn free_page(&mut self, ptr: NonNull<u8>) {
        self.free(ptr);
    }

    fn mapped(&self, ptr: NonNull<u8>) -> bool {
        self.mapped(ptr)
    }

    fn alloced(&self, ptr: NonNull<u8>) -> bool {
        self.alloced(ptr)
    }

    fn alloc_size(&self) -> usize {
        self.alloc_size()
    }

    fn freed_size(&self) -> usize {
        self.freed_size()
    }

    /// The pool never needs more bookkeeping than it allocates up front, so this does nothing.
    fn reserve(&mut self, _additional: usize) {}

    fn clear(&mut self) {
        self.clear();
    }
}

impl<const N: usize, const S: usize> Drop for StaticPool<N, S> {
    fn drop(&mut self) {
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if self.drop_policy == DropPolicy::MustBeEmpty && !thread::panicking() {
            assert!(
                self.is_empty(),
                "dropped a static page pool with {} live pages with a policy that says it must be empty when dropped",
                self.len()
            );
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(StaticPool<4, 64>: Send);
    assert_not_impl_any!(StaticPool<4, 64>: Sync);

    #[test]
    fn hands_out_pages_in_order_then_reuses_most_recent() {
        let mut pool = StaticPool::<3, 16>::new();

        let a = pool.allocate(16);
        let b = pool.allocate(16);
        let c = pool.allocate(16);

        assert_eq!(b.as_ptr().addr() - a.as_ptr().addr(), 16);
        assert_eq!(c.as_ptr().addr() - b.as_ptr().addr(), 16);

        pool.free(a);
        pool.free(c);

        assert_eq!(pool.allocate(1), c);
        assert_eq!(pool.allocate(1), a);
    }

    #[test]
    fn can_alloc_false_exactly_at_capacity() {
        let mut pool = StaticPool::<4, 8>::new();
        let mut pages = Vec::new();

        for _ in 0..4 {
            assert!(pool.can_alloc());
            pages.push(pool.allocate(8));
        }

        assert!(!pool.can_alloc());
        assert_eq!(pool.len(), 4);

        pool.free(pages[2]);
        assert!(pool.can_alloc());
        assert_eq!(pool.len(), 3);

        pages[2] = pool.allocate(8);
        assert!(!pool.can_alloc());
    }

    #[test]
    #[should_panic]
    fn allocate_when_full_panics() {
        let mut pool = StaticPool::<1, 8>::new();
        _ = pool.allocate(8);
        _ = pool.allocate(8);
    }

    #[test]
    fn try_allocate_when_full_is_error() {
        let mut pool = StaticPool::<1, 8>::new();
        _ = pool.allocate(8);

        assert_eq!(pool.try_allocate(8), Err(Error::Exhausted { capacity: 1 }));
    }

    #[test]
    fn clear_zero_fills_everything() {
        let mut pool = StaticPool::<4, 20>::new();

        for _ in 0..4 {
            let page = pool.allocate(20);
            unsafe { page.write_bytes(0xFF, 20) };
        }

        pool.clear();

        assert!(pool.is_empty());
        assert!(pool.can_alloc());
        assert_eq!(pool.alloc_size(), 0);
        assert_eq!(pool.freed_size(), 0);

        for offset in 0..pool.block.len() {
            assert_eq!(unsafe { pool.block.ptr_at(offset).read() }, 0);
        }
    }

    #[test]
    fn free_zeroes_page() {
        let mut pool = StaticPool::<2, 12>::new();

        let page = pool.allocate(12);
        unsafe { page.write_bytes(0x11, 12) };

        pool.free(page);

        for offset in 0..12 {
            assert_eq!(unsafe { page.add(offset).read() }, 0);
        }
    }

    #[test]
    fn allocate_free_round_trip_restores_counters() {
        let mut pool = StaticPool::<2, 12>::new();

        let warm = pool.allocate(1);
        pool.free(warm);

        let alloc_size = pool.alloc_size();
        let freed_size = pool.freed_size();

        let page = pool.allocate(1);
        pool.free(page);

        assert_eq!(pool.alloc_size(), alloc_size);
        assert_eq!(pool.freed_size(), freed_size);
    }

    #[test]
    fn mapped_requires_page_boundary() {
        let mut pool = StaticPool::<2, 32>::new();
        let page = pool.allocate(1);

        assert!(pool.mapped(page));
        assert!(!pool.mapped(unsafe { page.add(1) }));

        let other = StaticPool::<2, 32>::new();
        assert!(!other.mapped(page));
    }

    #[test]
    fn alloced_tracks_most_recent_allocation() {
        let mut pool = StaticPool::<2, 32>::new();
        let a = pool.allocate(1);

        assert!(pool.alloced(a));

        let b = pool.allocate(1);
        assert!(pool.alloced(b));
        assert!(!pool.alloced(a));
    }

    #[test]
    #[should_panic]
    fn free_misaligned_pointer_panics() {
        let mut pool = StaticPool::<2, 32>::new();
        let page = pool.allocate(1);

        pool.free(unsafe { page.add(4) });
    }

    #[test]
    #[should_panic]
    fn free_never_allocated_page_panics() {
        let mut pool = StaticPool::<2, 32>::new();
        let page = pool.allocate(1);

        // The second page has never been handed out.
        pool.free(unsafe { page.add(32) });
    }

    #[test]
    #[should_panic]
    fn drop_with_live_page_panics_if_policy_must_be_empty() {
        let mut pool = StaticPool::<2, 8>::builder()
            .drop_policy(DropPolicy::MustBeEmpty)
            .build();

        _ = pool.allocate(1);
    }

    #[test]
    #[should_panic]
    fn zero_capacity_is_panic() {
        drop(StaticPool::<0, 8>::new());
    }
}
