use std::ptr::NonNull;
use std::thread;

use foldhash::{HashMap, HashMapExt};
use tracing::warn;

use crate::{DropPolicy, Error, GrowablePagePoolBuilder, PagePool, RawBlock, Result, page_stride};

/// A page pool of unbounded size that grows one page at a time.
///
/// Each page is its own heap allocation, so a page never moves once created and growing the pool
/// never invalidates pointers to existing pages. Freed pages are zero-filled and kept for reuse;
/// the most recently freed page is handed out first.
///
/// The pool tracks live pages in a table keyed by page address, which is how
/// [`free()`][Self::free] verifies that it is given a pointer this pool actually handed out.
///
/// # Example
///
/// ```
/// use page_pool::GrowablePagePool;
///
/// let mut pool = GrowablePagePool::<128>::new();
///
/// let page = pool.allocate(100);
/// assert!(pool.mapped(page));
///
/// pool.free(page);
/// assert!(!pool.mapped(page));
///
/// // The freed page is the first to be reused.
/// assert_eq!(pool.allocate(10), page);
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]). It is meant to be owned
/// by a single subsystem on a single thread at a time.
#[derive(Debug)]
pub struct GrowablePagePool<const S: usize> {
    /// Every page ever created by the pool, indexed by page index. Pages are only released by
    /// `clear()` or when the pool is dropped.
    pages: Vec<RawBlock>,

    /// Stack of page indices that were freed and are awaiting reuse.
    free_indices: Vec<usize>,

    /// Address of every live page, mapped to its page index.
    table: HashMap<NonNull<u8>, usize>,

    /// Index of the page handed out by the most recent allocation.
    current_page_index: usize,

    drop_policy: DropPolicy,
}

impl<const S: usize> GrowablePagePool<S> {
    /// Creates a new pool with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if `S` is zero.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new pool.
    pub fn builder() -> GrowablePagePoolBuilder<S> {
        GrowablePagePoolBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(drop_policy: DropPolicy, reserve: usize) -> Self {
        assert!(S > 0, "GrowablePagePool must have non-zero page size");

        let mut pool = Self {
            pages: Vec::new(),
            free_indices: Vec::new(),
            table: HashMap::new(),
            current_page_index: 0,
            drop_policy,
        };

        pool.reserve(reserve);
        pool
    }

    /// Number of usable bytes in each page.
    #[must_use]
    pub const fn page_size() -> usize {
        S
    }

    /// Allocates a page able to hold `size` bytes and returns a pointer to its first byte.
    ///
    /// The page is zero-filled and aligned to [`PAGE_ALIGN`][crate::PAGE_ALIGN].
    ///
    /// # Panics
    ///
    /// Panics if `size` is greater than the page size `S`.
    #[must_use]
    pub fn allocate(&mut self, size: usize) -> NonNull<u8> {
        assert!(
            size <= S,
            "requested {size} bytes from a pool of {S}-byte pages"
        );

        // The index must leave the free stack before the caller constructs anything in the page,
        // because construction may recursively allocate from this same pool.
        let index = self.free_indices.pop().unwrap_or_else(|| {
            self.pages.push(RawBlock::zeroed(page_stride(S)));

            // Cannot underflow because we just pushed a page.
            self.pages.len().wrapping_sub(1)
        });

        self.current_page_index = index;

        let ptr = self.page_ptr(index);
        let previous = self.table.insert(ptr, index);

        assert!(
            previous.is_none(),
            "page {index} was handed out while it was still live"
        );

        ptr
    }

    /// Returns a page to the pool. The whole page is zero-filled before it becomes available for
    /// reuse.
    ///
    /// # Panics
    ///
    /// Panics if `ptr` is not a live page of this pool, which includes freeing a page twice.
    pub fn free(&mut self, ptr: NonNull<u8>) {
        let index = self
            .table
            .remove(&ptr)
            .unwrap_or_else(|| panic!("free({ptr:?}) pointer is not a live page of this pool"));

        self.pages
            .get_mut(index)
            .expect("the page table only refers to pages that exist")
            .zero_all();

        self.free_indices.push(index);
    }

    /// Whether `ptr` is a live page of this pool.
    #[must_use]
    pub fn mapped(&self, ptr: NonNull<u8>) -> bool {
        self.table.contains_key(&ptr)
    }

    /// Whether `ptr` is the page handed out by the most recent allocation.
    #[must_use]
    pub fn alloced(&self, ptr: NonNull<u8>) -> bool {
        self.current_page_index < self.pages.len() && self.page_ptr(self.current_page_index) == ptr
    }

    /// Number of bytes in all pages created over the pool's lifetime (or since the last
    /// [`clear()`][Self::clear]).
    #[must_use]
    pub fn alloc_size(&self) -> usize {
        self.pages
            .len()
            .checked_mul(S)
            .expect("overflow here would mean the pool holds more bytes than virtual memory")
    }

    /// Number of bytes in pages that were freed and are awaiting reuse.
    #[must_use]
    pub fn freed_size(&self) -> usize {
        self.free_indices
            .len()
            .checked_mul(S)
            .expect("overflow here would mean the pool holds more bytes than virtual memory")
    }

    /// Number of pages currently handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no pages are currently handed out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Number of pages created over the pool's lifetime, live or not.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Preallocates the free stack and page table for `additional` pages. Page storage itself is
    /// still only created on demand.
    #[cfg_attr(test, mutants::skip)] // Only affects performance, not behavior.
    pub fn reserve(&mut self, additional: usize) {
        self.free_indices.reserve(additional);
        self.table.reserve(additional);
    }

    /// Releases every page and resets all bookkeeping.
    ///
    /// The caller is expected to have freed all outstanding pages already.
    pub fn clear(&mut self) {
        if !self.table.is_empty() {
            warn!(
                live_pages = self.table.len(),
                page_size = S,
                "clearing growable page pool with live pages"
            );
        }

        self.pages.clear();
        self.free_indices.clear();
        self.table.clear();
        self.current_page_index = 0;
    }

    fn page_ptr(&self, index: usize) -> NonNull<u8> {
        self.pages
            .get(index)
            .map(|page| page.ptr_at(0))
            .unwrap_or_else(|| panic!("page {index} out of bounds in pool of {S}-byte pages"))
    }
}

impl<const S: usize> Default for GrowablePagePool<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const S: usize> PagePool for GrowablePagePool<S> {
    const PAGE_SIZE: usize = S;

    fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        if size > S {
            return Err(Error::PageTooSmall {
                requested: size,
                page_size: S,
            });
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

    fn reserve(&mut self, additional: usize) {
        self.reserve(additional);
    }

    fn clear(&mut self) {
        self.clear();
    }
}

impl<const S: usize> Drop for GrowablePagePool<S> {
    fn drop(&mut self) {
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if self.drop_policy == DropPolicy::MustBeEmpty && !thread::panicking() {
            assert!(
                self.table.is_empty(),
                "dropped a growable page pool with {} live pages with a policy that says it must be empty when dropped",
                self.table.len()
            );
        }
    }
}

// SAFETY: The page table holds raw pointers only as lookup keys into pages owned by the pool
// itself. Nothing about that is tied to a particular thread.
unsafe impl<const S: usize> Send for GrowablePagePool<S> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(GrowablePagePool<64>: Send);
    assert_not_impl_any!(GrowablePagePool<64>: Sync);

    fn page_bytes(ptr: NonNull<u8>, len: usize) -> Vec<u8> {
        (0..len).map(|offset| unsafe { ptr.add(offset).read() }).collect()
    }

    #[test]
    fn smoke_test() {
        let mut pool = GrowablePagePool::<64>::new();
        assert!(pool.is_empty());

        let a = pool.allocate(64);
        let b = pool.allocate(1);
        let c = pool.allocate(0);

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.page_count(), 3);
        assert_eq!(pool.alloc_size(), 3 * 64);
        assert_eq!(pool.freed_size(), 0);

        pool.free(b);

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.freed_size(), 64);

        pool.free(a);
        pool.free(c);

        assert!(pool.is_empty());
        assert_eq!(pool.alloc_size(), 3 * 64);
        assert_eq!(pool.freed_size(), 3 * 64);
    }

    #[test]
    fn reuses_most_recently_freed_page() {
        let mut pool = GrowablePagePool::<32>::new();

        let a = pool.allocate(8);
        let b = pool.allocate(8);

        pool.free(a);
        pool.free(b);

        assert_eq!(pool.allocate(8), b);
        assert_eq!(pool.allocate(8), a);
        assert_eq!(pool.page_count(), 2);
    }

    #[test]
    fn free_unmaps_and_zeroes() {
        let mut pool = GrowablePagePool::<48>::new();

        let page = pool.allocate(48);
        unsafe { page.write_bytes(0x5A, 48) };

        pool.free(page);

        assert!(!pool.mapped(page));
        assert!(page_bytes(page, 48).iter().all(|&b| b == 0));
    }

    #[test]
    fn allocate_free_round_trip_restores_counters() {
        let mut pool = GrowablePagePool::<16>::new();

        // Warm up so that the round trip does not need to create a page.
        let warm = pool.allocate(16);
        pool.free(warm);

        let alloc_size = pool.alloc_size();
        let freed_size = pool.freed_size();

        let page = pool.allocate(16);
        pool.free(page);

        assert_eq!(pool.alloc_size(), alloc_size);
        assert_eq!(pool.freed_size(), freed_size);
    }

    #[test]
    fn alloced_tracks_most_recent_allocation() {
        let mut pool = GrowablePagePool::<16>::new();

        let a = pool.allocate(1);
        assert!(pool.alloced(a));

        let b = pool.allocate(1);
        assert!(pool.alloced(b));
        assert!(!pool.alloced(a));
    }

    #[test]
    fn pages_are_aligned() {
        let mut pool = GrowablePagePool::<3>::new();

        for _ in 0..10 {
            let page = pool.allocate(3);
            assert_eq!(page.as_ptr().addr() % crate::PAGE_ALIGN, 0);
        }
    }

    #[test]
    #[should_panic]
    fn oversized_request_panics() {
        let mut pool = GrowablePagePool::<16>::new();
        _ = pool.allocate(17);
    }

    #[test]
    #[should_panic]
    fn double_free_panics() {
        let mut pool = GrowablePagePool::<16>::new();
        let page = pool.allocate(1);
        pool.free(page);
        pool.free(page);
    }

    #[test]
    #[should_panic]
    fn free_foreign_pointer_panics() {
        let mut pool = GrowablePagePool::<16>::new();
        let mut other = GrowablePagePool::<16>::new();

        let foreign = other.allocate(1);
        pool.free(foreign);
    }

    #[test]
    fn try_allocate_reports_oversize() {
        let mut pool = GrowablePagePool::<16>::new();

        assert_eq!(
            pool.try_allocate(32),
            Err(Error::PageTooSmall {
                requested: 32,
                page_size: 16
            })
        );
        assert!(pool.try_allocate(16).is_ok());
    }

    #[test]
    fn typed_alloc_constructs_and_destructs_once() {
        struct Unit {
            drops: Rc<Cell<usize>>,
            health: u32,
        }

        impl Drop for Unit {
            fn drop(&mut self) {
                self.drops.set(self.drops.get() + 1);
            }
        }

        let drops = Rc::new(Cell::new(0));
        let mut pool = GrowablePagePool::<64>::new();

        let unit = pool
            .alloc(Unit {
                drops: Rc::clone(&drops),
                health: 250,
            })
            .unwrap();

        assert_eq!(unsafe { unit.as_ref().health }, 250);
        assert_eq!(drops.get(), 0);

        unsafe { pool.free_typed(unit) };

        assert_eq!(drops.get(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn clear_releases_everything() {
        let mut pool = GrowablePagePool::<16>::new();

        let a = pool.allocate(1);
        pool.free(a);
        _ = pool.allocate(1);

        pool.clear();

        assert!(pool.is_empty());
        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.alloc_size(), 0);
        assert_eq!(pool.freed_size(), 0);
    }

    #[test]
    #[should_panic]
    fn drop_with_live_page_panics_if_policy_must_be_empty() {
        let mut pool = GrowablePagePool::<16>::builder()
            .drop_policy(DropPolicy::MustBeEmpty)
            .build();

        _ = pool.allocate(1);
    }

    #[test]
    fn drop_without_live_pages_ok_if_policy_must_be_empty() {
        let mut pool = GrowablePagePool::<16>::builder()
            .drop_policy(DropPolicy::MustBeEmpty)
            .build();

        let page = pool.allocate(1);
        pool.free(page);
    }

    #[test]
    #[should_panic]
    fn zero_page_size_is_panic() {
        drop(GrowablePagePool::<0>::new());
    }
}
