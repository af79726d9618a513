use std::ptr::NonNull;
use std::thread;

use num_integer::Integer;
use tracing::{debug, trace, warn};

use crate::{
    ChunkedFixedPoolBuilder, DropPolicy, Error, PAGE_ALIGN, PageCoordinates, PagePool, RawBlock,
    Result, page_stride,
};

/// Size of the page index embedded directly before each page payload.
const INDEX_SIZE: usize = size_of::<u32>();

/// Every page entry starts with a header of this size. The page index occupies its last
/// `INDEX_SIZE` bytes; the rest is padding that keeps the payload aligned to `PAGE_ALIGN`.
const HEADER_SIZE: usize = PAGE_ALIGN;

/// A page pool with a fixed upper bound of `N × K` pages, materialized one chunk at a time.
///
/// * `S` - usable bytes per page.
/// * `N` - maximum number of chunks.
/// * `K` - number of pages per chunk.
///
/// A chunk is one contiguous allocation of `K` pages and is only created when the pool runs out
/// of free pages, so an idle pool costs nothing but its bookkeeping. Every page carries its own
/// global index in the 4 bytes directly before the payload handed to the caller. Freeing a page
/// reads that index back with plain pointer arithmetic, without any lookup structure.
///
/// This is the one pool that reports a full condition instead of growing or panicking:
/// [`allocate()`][Self::allocate] returns `None` once all `N × K` pages are handed out.
///
/// # Example
///
/// ```
/// use page_pool::ChunkedFixedPool;
///
/// // 2 chunks of 4 pages, 64 bytes each.
/// let mut pool = ChunkedFixedPool::<64, 2, 4>::new();
///
/// let pages: Vec<_> = (0..8).map(|_| pool.allocate(64).unwrap()).collect();
///
/// // The pool is full now.
/// assert!(pool.allocate(1).is_none());
///
/// // SAFETY: The page came from this pool and has not been freed yet.
/// unsafe { pool.free(pages[3]) };
///
/// assert_eq!(pool.allocate(1), Some(pages[3]));
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
#[derive(Debug)]
pub struct ChunkedFixedPool<const S: usize, const N: usize, const K: usize> {
    /// Materialized chunks, in creation order. Never holds more than `N` entries.
    chunks: Vec<RawBlock>,

    /// Stack of global page indices that are ready to be handed out.
    free_indices: Vec<u32>,

    /// Global index of the page handed out by the most recent allocation.
    current_page_index: usize,

    /// Number of pages currently handed out.
    live_count: usize,

    drop_policy: DropPolicy,
}

impl<const S: usize, const N: usize, const K: usize> ChunkedFixedPool<S, N, K> {
    /// Distance between the starts of two consecutive page entries in a chunk.
    const ENTRY_STRIDE: usize = HEADER_SIZE + page_stride(S);

    /// Total number of pages the pool can ever hold.
    pub const CAPACITY: usize = N * K;

    /// Creates a new pool with the default configuration. No chunk is materialized yet.
    ///
    /// # Panics
    ///
    /// Panics if any of `S`, `N` or `K` is zero or if `N × K` pages cannot be indexed by `u32`.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new pool.
    pub fn builder() -> ChunkedFixedPoolBuilder<S, N, K> {
        ChunkedFixedPoolBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(drop_policy: DropPolicy, reserve: usize) -> Self {
        assert!(S > 0, "ChunkedFixedPool must have non-zero page size");
        assert!(N > 0, "ChunkedFixedPool must have a non-zero chunk count");
        assert!(K > 0, "ChunkedFixedPool must have non-zero pages per chunk");
        assert!(
            u32::try_from(Self::CAPACITY).is_ok(),
            "ChunkedFixedPool capacity {} does not fit the embedded u32 page index",
            Self::CAPACITY
        );

        let mut pool = Self {
            chunks: Vec::with_capacity(N),
            free_indices: Vec::new(),
            current_page_index: 0,
            live_count: 0,
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

    /// Allocates a page able to hold `size` bytes, or returns `None` if every page of the pool is
    /// already handed out.
    ///
    /// The page is zero-filled and aligned to [`PAGE_ALIGN`].
    ///
    /// # Panics
    ///
    /// Panics if `size` is greater than the page size `S`.
    #[must_use]
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        assert!(
            size <= S,
            "requested {size} bytes from a pool of {S}-byte pages"
        );

        if self.free_indices.is_empty() {
            if self.chunks.len() == N {
                trace!(capacity = Self::CAPACITY, "chunked page pool is exhausted");
                return None;
            }

            self.materialize_chunk();
        }

        let index = self
            .free_indices
            .pop()
            .expect("a chunk was just materialized if the free list was empty");
        let page_index = widen(index);

        let index_ptr = self.index_ptr(page_index);

        // SAFETY: The pointer addresses the last INDEX_SIZE bytes of the page header inside a
        // chunk we own. Entries start on PAGE_ALIGN boundaries and HEADER_SIZE - INDEX_SIZE is a
        // multiple of INDEX_SIZE, so the write is aligned for u32.
        unsafe {
            index_ptr.cast::<u32>().write(index);
        }

        self.current_page_index = page_index;

        // Cannot overflow because live pages are bounded by CAPACITY, which fits in u32.
        self.live_count = self.live_count.wrapping_add(1);

        Some(self.payload_ptr(page_index))
    }

    /// Returns a page to the pool.
    ///
    /// The embedded index and the payload are zero-filled and the page becomes the next one to be
    /// handed out.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by [`allocate()`][Self::allocate] on this
    /// pool and has not been freed since. The page index is read from the memory in front of
    /// `ptr`, so any other pointer results in undefined behavior.
    ///
    /// # Panics
    ///
    /// Panics if the embedded index is out of range for the materialized chunks. Debug builds
    /// additionally detect double frees and pointers that do not belong to this pool.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        debug_assert!(
            self.mapped(ptr),
            "free({ptr:?}) pointer is not a page of this pool"
        );

        // SAFETY: Forwarding safety requirements to the caller - a page handed out by this pool
        // is always preceded by its u32 page index, suitably aligned.
        let index = unsafe { ptr.byte_sub(INDEX_SIZE).cast::<u32>().read() };
        let page_index = widen(index);

        assert!(
            page_index < self.materialized_page_count(),
            "free({ptr:?}) embedded page index {page_index} is out of range in pool of {} materialized pages",
            self.materialized_page_count()
        );

        debug_assert!(
            !self.free_indices.contains(&index),
            "free({ptr:?}) page {page_index} is already free"
        );

        let coordinates = PageCoordinates::from_page_index(page_index, K);
        let index_offset = Self::entry_offset(coordinates.index_in_chunk())
            .wrapping_add(HEADER_SIZE)
            .wrapping_sub(INDEX_SIZE);

        self.chunks
            .get_mut(coordinates.chunk_index())
            .expect("guarded by the materialized page count check above")
            .zero_range(index_offset, INDEX_SIZE.wrapping_add(S));

        self.free_indices.push(index);

        self.live_count = self
            .live_count
            .checked_sub(1)
            .expect("a page was freed while the pool had no live pages");
    }

    /// Whether `ptr` is the payload address of a page in this pool that carries its own index.
    ///
    /// This is safe to call with any pointer. Note that a freed page has a zeroed index, which
    /// makes the very first page of the pool indistinguishable from a live one.
    #[must_use]
    pub fn mapped(&self, ptr: NonNull<u8>) -> bool {
        let Some(page_index) = self.locate(ptr) else {
            return false;
        };

        let index_ptr = self.index_ptr(page_index);

        // SAFETY: locate() confirmed the page exists in a materialized chunk. Its header is
        // always initialized (zeroed on chunk creation) and aligned for u32.
        let embedded = unsafe { index_ptr.cast::<u32>().read() };

        widen(embedded) == page_index
    }

    /// Whether `ptr` is the page handed out by the most recent allocation.
    #[must_use]
    pub fn alloced(&self, ptr: NonNull<u8>) -> bool {
        self.current_page_index < self.materialized_page_count()
            && self.payload_ptr(self.current_page_index) == ptr
    }

    /// Number of bytes in the pages of all materialized chunks.
    #[must_use]
    pub fn alloc_size(&self) -> usize {
        // Cannot overflow because the full capacity of S-byte pages fits in memory.
        self.materialized_page_count().wrapping_mul(S)
    }

    /// Number of bytes in pages that are ready to be handed out.
    #[must_use]
    pub fn freed_size(&self) -> usize {
        // Cannot overflow because the full capacity of S-byte pages fits in memory.
        self.free_indices.len().wrapping_mul(S)
    }

    /// Number of pages currently handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live_count
    }

    /// Whether no pages are currently handed out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    /// Whether every page of the pool is handed out.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.live_count == Self::CAPACITY
    }

    /// Total number of pages the pool can ever hold.
    #[must_use]
    pub fn capacity(&self) -> usize {
        Self::CAPACITY
    }

    /// Number of chunks materialized so far.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Preallocates the free list for `additional` page indices.
    #[cfg_attr(test, mutants::skip)] // Only affects performance, not behavior.
    pub fn reserve(&mut self, additional: usize) {
        self.free_indices.reserve(additional);
    }

    /// Makes every page of every materialized chunk available again.
    ///
    /// Chunks stay materialized. The caller is expected to have freed all outstanding pages
    /// already; pages that were still live are zero-filled.
    pub fn clear(&mut self) {
        if self.live_count > 0 {
            warn!(
                live_pages = self.live_count,
                page_size = S,
                "clearing chunked page pool with live pages"
            );

            for chunk in &mut self.chunks {
                chunk.zero_all();
            }
        }

        self.free_indices.clear();

        // Last chunk first, so the very first page of the pool ends up on top of the stack.
        for chunk_index in (0..self.chunks.len()).rev() {
            self.free_indices.extend(Self::chunk_page_indices(chunk_index).rev());
        }

        self.current_page_index = 0;
        self.live_count = 0;
    }

    fn materialize_chunk(&mut self) {
        let chunk_index = self.chunks.len();

        // Cannot overflow because the chunk count is bounded by N.
        self.chunks.push(RawBlock::zeroed(Self::ENTRY_STRIDE.wrapping_mul(K)));

        // Reverse order, so popping from the back hands out the first page of the chunk first.
        self.free_indices.reserve(K);
        self.free_indices.extend(Self::chunk_page_indices(chunk_index).rev());

        debug!(
            chunk_index,
            pages_per_chunk = K,
            page_size = S,
            "materialized chunk"
        );
    }

    fn chunk_page_indices(chunk_index: usize) -> impl DoubleEndedIterator<Item = u32> {
        // Cannot overflow because chunk indices are below N and N × K fits in u32.
        let first = chunk_index.wrapping_mul(K);
        let end = first.wrapping_add(K);

        (first..end).map(|page_index| {
            u32::try_from(page_index).expect("capacity was verified to fit u32 in the constructor")
        })
    }

    fn materialized_page_count(&self) -> usize {
        // Cannot overflow because the chunk count is bounded by N.
        self.chunks.len().wrapping_mul(K)
    }

    fn entry_offset(index_in_chunk: usize) -> usize {
        // Cannot overflow because the chunk itself was allocated with this many entries.
        index_in_chunk.wrapping_mul(Self::ENTRY_STRIDE)
    }

    fn index_ptr(&self, page_index: usize) -> NonNull<u8> {
        let coordinates = PageCoordinates::from_page_index(page_index, K);

        // Cannot overflow because HEADER_SIZE is larger than INDEX_SIZE and the entry fits.
        let offset = Self::entry_offset(coordinates.index_in_chunk())
            .wrapping_add(HEADER_SIZE)
            .wrapping_sub(INDEX_SIZE);

        self.chunk(coordinates.chunk_index()).ptr_at(offset)
    }

    fn payload_ptr(&self, page_index: usize) -> NonNull<u8> {
        let coordinates = PageCoordinates::from_page_index(page_index, K);

        // Cannot overflow because the entry fits in the chunk.
        let offset = Self::entry_offset(coordinates.index_in_chunk()).wrapping_add(HEADER_SIZE);

        self.chunk(coordinates.chunk_index()).ptr_at(offset)
    }

    fn chunk(&self, chunk_index: usize) -> &RawBlock {
        self.chunks.get(chunk_index).unwrap_or_else(|| {
            panic!(
                "chunk {chunk_index} is not materialized in pool of {} chunks",
                self.chunks.len()
            )
        })
    }

    /// Finds the global page index whose payload starts exactly at `ptr`, if any.
    fn locate(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.chunks
            .iter()
            .enumerate()
            .find_map(|(chunk_index, chunk)| {
                chunk.offset_of(ptr).map(|offset| (chunk_index, offset))
            })
            .and_then(|(chunk_index, offset)| {
                let (index_in_chunk, offset_in_entry) = offset.div_rem(&Self::ENTRY_STRIDE);

                // Cannot overflow because the page exists in a materialized chunk.
                (offset_in_entry == HEADER_SIZE)
                    .then(|| chunk_index.wrapping_mul(K).wrapping_add(index_in_chunk))
            })
    }
}

/// Widens an embedded page index to `usize`.
fn widen(index: u32) -> usize {
    usize::try_from(index).expect("u32 always fits in usize on supported targets")
}

impl<const S: usize, const N: usize, const K: usize> Default for ChunkedFixedPool<S, N, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const S: usize, const N: usize, const K: usize> PagePool for ChunkedFixedPool<S, N, K> {
    const PAGE_SIZE: usize = S;

    fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        if size > S {
            return Err(Error::PageTooSmall {
                requested: size,
                page_size: S,
            });
        }

        self.allocate(size).ok_or(Error::Exhausted {
            capacity: Self::CAPACITY,
        })
    }

    unsafe fn free_page(&mut self, ptr: NonNull<u8>) {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe {
            self.free(ptr);
        }
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

impl<const S: usize, const N: usize, const K: usize> Drop for ChunkedFixedPool<S, N, K> {
    fn drop(&mut self) {
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if self.drop_policy == DropPolicy::MustBeEmpty && !thread::panicking() {
            assert!(
                self.live_count == 0,
                "dropped a chunked page pool with {} live pages with a policy that says it must be empty when dropped",
                self.live_count
            );
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(ChunkedFixedPool<64, 2, 4>: Send);
    assert_not_impl_any!(ChunkedFixedPool<64, 2, 4>: Sync);

    type SmallPool = ChunkedFixedPool<24, 2, 3>;

    #[test]
    fn no_chunk_until_first_allocation() {
        let mut pool = SmallPool::new();

        assert_eq!(pool.chunk_count(), 0);
        assert_eq!(pool.alloc_size(), 0);

        let page = pool.allocate(24).unwrap();

        assert_eq!(pool.chunk_count(), 1);
        assert_eq!(pool.alloc_size(), 3 * 24);
        assert_eq!(pool.freed_size(), 2 * 24);
        assert!(pool.mapped(page));
    }

    #[test]
    fn exactly_capacity_allocations_succeed() {
        let mut pool = SmallPool::new();

        let pages: Vec<_> = (0..SmallPool::CAPACITY)
            .map(|_| pool.allocate(1).unwrap())
            .collect();

        assert!(pool.is_full());
        assert_eq!(pool.len(), SmallPool::CAPACITY);
        assert_eq!(pool.chunk_count(), 2);
        assert!(pool.allocate(1).is_none());

        unsafe { pool.free(pages[4]) };
        assert_eq!(pool.len(), SmallPool::CAPACITY - 1);

        let reused = pool.allocate(1).unwrap();
        assert_eq!(reused, pages[4]);
        assert!(pool.allocate(1).is_none());
    }

    #[test]
    fn pages_of_new_chunk_are_handed_out_in_ascending_order() {
        let mut pool = SmallPool::new();

        let pages: Vec<_> = (0..SmallPool::CAPACITY)
            .map(|_| pool.allocate(1).unwrap())
            .collect();

        for page in &pages {
            let index = unsafe { page.byte_sub(INDEX_SIZE).cast::<u32>().read() };
            assert_eq!(widen(index), pages.iter().position(|p| p == page).unwrap());
        }

        // Within one chunk, consecutive pages are one entry stride apart.
        let stride = pages[1].as_ptr().addr() - pages[0].as_ptr().addr();
        assert_eq!(stride, SmallPool::ENTRY_STRIDE);
    }

    #[test]
    fn free_zeroes_index_and_payload() {
        let mut pool = SmallPool::new();

        _ = pool.allocate(1).unwrap();
        let page = pool.allocate(24).unwrap();
        unsafe { page.write_bytes(0xEE, 24) };

        unsafe { pool.free(page) };

        let index = unsafe { page.byte_sub(INDEX_SIZE).cast::<u32>().read() };
        assert_eq!(index, 0);

        for offset in 0..24 {
            assert_eq!(unsafe { page.add(offset).read() }, 0);
        }

        assert!(!pool.mapped(page));
    }

    #[test]
    fn allocate_free_round_trip_restores_counters() {
        let mut pool = SmallPool::new();

        let warm = pool.allocate(1).unwrap();

        let alloc_size = pool.alloc_size();
        let freed_size = pool.freed_size();

        let page = pool.allocate(1).unwrap();
        unsafe { pool.free(page) };

        assert_eq!(pool.alloc_size(), alloc_size);
        assert_eq!(pool.freed_size(), freed_size);

        unsafe { pool.free(warm) };
    }

    #[test]
    fn mapped_rejects_foreign_and_misaligned_pointers() {
        let mut pool = SmallPool::new();
        let mut other = SmallPool::new();

        let page = pool.allocate(1).unwrap();
        let foreign = other.allocate(1).unwrap();

        assert!(pool.mapped(page));
        assert!(!pool.mapped(foreign));
        assert!(!pool.mapped(unsafe { page.add(1) }));
        assert!(!pool.mapped(unsafe { page.byte_sub(INDEX_SIZE) }));
    }

    #[test]
    fn alloced_tracks_most_recent_allocation() {
        let mut pool = SmallPool::new();

        let a = pool.allocate(1).unwrap();
        assert!(pool.alloced(a));

        let b = pool.allocate(1).unwrap();
        assert!(pool.alloced(b));
        assert!(!pool.alloced(a));
    }

    #[test]
    fn pages_are_aligned() {
        let mut pool = ChunkedFixedPool::<5, 1, 7>::new();

        while let Some(page) = pool.allocate(5) {
            assert_eq!(page.as_ptr().addr() % PAGE_ALIGN, 0);
        }
    }

    #[test]
    fn try_allocate_reports_exhaustion() {
        let mut pool = ChunkedFixedPool::<8, 1, 1>::new();

        assert!(pool.try_allocate(8).is_ok());
        assert_eq!(
            pool.try_allocate(8),
            Err(Error::Exhausted { capacity: 1 })
        );
        assert_eq!(
            pool.try_allocate(9),
            Err(Error::PageTooSmall {
                requested: 9,
                page_size: 8
            })
        );
    }

    #[test]
    fn clear_rebuilds_free_list_for_materialized_chunks() {
        let mut pool = SmallPool::new();

        let pages: Vec<_> = (0..4).map(|_| pool.allocate(1).unwrap()).collect();
        for page in &pages {
            unsafe { pool.free(*page) };
        }

        pool.clear();

        assert_eq!(pool.chunk_count(), 2);
        assert_eq!(pool.freed_size(), 6 * 24);

        // After clearing, pages are handed out from the first chunk again.
        assert_eq!(pool.allocate(1), Some(pages[0]));
    }

    #[test]
    #[should_panic]
    fn oversized_request_panics() {
        let mut pool = SmallPool::new();
        _ = pool.allocate(25);
    }

    #[test]
    #[should_panic]
    fn drop_with_live_page_panics_if_policy_must_be_empty() {
        let mut pool = SmallPool::builder()
            .drop_policy(DropPolicy::MustBeEmpty)
            .build();

        _ = pool.allocate(1);
    }

    #[test]
    #[should_panic]
    fn zero_chunk_count_is_panic() {
        drop(ChunkedFixedPool::<8, 0, 4>::new());
    }

    #[test]
    #[should_panic]
    fn zero_pages_per_chunk_is_panic() {
        drop(ChunkedFixedPool::<8, 4, 0>::new());
    }
}
