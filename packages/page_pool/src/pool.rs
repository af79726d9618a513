use std::ptr::NonNull;

use crate::{PAGE_ALIGN, Result};

/// The operations shared by every page pool in this crate.
///
/// A page pool hands out fixed-size pages of raw, zero-initialized memory and takes them back
/// for reuse. The pool owns the memory; the pointers it returns are non-owning views that are
/// valid from allocation until the page is freed (or the pool is cleared or dropped).
///
/// Callers place objects into pages themselves and must run destructors before returning a page.
/// [`alloc()`][Self::alloc] and [`free_typed()`][Self::free_typed] do both steps for you.
///
/// Writing code against this trait makes it easy to fall back from a bounded pool to a growable
/// one when the former reports [`Error::Exhausted`][crate::Error::Exhausted].
///
/// # Example
///
/// ```
/// use page_pool::{ChunkedFixedPool, GrowablePagePool, PagePool};
///
/// struct Projectile {
///     position: [f32; 3],
///     velocity: [f32; 3],
/// }
///
/// let mut pool = ChunkedFixedPool::<32, 1, 2>::new();
///
/// let first = pool
///     .alloc(Projectile {
///         position: [0.0; 3],
///         velocity: [1.0, 0.0, 0.0],
///     })
///     .unwrap();
///
/// // SAFETY: The pointer came from this pool and the object has not been freed yet.
/// unsafe {
///     assert_eq!(first.as_ref().velocity, [1.0, 0.0, 0.0]);
///     pool.free_typed(first);
/// }
/// ```
pub trait PagePool {
    /// Number of usable bytes in each page.
    const PAGE_SIZE: usize;

    /// Allocates one page able to hold `size` bytes.
    ///
    /// The returned memory is aligned to [`PAGE_ALIGN`] and filled with zeroes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PageTooSmall`][crate::Error::PageTooSmall] if `size` exceeds
    /// [`PAGE_SIZE`][Self::PAGE_SIZE] and [`Error::Exhausted`][crate::Error::Exhausted] if the
    /// pool is bounded and has no page left to give.
    fn try_allocate(&mut self, size: usize) -> Result<NonNull<u8>>;

    /// Returns a page to the pool. The page is zero-filled and becomes available for reuse.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by this pool, has not been freed since and
    /// that any object placed into the page has already been dropped or is no longer needed.
    ///
    /// # Panics
    ///
    /// Panics if the pool detects that `ptr` is not a live page of this pool. Not every pool is
    /// able to detect every violation.
    unsafe fn free_page(&mut self, ptr: NonNull<u8>);

    /// Whether `ptr` refers to a page that belongs to this pool.
    #[must_use]
    fn mapped(&self, ptr: NonNull<u8>) -> bool;

    /// Whether `ptr` is the page handed out by the most recent allocation.
    #[must_use]
    fn alloced(&self, ptr: NonNull<u8>) -> bool;

    /// Number of bytes in all pages the pool has made available over its lifetime.
    #[must_use]
    fn alloc_size(&self) -> usize;

    /// Number of bytes in pages that were freed and are awaiting reuse.
    #[must_use]
    fn freed_size(&self) -> usize;

    /// Preallocates bookkeeping for `additional` pages without allocating page storage.
    fn reserve(&mut self, additional: usize);

    /// Returns every page to the pool at once.
    ///
    /// The caller is expected to have freed all outstanding allocations already. Pointers
    /// obtained before the call must no longer be used.
    fn clear(&mut self);

    /// Allocates a page and moves `value` into it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`][crate::Error::Exhausted] if the pool is bounded and has no
    /// page left to give.
    fn alloc<T>(&mut self, value: T) -> Result<NonNull<T>>
    where
        Self: Sized,
    {
        const {
            assert!(
                size_of::<T>() <= Self::PAGE_SIZE,
                "type does not fit into a page of this pool"
            );
            assert!(
                align_of::<T>() <= PAGE_ALIGN,
                "type requires a stricter alignment than pages provide"
            );
        }

        let ptr = self.try_allocate(size_of::<T>())?.cast::<T>();

        // SAFETY: The page is at least size_of::<T>() bytes long and aligned to PAGE_ALIGN, which
        // is at least align_of::<T>() (both checked at compile time above). Nobody else has
        // access to a freshly allocated page.
        unsafe {
            ptr.write(value);
        }

        Ok(ptr)
    }

    /// Drops the object at `ptr` and returns its page to the pool.
    ///
    /// The destructor runs before the page is released, so a destructor that itself allocates
    /// from this pool cannot be handed the page that is being released.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `ptr` was returned by [`alloc()`][Self::alloc] on this pool,
    /// that the object has not been freed since and that no references to it remain in use.
    unsafe fn free_typed<T>(&mut self, ptr: NonNull<T>)
    where
        Self: Sized,
    {
        // SAFETY: Forwarding safety requirements to the caller.
        unsafe {
            ptr.drop_in_place();
        }

        // SAFETY: Forwarding safety requirements to the caller.
        unsafe {
            self.free_page(ptr.cast());
        }
    }
}
