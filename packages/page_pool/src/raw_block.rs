use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;

/// Alignment of every page payload handed out by the pools in this crate.
///
/// Objects placed into a page through [`PagePool::alloc()`][crate::PagePool::alloc] must not
/// require a stricter alignment than this.
pub const PAGE_ALIGN: usize = 16;

/// Distance in bytes between the starts of two consecutive pages of size `page_size`.
#[must_use]
pub(crate) const fn page_stride(page_size: usize) -> usize {
    page_size.next_multiple_of(PAGE_ALIGN)
}

/// One zero-initialized heap allocation aligned to [`PAGE_ALIGN`].
///
/// This is the only type in the crate that talks to the global allocator. The block never moves
/// for as long as it exists, so pointers into it stay valid until it is dropped.
///
/// # Out of band access
///
/// The block does not create or keep references to its memory, so it is valid to access the
/// memory via pointers obtained from [`ptr_at()`][Self::ptr_at] even while not holding any
/// reference to the block, as long as the block is alive.
#[derive(Debug)]
pub(crate) struct RawBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RawBlock {
    /// Allocates a new zero-filled block of `size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero or too large to describe as a layout.
    #[must_use]
    pub(crate) fn zeroed(size: usize) -> Self {
        assert!(size > 0, "RawBlock must have non-zero size");

        let layout = Layout::from_size_align(size, PAGE_ALIGN)
            .expect("block size must not overflow isize when rounded up to the page alignment");

        // SAFETY: The layout has non-zero size, guarded by the assertion above.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).expect(
            "we do not intend to handle allocation failure as a real possibility - OOM is panic",
        );

        Self { ptr, layout }
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.layout.size()
    }

    /// Returns a pointer to the byte at `offset` within the block.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is out of bounds.
    #[must_use]
    pub(crate) fn ptr_at(&self, offset: usize) -> NonNull<u8> {
        assert!(
            offset < self.len(),
            "offset {offset} out of bounds in block of {} bytes",
            self.len()
        );

        // SAFETY: Guarded by the bounds check above, so the result stays inside our allocation.
        unsafe { self.ptr.add(offset) }
    }

    /// Returns the offset of `ptr` from the start of the block, or `None` if `ptr` does not
    /// point into the block.
    #[must_use]
    pub(crate) fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let offset = ptr
            .as_ptr()
            .addr()
            .checked_sub(self.ptr.as_ptr().addr())?;

        (offset < self.len()).then_some(offset)
    }

    /// Overwrites `len` bytes starting at `offset` with zeroes.
    ///
    /// # Panics
    ///
    /// Panics if the range does not lie within the block.
    pub(crate) fn zero_range(&mut self, offset: usize, len: usize) {
        let end = offset
            .checked_add(len)
            .expect("zeroed range cannot extend beyond virtual memory");

        assert!(
            end <= self.len(),
            "zeroed range {offset}..{end} out of bounds in block of {} bytes",
            self.len()
        );

        // SAFETY: The range was bounds-checked above and we hold an exclusive reference to the
        // block. We write through a raw pointer, so no references to the memory are created.
        unsafe {
            self.ptr.add(offset).write_bytes(0, len);
        }
    }

    pub(crate) fn zero_all(&mut self) {
        self.zero_range(0, self.len());
    }
}

impl Drop for RawBlock {
    fn drop(&mut self) {
        // SAFETY: The layout must match between alloc and dealloc. It does.
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

// SAFETY: The block is plain bytes behind a raw pointer that nothing else owns. There is nothing
// inherently tied to a thread about it.
unsafe impl Send for RawBlock {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::undocumented_unsafe_blocks,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed_and_aligned() {
        let block = RawBlock::zeroed(100);

        assert_eq!(block.len(), 100);
        assert_eq!(block.ptr_at(0).as_ptr().addr() % PAGE_ALIGN, 0);

        for offset in 0..block.len() {
            assert_eq!(unsafe { block.ptr_at(offset).read() }, 0);
        }
    }

    #[test]
    fn offset_of_inside_and_outside() {
        let block = RawBlock::zeroed(32);
        let other = RawBlock::zeroed(32);

        assert_eq!(block.offset_of(block.ptr_at(0)), Some(0));
        assert_eq!(block.offset_of(block.ptr_at(31)), Some(31));
        assert_eq!(block.offset_of(other.ptr_at(0)), None);
    }

    #[test]
    fn zero_range_only_touches_range() {
        let mut block = RawBlock::zeroed(8);

        for offset in 0..8 {
            unsafe { block.ptr_at(offset).write(0xAB) };
        }

        block.zero_range(2, 4);

        let bytes: Vec<u8> = (0..8)
            .map(|offset| unsafe { block.ptr_at(offset).read() })
            .collect();
        assert_eq!(bytes, [0xAB, 0xAB, 0, 0, 0, 0, 0xAB, 0xAB]);
    }

    #[test]
    #[should_panic]
    fn zero_range_out_of_bounds_panics() {
        let mut block = RawBlock::zeroed(8);
        block.zero_range(4, 5);
    }

    #[test]
    #[should_panic]
    fn zero_size_is_panic() {
        drop(RawBlock::zeroed(0));
    }

    #[test]
    fn stride_rounds_up_to_alignment() {
        assert_eq!(page_stride(1), PAGE_ALIGN);
        assert_eq!(page_stride(PAGE_ALIGN), PAGE_ALIGN);
        assert_eq!(page_stride(PAGE_ALIGN + 1), 2 * PAGE_ALIGN);
    }
}
