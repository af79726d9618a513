use std::ops::{Index, IndexMut};

use tracing::{debug, trace};

use crate::{Gap, GapIndex, SharedStablePositionAllocator, StablePositionAllocatorBuilder};

/// Position returned when allocating zero elements. It never refers to a real element.
pub const NO_POSITION: usize = usize::MAX;

/// Share of the backing sequence length at which the number of gaps triggers an automatic
/// compaction pass, unless the builder was given a different value.
pub const DEFAULT_COMPACTION_TRIGGER: f64 = 0.025;

/// Hands out contiguous ranges of positions in one shared backing sequence of `T`.
///
/// Once allocated, a range keeps its position until it is freed: the backing sequence only ever
/// grows at the end or shrinks from the end, so nothing is ever moved to close holes. Freed
/// ranges in the middle of the sequence are recorded as gaps and reused on a best-fit basis.
///
/// Gaps that end up next to each other are merged lazily by a compaction pass, which runs on its
/// own once the number of gaps reaches a configurable share of the sequence length (see
/// [`StablePositionAllocatorBuilder::compaction_trigger()`]) and can also be requested via
/// [`compact_gaps()`][Self::compact_gaps]. Compaction also returns a gap at the end of the
/// sequence to the append path by truncating the sequence.
///
/// New and freed elements hold `T::default()`.
///
/// # Example
///
/// ```
/// use page_pool::StablePositionAllocator;
///
/// let mut vertices = StablePositionAllocator::<[f32; 2]>::new();
///
/// let quad = vertices.allocate(4);
/// let triangle = vertices.allocate(3);
/// assert_eq!(vertices.len(), 7);
///
/// vertices[triangle] = [1.0, 2.0];
///
/// // Freeing the range at the end of the sequence shrinks the sequence right away.
/// vertices.free(triangle, 3);
/// assert_eq!(vertices.len(), 4);
/// # vertices.free(quad, 4);
/// ```
///
/// # Thread safety
///
/// The allocator is [`Send`] and [`Sync`] if `T` is. To allocate from several threads at once,
/// convert it with [`into_shared()`][Self::into_shared].
#[derive(Debug)]
pub struct StablePositionAllocator<T> {
    data: Vec<T>,
    gaps: GapIndex,
    compaction_trigger: f64,
}

impl<T: Default> StablePositionAllocator<T> {
    /// Creates a new empty allocator with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a new empty allocator whose backing sequence can hold `capacity` elements before
    /// it needs to reallocate.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::builder().initial_capacity(capacity).build()
    }

    /// Starts building a new allocator.
    pub fn builder() -> StablePositionAllocatorBuilder<T> {
        StablePositionAllocatorBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(initial_capacity: usize, compaction_trigger: f64) -> Self {
        Self {
            data: Vec::with_capacity(initial_capacity),
            gaps: GapIndex::new(),
            compaction_trigger,
        }
    }

    /// Allocates a contiguous range of `count` elements and returns the position of the first.
    ///
    /// The smallest gap that fits is reused if there is one, with ties going to the gap at the
    /// lowest position. Otherwise the range is appended to the end of the backing sequence.
    ///
    /// Allocating zero elements returns [`NO_POSITION`] and changes nothing.
    #[must_use]
    pub fn allocate(&mut self, count: usize) -> usize {
        if count == 0 {
            return NO_POSITION;
        }

        let position = self
            .gaps
            .take_best_fit(count)
            .unwrap_or_else(|| self.append(count));

        trace!(position, count, len = self.data.len(), "allocated range");

        #[cfg(debug_assertions)]
        self.integrity_check();

        position
    }

    fn append(&mut self, count: usize) -> usize {
        let position = self.data.len();

        let new_len = position
            .checked_add(count)
            .expect("backing sequence length cannot exceed usize::MAX");

        self.data.resize_with(new_len, T::default);

        position
    }

    /// Frees the range of `count` elements starting at `first`, resetting them to
    /// `T::default()`.
    ///
    /// A range at the end of the backing sequence is reclaimed right away by truncating the
    /// sequence. Any other range becomes a gap, which may trigger a compaction pass.
    ///
    /// Freeing zero elements does nothing. The caller's copy of `first` is not touched, so a
    /// handle that is kept around after being freed is stale. Freeing it again is caught by the
    /// checks below as long as the range has not been handed out anew.
    ///
    /// # Panics
    ///
    /// Panics if the range extends past the end of the backing sequence or starts at the same
    /// position as a gap that is already free. Debug builds also detect ranges that overlap an
    /// existing gap.
    pub fn free(&mut self, first: usize, count: usize) {
        if count == 0 {
            return;
        }

        let end = first
            .checked_add(count)
            .expect("range end cannot exceed usize::MAX");

        assert!(
            end <= self.data.len(),
            "free({first}, {count}) extends past the end of the backing sequence of {} elements",
            self.data.len()
        );

        if end == self.data.len() {
            self.data.truncate(first);

            trace!(
                position = first,
                count,
                len = self.data.len(),
                "freed range at end of backing sequence"
            );
        } else {
            self.data
                .get_mut(first..end)
                .expect("range was bounds checked above")
                .fill_with(T::default);

            self.gaps.insert(Gap::new(first, count));

            trace!(
                position = first,
                count,
                gaps = self.gaps.len(),
                "freed range into gap"
            );

            if self.gaps.len() >= self.compaction_threshold() {
                self.compact_gaps();
            }
        }

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    /// Number of gaps at which the next free triggers compaction.
    #[expect(
        clippy::cast_precision_loss,
        reason = "a rough threshold is all we need, exact at any realistic length"
    )]
    #[expect(clippy::cast_sign_loss, reason = "trigger and length are never negative")]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "result is at most the sequence length, which fits in usize"
    )]
    fn compaction_threshold(&self) -> usize {
        (self.compaction_trigger * self.data.len() as f64).ceil() as usize
    }

    /// Merges all adjacent gaps and truncates the backing sequence if a gap remains at its end.
    pub fn compact_gaps(&mut self) {
        let merges = self.gaps.merge_adjacent();

        let trimmed = self.gaps.take_trailing(self.data.len());

        if let Some(gap) = trimmed {
            self.data.truncate(gap.position());
        }

        debug!(
            merges,
            trimmed = trimmed.map_or(0, |gap| gap.size()),
            len = self.data.len(),
            gaps = self.gaps.len(),
            "compacted gaps"
        );

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    /// Compacts gaps and then expects the allocator to be completely empty.
    ///
    /// # Panics
    ///
    /// Panics if any range is still allocated.
    pub fn reset(&mut self) {
        self.compact_gaps();

        assert!(
            self.data.is_empty() && self.gaps.is_empty(),
            "reset() called with {} elements still in the backing sequence and {} gaps",
            self.data.len(),
            self.gaps.len()
        );
    }

    /// Wraps the allocator so that several threads can allocate from it concurrently.
    #[must_use]
    pub fn into_shared(self) -> SharedStablePositionAllocator<T> {
        SharedStablePositionAllocator::new(self)
    }

    #[cfg(debug_assertions)]
    #[cfg_attr(test, mutants::skip)] // This is just a sanity check, not functional logic.
    fn integrity_check(&self) {
        self.gaps.integrity_check(self.data.len());
    }
}

impl<T> StablePositionAllocator<T> {
    /// Length of the backing sequence, including elements that sit in gaps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the backing sequence is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The whole backing sequence, including elements that sit in gaps.
    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// The whole backing sequence, including elements that sit in gaps.
    #[must_use]
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Number of gaps currently recorded.
    #[must_use]
    pub fn gap_count(&self) -> usize {
        self.gaps.len()
    }

    /// Iterates over the recorded gaps in order of position.
    pub fn gaps(&self) -> impl Iterator<Item = Gap> {
        self.gaps.iter()
    }
}

impl<T: Default> Default for StablePositionAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<usize> for StablePositionAllocator<T> {
    type Output = T;

    fn index(&self, position: usize) -> &Self::Output {
        self.data.get(position).unwrap_or_else(|| {
            panic!(
                "position {position} out of bounds in backing sequence of {} elements",
                self.data.len()
            )
        })
    }
}

impl<T> IndexMut<usize> for StablePositionAllocator<T> {
    fn index_mut(&mut self, position: usize) -> &mut Self::Output {
        let len = self.data.len();

        self.data.get_mut(position).unwrap_or_else(|| {
            panic!("position {position} out of bounds in backing sequence of {len} elements")
        })
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

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(StablePositionAllocator<u32>: Send, Sync);
    assert_not_impl_any!(StablePositionAllocator<Cell<u32>>: Sync);

    fn gaps<T: Default>(allocator: &StablePositionAllocator<T>) -> Vec<(usize, usize)> {
        allocator
            .gaps()
            .map(|gap| (gap.position(), gap.size()))
            .collect()
    }

    /// Compaction never runs on its own, so tests can observe individual gaps.
    fn without_auto_compaction() -> StablePositionAllocator<u32> {
        StablePositionAllocator::builder()
            .compaction_trigger(1.0)
            .build()
    }

    #[test]
    fn zero_count_allocate_returns_sentinel_and_changes_nothing() {
        let mut allocator = StablePositionAllocator::<u32>::new();

        assert_eq!(allocator.allocate(0), NO_POSITION);
        assert!(allocator.is_empty());
        assert_eq!(allocator.gap_count(), 0);
    }

    #[test]
    fn zero_count_free_is_noop() {
        let mut allocator = StablePositionAllocator::<u32>::new();
        _ = allocator.allocate(4);

        allocator.free(1, 0);

        assert_eq!(allocator.len(), 4);
        assert_eq!(allocator.gap_count(), 0);
    }

    #[test]
    fn appends_when_no_gaps() {
        let mut allocator = StablePositionAllocator::<u32>::new();

        assert_eq!(allocator.allocate(10), 0);
        assert_eq!(allocator.allocate(5), 10);
        assert_eq!(allocator.allocate(10), 15);
        assert_eq!(allocator.len(), 25);
    }

    #[test]
    fn middle_gap_is_reused_without_growing() {
        let mut allocator = StablePositionAllocator::<u32>::new();

        _ = allocator.allocate(10);
        let middle = allocator.allocate(5);
        _ = allocator.allocate(10);

        allocator.free(middle, 5);
        assert_eq!(allocator.len(), 25);

        assert_eq!(allocator.allocate(5), 10);
        assert_eq!(allocator.len(), 25);
        assert_eq!(allocator.gap_count(), 0);
    }

    #[test]
    fn freeing_tail_truncates() {
        let mut allocator = StablePositionAllocator::<u32>::new();

        _ = allocator.allocate(10);
        _ = allocator.allocate(5);
        let tail = allocator.allocate(10);

        allocator.free(tail, 10);

        assert_eq!(allocator.len(), 15);
        assert_eq!(allocator.gap_count(), 0);
    }

    #[test]
    fn adjacent_gaps_merge_and_satisfy_larger_request() {
        let mut allocator = without_auto_compaction();

        _ = allocator.allocate(10);
        let a = allocator.allocate(5);
        let b = allocator.allocate(5);
        _ = allocator.allocate(10);

        allocator.free(a, 5);
        allocator.free(b, 5);
        assert_eq!(gaps(&allocator), [(10, 5), (15, 5)]);

        allocator.compact_gaps();
        assert_eq!(gaps(&allocator), [(10, 10)]);

        assert_eq!(allocator.allocate(10), 10);
        assert_eq!(allocator.len(), 30);
    }

    #[test]
    fn default_trigger_compacts_automatically() {
        let mut allocator = StablePositionAllocator::<u32>::new();

        _ = allocator.allocate(10);
        let a = allocator.allocate(5);
        let b = allocator.allocate(5);
        _ = allocator.allocate(10);

        // With 30 elements the default trigger fires at the first gap already.
        allocator.free(a, 5);
        allocator.free(b, 5);

        assert_eq!(gaps(&allocator), [(10, 10)]);
    }

    #[test]
    fn default_trigger_waits_for_one_gap_per_forty_elements() {
        let mut allocator = StablePositionAllocator::<u32>::new();

        let ranges: Vec<usize> = (0..200).map(|_| allocator.allocate(2)).collect();
        assert_eq!(allocator.len(), 400);

        // Pairs of neighboring ranges, so that compaction has something to merge.
        for index in [0, 1, 4, 5, 8, 9, 12, 13, 16] {
            allocator.free(ranges[index], 2);
        }

        assert_eq!(
            gaps(&allocator),
            [
                (0, 2),
                (2, 2),
                (8, 2),
                (10, 2),
                (16, 2),
                (18, 2),
                (24, 2),
                (26, 2),
                (32, 2),
            ]
        );

        // The tenth gap reaches ceil(0.025 * 400) and triggers compaction.
        allocator.free(ranges[17], 2);

        assert_eq!(gaps(&allocator), [(0, 4), (8, 4), (16, 4), (24, 4), (32, 4)]);
        assert_eq!(allocator.len(), 400);
    }

    #[test]
    fn custom_trigger_compacts_when_gap_count_reaches_threshold() {
        let mut allocator = StablePositionAllocator::<u32>::builder()
            .compaction_trigger(0.5)
            .build();

        let ranges: Vec<usize> = (0..8).map(|_| allocator.allocate(1)).collect();

        allocator.free(ranges[0], 1);
        allocator.free(ranges[1], 1);
        allocator.free(ranges[3], 1);

        assert_eq!(gaps(&allocator), [(0, 1), (1, 1), (3, 1)]);

        // Four gaps in a sequence of eight elements is exactly the threshold.
        allocator.free(ranges[4], 1);

        assert_eq!(gaps(&allocator), [(0, 2), (3, 2)]);
        assert_eq!(allocator.len(), 8);
    }

    #[test]
    fn compaction_trims_trailing_gap() {
        let mut allocator = without_auto_compaction();

        _ = allocator.allocate(4);
        let a = allocator.allocate(4);
        let b = allocator.allocate(4);

        allocator.free(a, 4);
        allocator.free(b, 4);

        // b was at the tail, so it was truncated right away, leaving a as the final gap.
        assert_eq!(allocator.len(), 8);
        assert_eq!(gaps(&allocator), [(4, 4)]);

        allocator.compact_gaps();

        assert_eq!(allocator.len(), 4);
        assert_eq!(allocator.gap_count(), 0);
    }

    #[test]
    fn best_fit_prefers_smallest_then_lowest() {
        let mut allocator = without_auto_compaction();

        let first = allocator.allocate(8);
        _ = allocator.allocate(1);
        let second = allocator.allocate(3);
        _ = allocator.allocate(1);
        let third = allocator.allocate(3);
        _ = allocator.allocate(1);

        allocator.free(first, 8);
        allocator.free(third, 3);
        allocator.free(second, 3);

        assert_eq!(allocator.allocate(2), second);
        assert_eq!(allocator.allocate(3), third);
        assert_eq!(allocator.allocate(8), first);
    }

    #[test]
    fn best_fit_remainder_is_reused() {
        let mut allocator = without_auto_compaction();

        let a = allocator.allocate(10);
        _ = allocator.allocate(1);

        allocator.free(a, 10);

        assert_eq!(allocator.allocate(4), 0);
        assert_eq!(gaps(&allocator), [(4, 6)]);
        assert_eq!(allocator.allocate(6), 4);
        assert_eq!(allocator.len(), 11);
    }

    #[test]
    fn freed_elements_reset_to_default() {
        let mut allocator = without_auto_compaction();

        let a = allocator.allocate(3);
        _ = allocator.allocate(1);

        allocator.data_mut()[a..a + 3].fill(7);
        allocator.free(a, 3);

        assert_eq!(&allocator.data()[a..a + 3], [0, 0, 0]);
    }

    #[test]
    fn index_reads_and_writes() {
        let mut allocator = StablePositionAllocator::<u32>::new();
        let a = allocator.allocate(2);

        allocator[a + 1] = 42;

        assert_eq!(allocator[a + 1], 42);
        assert_eq!(allocator.data(), [0, 42]);
    }

    #[test]
    #[should_panic]
    fn index_out_of_bounds_panics() {
        let allocator = StablePositionAllocator::<u32>::new();
        _ = allocator[0];
    }

    #[test]
    fn reset_after_freeing_everything() {
        let mut allocator = without_auto_compaction();

        let a = allocator.allocate(3);
        let b = allocator.allocate(3);
        let c = allocator.allocate(3);

        allocator.free(a, 3);
        allocator.free(b, 3);
        allocator.free(c, 3);

        allocator.reset();

        assert!(allocator.is_empty());
        assert_eq!(allocator.gap_count(), 0);
    }

    #[test]
    #[should_panic]
    fn reset_with_live_allocations_panics() {
        let mut allocator = StablePositionAllocator::<u32>::new();
        _ = allocator.allocate(3);

        allocator.reset();
    }

    #[test]
    #[should_panic]
    fn free_past_end_panics() {
        let mut allocator = StablePositionAllocator::<u32>::new();
        _ = allocator.allocate(3);

        allocator.free(2, 2);
    }

    #[test]
    #[should_panic]
    fn double_free_of_gap_panics() {
        let mut allocator = without_auto_compaction();
        let a = allocator.allocate(3);
        _ = allocator.allocate(3);

        allocator.free(a, 3);
        allocator.free(a, 3);
    }

    #[test]
    #[should_panic]
    fn double_free_of_tail_panics() {
        let mut allocator = StablePositionAllocator::<u32>::new();
        _ = allocator.allocate(3);
        let tail = allocator.allocate(3);

        allocator.free(tail, 3);
        allocator.free(tail, 3);
    }

    #[test]
    fn with_capacity_does_not_allocate_elements() {
        let allocator = StablePositionAllocator::<u32>::with_capacity(100);

        assert!(allocator.is_empty());
        assert!(allocator.data.capacity() >= 100);
    }
}
