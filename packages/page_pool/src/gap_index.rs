use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;

/// A range of released positions inside a [`StablePositionAllocator`][crate::StablePositionAllocator]
/// that is waiting to be reused.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Gap {
    position: usize,
    size: usize,
}

impl Gap {
    #[must_use]
    pub(crate) fn new(position: usize, size: usize) -> Self {
        assert!(size > 0, "a gap must cover at least one position");

        Self { position, size }
    }

    /// First position covered by the gap.
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of positions covered by the gap.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Position directly after the last position covered by the gap.
    #[must_use]
    pub fn end(&self) -> usize {
        self.position
            .checked_add(self.size)
            .expect("a gap cannot extend beyond the addressable positions")
    }
}

/// Free ranges indexed twice: by size for best-fit lookup and by position for merging.
///
/// Both indexes always describe the same set of gaps. Ordering the size index by
/// `(size, position)` means that among equally sized gaps the one at the lowest position wins.
#[derive(Debug, Default)]
pub(crate) struct GapIndex {
    by_size: BTreeSet<(usize, usize)>,

    /// Maps the first position of each gap to its size.
    by_position: BTreeMap<usize, usize>,
}

impl GapIndex {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.by_position.len()
    }

    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        self.by_position.is_empty()
    }

    /// Records a new gap.
    ///
    /// # Panics
    ///
    /// Panics if a gap already starts at the same position.
    pub(crate) fn insert(&mut self, gap: Gap) {
        let previous = self.by_position.insert(gap.position, gap.size);

        assert!(
            previous.is_none(),
            "position {} was released twice without being allocated in between",
            gap.position
        );

        self.by_size.insert((gap.size, gap.position));
    }

    fn remove(&mut self, gap: Gap) {
        let removed_by_position = self.by_position.remove(&gap.position);
        let removed_by_size = self.by_size.remove(&(gap.size, gap.position));

        assert!(
            removed_by_position == Some(gap.size) && removed_by_size,
            "gap {gap:?} is not recorded in the gap index"
        );
    }

    /// Claims `count` positions from the smallest gap that can hold them, returning the first
    /// claimed position. Whatever is left of the gap stays recorded as a smaller gap.
    ///
    /// Returns `None` if no gap is large enough.
    pub(crate) fn take_best_fit(&mut self, count: usize) -> Option<usize> {
        let &(size, position) = self.by_size.range((count, 0)..).next()?;

        self.remove(Gap::new(position, size));

        if let Some(remainder) = size.checked_sub(count).filter(|remainder| *remainder > 0) {
            let remainder_position = position
                .checked_add(count)
                .expect("remainder lies within the original gap, so it cannot overflow");

            self.insert(Gap::new(remainder_position, remainder));
        }

        Some(position)
    }

    /// Merges gaps that directly touch each other until no two recorded gaps are adjacent.
    ///
    /// Returns the number of merges performed.
    pub(crate) fn merge_adjacent(&mut self) -> usize {
        let mut merges: usize = 0;
        let mut resume_from = 0;

        while let Some((left, right)) = self.find_adjacent_pair(resume_from) {
            self.remove(left);
            self.remove(right);

            let merged_size = left
                .size
                .checked_add(right.size)
                .expect("merged gap lies within the backing sequence, so it cannot overflow");

            self.insert(Gap::new(left.position, merged_size));

            // The merged gap may now touch the one after it, so continue from the merged gap.
            resume_from = left.position;
            merges = merges.wrapping_add(1);
        }

        merges
    }

    fn find_adjacent_pair(&self, from: usize) -> Option<(Gap, Gap)> {
        self.by_position
            .range(from..)
            .map(|(&position, &size)| Gap { position, size })
            .tuple_windows()
            .find(|(left, right)| left.end() == right.position)
    }

    /// Removes and returns the last gap if it ends exactly at `end`.
    pub(crate) fn take_trailing(&mut self, end: usize) -> Option<Gap> {
        let (&position, &size) = self.by_position.last_key_value()?;
        let gap = Gap { position, size };

        if gap.end() != end {
            return None;
        }

        self.remove(gap);
        Some(gap)
    }

    /// Iterates over the gaps in order of position.
    pub(crate) fn iter(&self) -> impl Iterator<Item = Gap> {
        self.by_position
            .iter()
            .map(|(&position, &size)| Gap { position, size })
    }

    pub(crate) fn clear(&mut self) {
        self.by_size.clear();
        self.by_position.clear();
    }

    /// Verifies that both indexes agree and that no gap overlaps another or extends past
    /// `backing_len`.
    #[cfg(debug_assertions)]
    #[cfg_attr(test, mutants::skip)] // This is just a sanity check, not functional logic.
    pub(crate) fn integrity_check(&self, backing_len: usize) {
        assert_eq!(
            self.by_size.len(),
            self.by_position.len(),
            "size and position indexes disagree on the number of gaps"
        );

        for gap in self.iter() {
            assert!(gap.size > 0, "gap {gap:?} is empty");
            assert!(
                self.by_size.contains(&(gap.size, gap.position)),
                "gap {gap:?} is missing from the size index"
            );
            assert!(
                gap.end() <= backing_len,
                "gap {gap:?} extends past the backing sequence of {backing_len} elements"
            );
        }

        for (left, right) in self.iter().tuple_windows() {
            assert!(
                left.end() <= right.position,
                "gap {left:?} overlaps gap {right:?}"
            );
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn gaps(index: &GapIndex) -> Vec<(usize, usize)> {
        index.iter().map(|gap| (gap.position(), gap.size())).collect()
    }

    #[test]
    fn best_fit_picks_smallest_sufficient_gap() {
        let mut index = GapIndex::new();
        index.insert(Gap::new(0, 10));
        index.insert(Gap::new(20, 4));
        index.insert(Gap::new(30, 6));

        assert_eq!(index.take_best_fit(5), Some(30));
        assert_eq!(gaps(&index), [(0, 10), (20, 4), (35, 1)]);
    }

    #[test]
    fn best_fit_exact_size_leaves_no_remainder() {
        let mut index = GapIndex::new();
        index.insert(Gap::new(8, 4));

        assert_eq!(index.take_best_fit(4), Some(8));
        assert!(index.is_empty());
    }

    #[test]
    fn best_fit_tie_picks_lowest_position() {
        let mut index = GapIndex::new();
        index.insert(Gap::new(40, 5));
        index.insert(Gap::new(10, 5));
        index.insert(Gap::new(25, 5));

        assert_eq!(index.take_best_fit(5), Some(10));
        assert_eq!(index.take_best_fit(5), Some(25));
        assert_eq!(index.take_best_fit(5), Some(40));
    }

    #[test]
    fn best_fit_none_when_nothing_large_enough() {
        let mut index = GapIndex::new();
        index.insert(Gap::new(0, 3));

        assert_eq!(index.take_best_fit(4), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn merge_adjacent_collapses_chains() {
        let mut index = GapIndex::new();
        index.insert(Gap::new(10, 5));
        index.insert(Gap::new(15, 5));
        index.insert(Gap::new(20, 2));
        index.insert(Gap::new(30, 1));

        assert_eq!(index.merge_adjacent(), 2);
        assert_eq!(gaps(&index), [(10, 12), (30, 1)]);
    }

    #[test]
    fn merge_adjacent_leaves_separated_gaps_alone() {
        let mut index = GapIndex::new();
        index.insert(Gap::new(0, 1));
        index.insert(Gap::new(2, 1));

        assert_eq!(index.merge_adjacent(), 0);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn take_trailing_only_at_end() {
        let mut index = GapIndex::new();
        index.insert(Gap::new(2, 3));
        index.insert(Gap::new(7, 3));

        assert_eq!(index.take_trailing(11), None);
        assert_eq!(index.take_trailing(10), Some(Gap::new(7, 3)));
        assert_eq!(gaps(&index), [(2, 3)]);
    }

    #[test]
    #[should_panic]
    fn duplicate_position_panics() {
        let mut index = GapIndex::new();
        index.insert(Gap::new(4, 1));
        index.insert(Gap::new(4, 2));
    }

    #[test]
    #[should_panic]
    fn empty_gap_panics() {
        _ = Gap::new(4, 0);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn integrity_check_detects_overlap() {
        let mut index = GapIndex::new();
        index.insert(Gap::new(0, 5));
        index.insert(Gap::new(3, 5));

        index.integrity_check(100);
    }

    #[test]
    fn clear_empties_both_indexes() {
        let mut index = GapIndex::new();
        index.insert(Gap::new(0, 5));
        index.clear();

        assert!(index.is_empty());
        assert_eq!(index.take_best_fit(1), None);
    }
}
