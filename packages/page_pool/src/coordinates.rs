use num_integer::Integer;

/// Location of a page inside a chunked pool, derived from its global page index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PageCoordinates {
    /// The index of the chunk containing this page.
    chunk_index: usize,
    /// The index within the chunk where this page is stored.
    index_in_chunk: usize,
}

impl PageCoordinates {
    #[must_use]
    pub(crate) fn from_page_index(page_index: usize, pages_per_chunk: usize) -> Self {
        let (chunk_index, index_in_chunk) = page_index.div_rem(&pages_per_chunk);

        Self {
            chunk_index,
            index_in_chunk,
        }
    }

    #[must_use]
    pub(crate) fn chunk_index(&self) -> usize {
        self.chunk_index
    }

    #[must_use]
    pub(crate) fn index_in_chunk(&self) -> usize {
        self.index_in_chunk
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn splits_by_chunk_size() {
        let first = PageCoordinates::from_page_index(0, 4);
        assert_eq!((first.chunk_index(), first.index_in_chunk()), (0, 0));

        let last_of_first = PageCoordinates::from_page_index(3, 4);
        assert_eq!(
            (last_of_first.chunk_index(), last_of_first.index_in_chunk()),
            (0, 3)
        );

        let in_third = PageCoordinates::from_page_index(9, 4);
        assert_eq!((in_third.chunk_index(), in_third.index_in_chunk()), (2, 1));
    }
}
