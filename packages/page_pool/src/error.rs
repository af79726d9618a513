use thiserror::Error;

/// Errors reported by the fallible page pool operations.
///
/// Only conditions that a caller can reasonably recover from are reported this way. Contract
/// violations such as freeing a pointer the pool never handed out are programming errors and
/// result in a panic instead.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The requested allocation does not fit into a single page of the pool.
    #[error("requested {requested} bytes from a pool of {page_size}-byte pages")]
    PageTooSmall {
        /// Number of bytes the caller asked for.
        requested: usize,

        /// Size of a page in the pool.
        page_size: usize,
    },

    /// Every page of a bounded pool is handed out and no more can be created.
    ///
    /// Callers typically react by falling back to a growable pool.
    #[error("all {capacity} pages of the pool are in use")]
    Exhausted {
        /// Total number of pages the pool can ever hold.
        capacity: usize,
    },
}

/// A specialized `Result` type for page pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug, Copy);

    #[test]
    fn messages_name_the_numbers_involved() {
        let too_small = Error::PageTooSmall {
            requested: 100,
            page_size: 64,
        };
        assert_eq!(
            too_small.to_string(),
            "requested 100 bytes from a pool of 64-byte pages"
        );

        let exhausted = Error::Exhausted { capacity: 8 };
        assert_eq!(exhausted.to_string(), "all 8 pages of the pool are in use");
    }
}
