#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Page pools and a positional range allocator for objects that are created and destroyed at a
//! high rate, such as the units, projectiles and commands of a simulation tick.
//!
//! Instead of going to the global allocator for every object, storage is handed out from
//! pre-reserved pages and freed pages are recycled with constant-time bookkeeping. Every page
//! handed out is zero-filled and aligned to [`PAGE_ALIGN`].
//!
//! # Allocators
//!
//! - [`GrowablePagePool`] grows one page at a time without limit. Freed pages are reused most
//!   recently freed first.
//! - [`ChunkedFixedPool`] has a fixed capacity of `N × K` pages materialized one chunk of `K`
//!   pages at a time. Each page carries its own index, so freeing needs no lookup. Running out of
//!   pages is reported as [`None`] so callers can fall back to another pool.
//! - [`StaticPool`] has a fixed capacity of `N` pages in one contiguous block allocated up front.
//! - [`StablePositionAllocator`] hands out contiguous ranges of positions in a shared backing
//!   sequence, reusing freed ranges on a best-fit basis and merging adjacent freed ranges in
//!   periodic compaction passes. [`SharedStablePositionAllocator`] allows allocating from several
//!   threads at once.
//!
//! The three page pools implement [`PagePool`], which also provides typed allocation on top of
//! the raw page interface.
//!
//! # Example
//!
//! ```
//! use page_pool::{ChunkedFixedPool, Error, GrowablePagePool, PagePool};
//!
//! #[derive(Default)]
//! struct Unit {
//!     health: u32,
//!     position: [f32; 2],
//! }
//!
//! let mut hot = ChunkedFixedPool::<16, 1, 2>::new();
//! let mut overflow = GrowablePagePool::<16>::new();
//!
//! let a = hot.alloc(Unit::default()).unwrap();
//! let b = hot.alloc(Unit::default()).unwrap();
//!
//! // The bounded pool is exhausted, so the third unit lands in the growable pool.
//! let c = match hot.alloc(Unit::default()) {
//!     Ok(unit) => unit,
//!     Err(Error::Exhausted { .. }) => overflow.alloc(Unit::default()).unwrap(),
//!     Err(e) => panic!("{e}"),
//! };
//!
//! // SAFETY: Each pointer came from the pool it is returned to and is freed exactly once.
//! unsafe {
//!     hot.free_typed(a);
//!     hot.free_typed(b);
//!     overflow.free_typed(c);
//! }
//! ```
//!
//! # Thread safety
//!
//! The page pools are thread-mobile ([`Send`]) but not thread-safe ([`Sync`]). Each instance is
//! meant to be owned by one subsystem and used from one thread at a time.

mod builder;
mod chunked;
mod coordinates;
mod drop_policy;
mod error;
mod gap_index;
mod growable;
mod pool;
mod raw_block;
mod shared;
mod stable_position;
mod static_pool;

pub use builder::*;
pub use chunked::ChunkedFixedPool;
pub(crate) use coordinates::*;
pub use drop_policy::*;
pub use error::Error;
pub(crate) use error::Result;
pub use gap_index::Gap;
pub(crate) use gap_index::GapIndex;
pub use growable::GrowablePagePool;
pub use pool::PagePool;
pub use raw_block::PAGE_ALIGN;
pub(crate) use raw_block::{RawBlock, page_stride};
pub use shared::SharedStablePositionAllocator;
pub use stable_position::{DEFAULT_COMPACTION_TRIGGER, NO_POSITION, StablePositionAllocator};
pub use static_pool::StaticPool;
