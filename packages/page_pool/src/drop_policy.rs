/// Determines what happens when a pool is dropped while pages are still handed out.
///
/// The pools only manage raw storage. They never run destructors of objects placed into their
/// pages, so dropping a pool with live pages silently releases memory that callers may still
/// point into. The default tolerates this; [`MustBeEmpty`][DropPolicy::MustBeEmpty] turns it
/// into a panic, which is a convenient way to catch leaked entities at shutdown.
///
/// # Examples
///
/// ```
/// use page_pool::{DropPolicy, GrowablePagePool};
///
/// let pool = GrowablePagePool::<64>::builder()
///     .drop_policy(DropPolicy::MustBeEmpty)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool may be dropped with pages still handed out. This is the default.
    #[default]
    MayDropLive,

    /// The pool will panic if any page is still handed out when the pool is dropped.
    ///
    /// The check is skipped if the thread is already panicking, so that the original panic is
    /// not obscured.
    MustBeEmpty,
}
