/// Determines what happens when a pool is dropped while callers still hold blocks from it.
///
/// By default, the pool releases its chunks regardless of outstanding blocks.
///
/// # Examples
///
/// ```
/// use block_pool::{BlockPool, DropPolicy};
///
/// // The drop policy is set at pool creation time.
/// let pool = BlockPool::builder()
///     .block_size(32)
///     .drop_policy(DropPolicy::MustNotHaveOutstandingBlocks)
///     .build()?;
/// # Ok::<(), block_pool::Error>(())
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool releases all of its chunks when dropped, even if callers still hold blocks.
    /// Those blocks dangle afterwards. This is the default.
    #[default]
    MayHaveOutstandingBlocks,

    /// The pool will panic if callers still hold blocks when it is dropped.
    ///
    /// This may be valuable if the blocks are referenced from places that the pool cannot see,
    /// for example raw pointers stored in other data structures, and releasing the memory
    /// while such references exist would be a bug.
    MustNotHaveOutstandingBlocks,
}
