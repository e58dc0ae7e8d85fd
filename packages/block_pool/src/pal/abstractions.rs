//! Memory provider trait definitions.

use std::alloc::Layout;
use std::fmt::Debug;
use std::ptr::NonNull;

/// Supplies and takes back the raw chunks that a pool carves into blocks.
///
/// Implementations must be usable from any thread, as chunk growth may be triggered by
/// whichever thread happens to observe an empty free list.
pub(crate) trait Memory: Debug + Send + Sync + 'static {
    /// Allocates uninitialized memory matching `layout`.
    ///
    /// Returns `None` if the memory cannot be obtained. The layout always has a non-zero size.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Returns memory previously obtained from [`allocate()`][Self::allocate].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate()` on this provider (or a clone of it) with
    /// the same `layout` and must not have been released already.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);
}
