use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::pal::MemoryFacade;
use crate::pool::DEFAULT_BLOCKS_PER_CHUNK;
use crate::{BlockGeometry, BlockPool, DropPolicy, Result};

/// Builder for creating an instance of [`BlockPool`].
///
/// The block size is mandatory and can be given as a byte count via
/// [`block_size()`](Self::block_size), as a [`Layout`] via [`layout()`](Self::layout) or
/// derived from a type via [`layout_of::<T>()`](Self::layout_of). Other settings are optional.
///
/// A block size smaller than the free-list link the pool stores in every free block is
/// silently raised to [`BlockPool::MIN_BLOCK_SIZE`].
///
/// # Examples
///
/// Using a byte count:
///
/// ```
/// use block_pool::BlockPool;
/// use new_zealand::nz;
///
/// let pool = BlockPool::builder()
///     .block_size(48)
///     .blocks_per_chunk(nz!(256))
///     .build()?;
///
/// assert_eq!(pool.block_size(), 48);
/// assert_eq!(pool.capacity(), 256);
/// # Ok::<(), block_pool::Error>(())
/// ```
///
/// Using type-based layout:
///
/// ```
/// use block_pool::BlockPool;
///
/// let pool = BlockPool::builder().layout_of::<[u64; 4]>().build()?;
///
/// assert_eq!(pool.block_size(), 32);
/// assert_eq!(pool.block_align(), 8);
/// # Ok::<(), block_pool::Error>(())
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing pool configuration to happen on different threads than where the pool is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct BlockPoolBuilder {
    block_size: Option<usize>,
    block_align: usize,
    blocks_per_chunk: NonZero<usize>,
    drop_policy: DropPolicy,
    memory: MemoryFacade,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl BlockPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            block_size: None,
            block_align: 1,
            blocks_per_chunk: DEFAULT_BLOCKS_PER_CHUNK,
            drop_policy: DropPolicy::default(),
            memory: MemoryFacade::real(),
            _not_sync: PhantomData,
        }
    }

    /// Sets the size in bytes of each block.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    #[inline]
    pub fn block_size(mut self, size: usize) -> Self {
        assert!(size > 0, "BlockPool must have non-zero block size");
        self.block_size = Some(size);
        self
    }

    /// Sets the minimum alignment of each block. The default is 1, raised internally to the
    /// alignment of the free-list link.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[inline]
    pub fn block_align(mut self, align: usize) -> Self {
        assert!(
            align.is_power_of_two(),
            "BlockPool block alignment must be a power of two"
        );
        self.block_align = align;
        self
    }

    /// Sets the block size and alignment from a memory layout.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use block_pool::BlockPool;
    ///
    /// let layout = Layout::from_size_align(24, 16).unwrap();
    /// let pool = BlockPool::builder().layout(layout).build()?;
    ///
    /// // The size is padded to a multiple of the alignment.
    /// assert_eq!(pool.block_size(), 32);
    /// assert_eq!(pool.block_align(), 16);
    /// # Ok::<(), block_pool::Error>(())
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the layout has zero size.
    #[inline]
    pub fn layout(mut self, layout: Layout) -> Self {
        assert!(layout.size() > 0, "BlockPool must have non-zero block size");
        self.block_size = Some(layout.size());
        self.block_align = layout.align();
        self
    }

    /// Sets the block size and alignment to fit one value of type `T`.
    ///
    /// # Panics
    ///
    /// Panics if `T` is a zero-sized type.
    #[inline]
    pub fn layout_of<T>(self) -> Self {
        self.layout(Layout::new::<T>())
    }

    /// Sets how many blocks each newly acquired chunk is carved into.
    ///
    /// Larger chunks mean fewer (slower) growth cycles but a coarser memory footprint, since
    /// memory is acquired in whole chunks and never returned while the pool is alive.
    #[inline]
    pub fn blocks_per_chunk(mut self, count: NonZero<usize>) -> Self {
        self.blocks_per_chunk = count;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs what happens
    /// if callers still hold blocks when the pool is dropped.
    #[inline]
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    #[cfg(test)]
    pub(crate) fn memory(mut self, memory: MemoryFacade) -> Self {
        self.memory = memory;
        self
    }

    /// Builds the pool with the specified configuration, eagerly acquiring its first chunk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChunkTooLarge`][crate::Error::ChunkTooLarge] if a chunk with the
    /// requested geometry cannot be described,
    /// [`Error::CapacityExhausted`][crate::Error::CapacityExhausted] if one chunk would hold
    /// more blocks than a pool can address, and
    /// [`Error::OutOfMemory`][crate::Error::OutOfMemory] if the first chunk cannot be
    /// allocated.
    ///
    /// # Panics
    ///
    /// Panics if no block size has been set using [`block_size()`](Self::block_size),
    /// [`layout()`](Self::layout) or [`layout_of()`](Self::layout_of).
    pub fn build(self) -> Result<BlockPool> {
        let block_size = self.block_size.expect(
            "block size must be set using .block_size(), .layout() or .layout_of::<T>() before calling .build()",
        );

        let geometry =
            BlockGeometry::calculate(block_size, self.block_align, self.blocks_per_chunk)?;

        BlockPool::new_inner(geometry, self.drop_policy, self.memory)
    }
}
