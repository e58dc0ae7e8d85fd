use std::alloc::Layout;
use std::mem;
use std::num::NonZero;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use new_zealand::nz;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::pal::MemoryFacade;
use crate::{
    Block, BlockArena, BlockGeometry, BlockPoolBuilder, DropPolicy, Error, FreeLink, FreeList,
    MAX_BLOCKS, RawChunk, Result,
};

/// Global counter for generating unique pool IDs.
static POOL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generates a unique pool ID.
fn generate_pool_id() -> u64 {
    POOL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

#[cfg(not(miri))]
pub(crate) const DEFAULT_BLOCKS_PER_CHUNK: NonZero<usize> = nz!(64);

// Under Miri, we use a smaller chunk because Miri test runtime scales by memory usage.
#[cfg(miri)]
pub(crate) const DEFAULT_BLOCKS_PER_CHUNK: NonZero<usize> = nz!(16);

/// A thread-safe pool of fixed-size memory blocks with a lock-free free list.
///
/// The pool hands out blocks of one size, fixed at construction. Memory is obtained in chunks
/// of [`blocks_per_chunk()`](Self::blocks_per_chunk) blocks; the first chunk is acquired when
/// the pool is built and further chunks whenever a caller asks for a block and none is free.
/// Chunks are only released when the pool is dropped (or its contents are transferred away via
/// [`take_from()`](Self::take_from)).
///
/// [`allocate()`](Self::allocate) and [`deallocate()`](Self::deallocate) take `&self` and never
/// block on a lock: free blocks form a singly-linked stack whose head is updated with
/// compare-and-swap. The head carries a generation tag, so a block that is popped, reused and
/// pushed back by other threads in the middle of a compare-and-swap cannot be mistaken for an
/// unchanged head. Only chunk growth takes a lock, which ensures that a single thread acquires
/// new memory at a time and that threads racing to grow do not all acquire a chunk.
///
/// # Examples
///
/// ```rust
/// use block_pool::BlockPool;
/// use new_zealand::nz;
///
/// let pool = BlockPool::new(16, nz!(4))?;
///
/// let block = pool.allocate()?;
///
/// // SAFETY: The block is 16 bytes, aligned for u32 and exclusively ours.
/// unsafe {
///     block.cast::<u32>().write(1234);
///     assert_eq!(block.cast::<u32>().read(), 1234);
/// }
///
/// pool.deallocate(block);
/// # Ok::<(), block_pool::Error>(())
/// ```
///
/// Sharing a pool between threads:
///
/// ```rust
/// use std::sync::Arc;
/// use std::thread;
///
/// use block_pool::BlockPool;
///
/// let pool = Arc::new(BlockPool::builder().layout_of::<u64>().build()?);
///
/// let workers = (0..4)
///     .map(|_| {
///         let pool = Arc::clone(&pool);
///         thread::spawn(move || {
///             for _ in 0..100 {
///                 let block = pool.allocate().unwrap();
///                 pool.deallocate(block);
///             }
///         })
///     })
///     .collect::<Vec<_>>();
///
/// for worker in workers {
///     worker.join().unwrap();
/// }
/// # Ok::<(), block_pool::Error>(())
/// ```
///
/// # Memory management
///
/// Dropping the pool releases every chunk, regardless of whether callers still hold blocks
/// carved from them. Any such [`Block`] handles dangle afterwards. Use
/// [`DropPolicy::MustNotHaveOutstandingBlocks`] to turn that situation into a panic.
///
/// # Thread safety
///
/// The pool is both [`Send`] and [`Sync`]. Operations that replace the pool's contents require
/// `&mut self`, so they can never overlap with an allocation or deallocation.
#[derive(Debug)]
pub struct BlockPool {
    /// We need to uniquely identify each chunk set to ensure that blocks are not returned to the
    /// wrong pool. If the pool ID does not match when a block is returned, we panic.
    ///
    /// The ID moves together with the chunks when ownership is transferred.
    pool_id: u64,

    /// Geometry of the blocks plus the directory mapping block indexes to addresses.
    arena: BlockArena,

    free_list: FreeList,

    /// Every chunk ever acquired, in acquisition order. Append-only while the pool is alive.
    ///
    /// The lock doubles as the growth gate: whoever holds it is the only thread that may
    /// acquire and publish a chunk.
    chunks: Mutex<Vec<RawChunk>>,

    drop_policy: DropPolicy,

    memory: MemoryFacade,
}

impl BlockPool {
    /// The smallest block size a pool will use. Smaller requested sizes are raised to this,
    /// because every free block stores a link to the next free block.
    pub const MIN_BLOCK_SIZE: usize = mem::size_of::<FreeLink>();

    /// Creates a builder for configuring and constructing a [`BlockPool`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::{BlockPool, DropPolicy};
    /// use new_zealand::nz;
    ///
    /// let pool = BlockPool::builder()
    ///     .block_size(100)
    ///     .blocks_per_chunk(nz!(32))
    ///     .drop_policy(DropPolicy::MustNotHaveOutstandingBlocks)
    ///     .build()?;
    ///
    /// assert_eq!(pool.chunk_count(), 1);
    /// # Ok::<(), block_pool::Error>(())
    /// ```
    #[inline]
    pub fn builder() -> BlockPoolBuilder {
        BlockPoolBuilder::new()
    }

    /// Creates a pool of `block_size`-byte blocks, carved `blocks_per_chunk` at a time from
    /// the underlying allocator, with default settings for everything else.
    ///
    /// The first chunk is acquired immediately.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the first chunk cannot be allocated,
    /// [`Error::ChunkTooLarge`] if the chunk size overflows the address space and
    /// [`Error::CapacityExhausted`] if `blocks_per_chunk` exceeds the number of blocks a pool
    /// can address.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero.
    pub fn new(block_size: usize, blocks_per_chunk: NonZero<usize>) -> Result<Self> {
        Self::builder()
            .block_size(block_size)
            .blocks_per_chunk(blocks_per_chunk)
            .build()
    }

    /// Creates a pool and eagerly performs one growth cycle.
    pub(crate) fn new_inner(
        geometry: BlockGeometry,
        drop_policy: DropPolicy,
        memory: MemoryFacade,
    ) -> Result<Self> {
        let pool = Self::empty(geometry, drop_policy, memory);

        pool.add_chunk(&mut pool.chunks.lock())?;

        Ok(pool)
    }

    /// Creates a pool that owns no chunks. It will grow on first use.
    fn empty(geometry: BlockGeometry, drop_policy: DropPolicy, memory: MemoryFacade) -> Self {
        Self {
            pool_id: generate_pool_id(),
            arena: BlockArena::new(geometry),
            free_list: FreeList::new(),
            chunks: Mutex::new(Vec::new()),
            drop_policy,
            memory,
        }
    }

    /// Size in bytes of every block, after raising the requested size to
    /// [`MIN_BLOCK_SIZE`](Self::MIN_BLOCK_SIZE) and padding it to the block alignment.
    #[must_use]
    #[inline]
    pub fn block_size(&self) -> usize {
        self.arena.geometry().block_size()
    }

    /// Alignment in bytes of every block.
    #[must_use]
    #[inline]
    pub fn block_align(&self) -> usize {
        self.arena.geometry().block_layout().align()
    }

    /// Memory layout of a single block.
    ///
    /// Any value whose layout fits within this (size and alignment no greater) can be stored
    /// in a block.
    #[must_use]
    #[inline]
    pub fn block_layout(&self) -> Layout {
        self.arena.geometry().block_layout()
    }

    /// Number of blocks carved from each chunk.
    #[must_use]
    #[inline]
    pub fn blocks_per_chunk(&self) -> NonZero<usize> {
        self.arena.geometry().blocks_per_chunk()
    }

    /// Number of chunks the pool has acquired so far.
    ///
    /// This never decreases while the pool is alive.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Total number of blocks across all acquired chunks, whether free or held by callers.
    #[must_use]
    pub fn capacity(&self) -> usize {
        // Overflow here would imply capacity is greater than virtual memory - impossible.
        self.chunk_count()
            .wrapping_mul(self.arena.geometry().blocks_per_chunk().get())
    }

    /// Number of blocks currently in the free list.
    ///
    /// This walks the free list, which requires exclusive access to the pool.
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::BlockPool;
    /// use new_zealand::nz;
    ///
    /// let mut pool = BlockPool::new(16, nz!(4))?;
    /// assert_eq!(pool.free_count(), 4);
    ///
    /// let block = pool.allocate()?;
    /// assert_eq!(pool.free_count(), 3);
    ///
    /// pool.deallocate(block);
    /// assert_eq!(pool.free_count(), 4);
    /// # Ok::<(), block_pool::Error>(())
    /// ```
    #[must_use]
    pub fn free_count(&mut self) -> usize {
        let Self {
            arena, free_list, ..
        } = self;

        // SAFETY: Every index in the free list belongs to a chunk published in the arena, and
        // chunks live as long as the pool.
        unsafe { free_list.len(|index| arena.link_ptr(index)) }
    }

    /// Number of blocks currently held by callers.
    #[must_use]
    pub fn outstanding_count(&mut self) -> usize {
        let capacity = self
            .chunks
            .get_mut()
            .len()
            .wrapping_mul(self.arena.geometry().blocks_per_chunk().get());

        // Cannot underflow, every free block is part of the capacity.
        capacity.wrapping_sub(self.free_count())
    }

    /// Whether the block was allocated from this pool (and not from another pool, or from the
    /// chunk set this pool released in [`take_from()`](Self::take_from)).
    #[must_use]
    #[inline]
    pub fn contains(&self, block: &Block) -> bool {
        block.pool_id() == self.pool_id
    }

    /// Takes one block out of the pool, acquiring a new chunk if no block is free.
    ///
    /// The block contents are unspecified. The caller has exclusive use of the block until it
    /// is passed back to [`deallocate()`](Self::deallocate).
    ///
    /// Any free block may be returned - there is no guarantee that a recently freed block is
    /// reused first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if a new chunk was needed but could not be allocated, or
    /// [`Error::CapacityExhausted`] if the pool cannot address any more blocks. The pool
    /// remains fully usable after an error.
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinite loop.
    pub fn allocate(&self) -> Result<Block> {
        loop {
            // SAFETY: Every index in the free list belongs to a chunk published in the arena,
            // and chunks live as long as the pool.
            if let Some(index) = unsafe { self.free_list.pop(|index| self.arena.link_ptr(index)) }
            {
                return Ok(Block::new(self.arena.block_ptr(index), index, self.pool_id));
            }

            self.grow()?;
        }
    }

    /// Returns a block to the pool, making it available to future allocations.
    ///
    /// # Panics
    ///
    /// Panics if the block was not allocated from this pool.
    pub fn deallocate(&self, block: Block) {
        assert!(
            self.contains(&block),
            "block was allocated from a different pool (or a chunk set this pool no longer owns)"
        );

        // SAFETY: The handle proves the block was allocated from this chunk set and is not in
        // the free list. Consuming the handle guarantees the caller can no longer access it.
        unsafe {
            self.free_list
                .push(block.index_u32(), block.as_ptr().cast::<FreeLink>());
        }
    }

    /// Ensures that at least `additional` blocks are free, acquiring as few chunks as needed.
    ///
    /// # Errors
    ///
    /// Fails like chunk growth in [`allocate()`](Self::allocate) does. Chunks acquired before
    /// the failure remain part of the pool.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        let free = self.free_count();

        let Some(missing) = additional.checked_sub(free).filter(|&missing| missing > 0) else {
            return Ok(());
        };

        let chunks_needed = missing.div_ceil(self.arena.geometry().blocks_per_chunk().get());

        let mut chunks = self.chunks.lock();

        for _ in 0..chunks_needed {
            self.add_chunk(&mut chunks)?;
        }

        Ok(())
    }

    /// Moves the contents of this pool into a new pool and leaves an empty one in its place.
    ///
    /// The returned pool owns all the chunks, the free list and the identity of this pool, so
    /// blocks allocated from this pool must be returned to the returned pool. This pool is left
    /// with the same configuration but no chunks; it acquires a chunk on its next allocation.
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::BlockPool;
    /// use new_zealand::nz;
    ///
    /// let mut pool = BlockPool::new(32, nz!(8))?;
    /// let block = pool.allocate()?;
    ///
    /// let moved = pool.take();
    /// assert_eq!(pool.chunk_count(), 0);
    /// assert_eq!(moved.chunk_count(), 1);
    ///
    /// moved.deallocate(block);
    /// # Ok::<(), block_pool::Error>(())
    /// ```
    pub fn take(&mut self) -> Self {
        let replacement =
            Self::empty(*self.arena.geometry(), self.drop_policy, self.memory.clone());

        debug!(
            pool_id = self.pool_id,
            replacement_pool_id = replacement.pool_id,
            "pool contents moved out"
        );

        mem::replace(self, replacement)
    }

    /// Replaces the contents of this pool with the contents of `other`, leaving `other` empty.
    ///
    /// The chunks this pool owned before the call are released, so any blocks still held
    /// from them dangle afterwards (and are rejected by [`deallocate()`](Self::deallocate)).
    /// This pool takes over the configuration, chunks, free list and identity of `other`.
    /// `other` keeps its configuration but owns no chunks.
    ///
    /// # Panics
    ///
    /// Panics if this pool has [`DropPolicy::MustNotHaveOutstandingBlocks`] and callers still
    /// hold blocks from it.
    pub fn take_from(&mut self, other: &mut Self) {
        *self = other.take();
    }

    /// Acquires a chunk unless another thread refilled the free list while we were waiting
    /// for the growth lock.
    #[cold]
    #[cfg_attr(test, mutants::skip)] // Skipping the re-check only costs memory, not correctness.
    fn grow(&self) -> Result<()> {
        let mut chunks = self.chunks.lock();

        if !self.free_list.is_empty() {
            trace!(
                pool_id = self.pool_id,
                "free list was refilled while waiting to grow, skipping growth"
            );
            return Ok(());
        }

        self.add_chunk(&mut chunks)
    }

    /// Acquires one chunk and pushes all of its blocks onto the free list.
    ///
    /// The caller must hold the growth lock, proven by passing in the guarded chunk list.
    fn add_chunk(&self, chunks: &mut Vec<RawChunk>) -> Result<()> {
        let geometry = self.arena.geometry();
        let blocks_per_chunk = geometry.blocks_per_chunk().get();

        let chunk_index = chunks.len();

        let first_index = chunk_index
            .checked_mul(blocks_per_chunk)
            .filter(|first| {
                first
                    .checked_add(blocks_per_chunk)
                    .is_some_and(|end| end <= MAX_BLOCKS)
            })
            .ok_or(Error::CapacityExhausted {
                max_blocks: MAX_BLOCKS,
            })?;

        let chunk = RawChunk::acquire(&self.memory, geometry.chunk_layout())?;

        // The chunk is recorded before any of its blocks become visible, so it is released at
        // teardown no matter what happens next.
        self.arena.publish_chunk(chunk_index, chunk.base());
        chunks.push(chunk);

        debug!(
            pool_id = self.pool_id,
            chunk_index,
            blocks_per_chunk,
            block_size = geometry.block_size(),
            "acquired chunk"
        );

        // Pushed in reverse, so that consecutive allocations walk the chunk in address order.
        for offset in (0..blocks_per_chunk).rev() {
            // Cannot overflow and fits in u32, checked against MAX_BLOCKS above.
            let index = u32::try_from(first_index.wrapping_add(offset))
                .expect("block index fits in u32, guarded by MAX_BLOCKS check");

            // SAFETY: The block belongs to the chunk we just published, nobody has seen it yet
            // and the chunk lives as long as the pool.
            unsafe {
                self.free_list.push(index, self.arena.link_ptr(index));
            }
        }

        Ok(())
    }
}

impl Drop for BlockPool {
    fn drop(&mut self) {
        if self.drop_policy == DropPolicy::MustNotHaveOutstandingBlocks && !thread::panicking() {
            let outstanding = self.outstanding_count();

            assert!(
                outstanding == 0,
                "dropped a BlockPool with {outstanding} blocks still held by callers, which is forbidden by its drop policy"
            );
        }

        let chunk_count = self.chunks.get_mut().len();

        if chunk_count > 0 {
            debug!(pool_id = self.pool_id, chunk_count, "releasing chunks");
        }

        // The chunks release their memory when the Vec is dropped after this.
    }
}
