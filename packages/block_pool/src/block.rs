use std::ptr::NonNull;

/// Exclusive handle to one block of memory allocated from a [`BlockPool`][crate::BlockPool].
///
/// The handle is the only proof that a block is held by a caller. It cannot be copied or
/// cloned, and [`BlockPool::deallocate()`][crate::BlockPool::deallocate] consumes it, so a
/// block cannot be returned to the pool twice.
///
/// The block contents are unspecified when the block is handed out (not zeroed). The pool
/// never writes the block while the handle exists, so the caller is free to use the memory as
/// storage for anything that fits the pool's [block layout][crate::BlockPool::block_layout].
///
/// A thread that is concurrently allocating from the same pool may still read the first
/// [`BlockPool::MIN_BLOCK_SIZE`][crate::BlockPool::MIN_BLOCK_SIZE] bytes of a block shortly
/// after it was handed out, because it observed the block while it was free. Such a value is
/// always discarded.
///
/// # Lifetime
///
/// The handle does not keep the pool alive. Once the pool is dropped, or its chunks are
/// released by [`BlockPool::take_from()`][crate::BlockPool::take_from], the pointer returned
/// by [`as_ptr()`][Self::as_ptr] dangles and must not be dereferenced.
///
/// Dropping a handle without returning it to the pool does not free the block - it remains
/// reserved until the pool releases all of its chunks.
///
/// # Thread safety
///
/// The handle is just an address and an index, so it can be sent to and shared between
/// threads. What the caller stores in the block is the caller's responsibility.
#[derive(Debug)]
#[must_use = "dropping a block handle leaks the block until the pool is dropped"]
pub struct Block {
    ptr: NonNull<u8>,

    /// Global index of the block within the pool's arena, used by the free list.
    index: u32,

    /// Identity of the chunk set this block was carved from.
    pool_id: u64,
}

// SAFETY: The handle owns no data of its own; it only names a block of raw memory, and
// access to that memory is already `unsafe` and governed by the caller.
unsafe impl Send for Block {}

// SAFETY: See above. Shared references to the handle only expose the address.
unsafe impl Sync for Block {}

impl Block {
    pub(crate) fn new(ptr: NonNull<u8>, index: u32, pool_id: u64) -> Self {
        Self {
            ptr,
            index,
            pool_id,
        }
    }

    /// Address of the first byte of the block.
    ///
    /// The pointer is valid for reads and writes of
    /// [`BlockPool::block_size()`][crate::BlockPool::block_size] bytes and aligned to
    /// [`BlockPool::block_align()`][crate::BlockPool::block_align], for as long as the handle
    /// exists and the pool still owns the block's chunk.
    #[must_use]
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Address of the first byte of the block, cast to a pointer to `T`.
    ///
    /// This is a convenience for callers that store a `T` in the block. It is the caller's
    /// responsibility to ensure that `T` fits the pool's block layout.
    #[must_use]
    #[inline]
    pub fn cast<T>(&self) -> NonNull<T> {
        self.ptr.cast()
    }

    /// Position of the block in the pool, counting blocks across all chunks in the order the
    /// chunks were acquired.
    #[must_use]
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub(crate) fn index_u32(&self) -> u32 {
        self.index
    }

    pub(crate) fn pool_id(&self) -> u64 {
        self.pool_id
    }
}
