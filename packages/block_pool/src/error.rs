use thiserror::Error;

/// Errors that can occur when a [`BlockPool`][crate::BlockPool] needs to acquire a new chunk.
///
/// Contention between threads never produces an error. Only a failure to obtain memory
/// (or to express the requested amount of memory) is reported.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The memory provider refused to supply a new chunk.
    ///
    /// The pool does not retry on its own. The caller decides whether to retry, shed load or
    /// give up.
    #[error("out of memory: could not allocate a chunk of {size} bytes aligned to {align}")]
    OutOfMemory {
        /// Size in bytes of the chunk that could not be allocated.
        size: usize,

        /// Alignment in bytes of the chunk that could not be allocated.
        align: usize,
    },

    /// The requested block geometry describes a chunk that does not fit in the address space.
    #[error(
        "a chunk of {blocks_per_chunk} blocks of {block_size} bytes aligned to {block_align} does not fit in the address space"
    )]
    ChunkTooLarge {
        /// Size in bytes of one block, after clamping to the minimum block size.
        block_size: usize,

        /// Alignment in bytes of one block.
        block_align: usize,

        /// Number of blocks in one chunk.
        blocks_per_chunk: usize,
    },

    /// The pool already manages as many blocks as its free list can address.
    #[error("the pool cannot grow beyond {max_blocks} blocks")]
    CapacityExhausted {
        /// The maximum number of blocks a single pool can hold.
        max_blocks: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;
