#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A thread-safe pool of fixed-size memory blocks with a lock-free free list.
//!
//! This crate provides [`BlockPool`], an allocator that hands out raw blocks of memory of one
//! size, fixed when the pool is created. It is intended for workloads that allocate and release
//! many same-sized objects from many threads, where a general-purpose allocator would spend its
//! time on bookkeeping that a fixed block size makes unnecessary.
//!
//! # Key Features
//!
//! - **Lock-free fast path**: [`allocate()`](BlockPool::allocate) and
//!   [`deallocate()`](BlockPool::deallocate) take `&self` and only ever compare-and-swap the
//!   head of the free list
//! - **No per-block overhead**: free blocks are linked through their own first bytes
//! - **ABA safe**: the free list head carries a generation tag
//! - **On-demand growth**: memory is acquired in chunks of a configurable number of blocks,
//!   with a single thread growing the pool at a time
//! - **Explicit ownership transfer**: the whole chunk set can be moved to another pool with
//!   [`take()`](BlockPool::take) and [`take_from()`](BlockPool::take_from)
//! - **Recoverable failures**: running out of memory is reported as an [`Error`], never a panic
//! - **Flexible drop policies**: configure what happens when the pool is dropped while callers
//!   still hold blocks
//!
//! # Block handles
//!
//! Allocating returns a [`Block`], an exclusive handle that cannot be copied or cloned.
//! Returning the handle to [`deallocate()`](BlockPool::deallocate) consumes it, so a block
//! cannot be freed twice. Handles from a different pool are detected and rejected with a panic.
//!
//! The pool never looks inside a block that a caller holds. What the caller stores there, and
//! whether it is properly dropped before the block is returned, is up to the caller.
//!
//! # Example
//!
//! ```rust
//! use block_pool::BlockPool;
//! use new_zealand::nz;
//!
//! // 16-byte blocks, acquired 4 at a time.
//! let pool = BlockPool::new(16, nz!(4))?;
//! assert_eq!(pool.capacity(), 4);
//!
//! let blocks = (0..5).map(|_| pool.allocate()).collect::<Result<Vec<_>, _>>()?;
//!
//! // The fifth block required a second chunk.
//! assert_eq!(pool.chunk_count(), 2);
//! assert_eq!(pool.capacity(), 8);
//!
//! for block in blocks {
//!     pool.deallocate(block);
//! }
//! # Ok::<(), block_pool::Error>(())
//! ```
//!
//! # Storing values
//!
//! Blocks are raw memory. To store a value, pick a layout that fits it and write through the
//! block pointer:
//!
//! ```rust
//! use block_pool::BlockPool;
//!
//! struct Point {
//!     x: f64,
//!     y: f64,
//! }
//!
//! let pool = BlockPool::builder().layout_of::<Point>().build()?;
//!
//! let block = pool.allocate()?;
//! let point = block.cast::<Point>();
//!
//! // SAFETY: The block fits a Point, is aligned for it and is exclusively ours.
//! unsafe {
//!     point.write(Point { x: 1.0, y: 2.0 });
//!     assert_eq!(point.as_ref().x + point.as_ref().y, 3.0);
//!     point.drop_in_place();
//! }
//!
//! pool.deallocate(block);
//! # Ok::<(), block_pool::Error>(())
//! ```
//!
//! # Logging
//!
//! The pool emits [`tracing`](https://docs.rs/tracing) events at `debug` level when it acquires
//! or releases chunks and when its contents are transferred, and at `trace` level when a thread
//! finds that another thread already grew the pool. The allocation fast path does not log.

mod arena;
mod block;
mod builder;
mod chunk;
mod drop_policy;
mod error;
mod free_list;
mod pal;
mod pool;

pub(crate) use arena::*;
pub use block::Block;
pub use builder::*;
pub(crate) use chunk::*;
pub use drop_policy::*;
pub use error::*;
pub(crate) use free_list::*;
pub use pool::BlockPool;
