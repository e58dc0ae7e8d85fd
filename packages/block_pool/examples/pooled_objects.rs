//! Example that stores objects of one type in a shared `BlockPool` instead of on the heap.
//!
//! A small box-like wrapper allocates a block from a process-wide pool, moves the value into it
//! and returns the block to the pool when the wrapper is dropped.

use std::fmt;
use std::ops::Deref;
use std::sync::LazyLock;

use block_pool::{Block, BlockPool};
use new_zealand::nz;

#[derive(Debug)]
struct Point {
    x: i32,
    y: i32,
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Point({}, {})", self.x, self.y)
    }
}

/// Room for 10 points per chunk.
static POINT_POOL: LazyLock<BlockPool> = LazyLock::new(|| {
    BlockPool::builder()
        .layout_of::<Point>()
        .blocks_per_chunk(nz!(10))
        .build()
        .expect("initial chunk for the point pool could not be allocated")
});

/// Owns a `Point` stored in a block of `POINT_POOL`.
struct PooledPoint {
    block: Option<Block>,
}

impl PooledPoint {
    fn new(point: Point) -> Result<Self, block_pool::Error> {
        let block = POINT_POOL.allocate()?;

        // SAFETY: The pool layout was derived from Point, so the block fits it and is aligned
        // for it. The block is exclusively ours.
        unsafe {
            block.cast::<Point>().write(point);
        }

        Ok(Self { block: Some(block) })
    }
}

impl Deref for PooledPoint {
    type Target = Point;

    fn deref(&self) -> &Point {
        let block = self
            .block
            .as_ref()
            .expect("block is only taken out in drop");

        // SAFETY: The block holds an initialized Point for as long as we own it.
        unsafe { block.cast::<Point>().as_ref() }
    }
}

impl Drop for PooledPoint {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            // SAFETY: The block holds an initialized Point that nobody else references.
            unsafe {
                block.cast::<Point>().drop_in_place();
            }

            POINT_POOL.deallocate(block);
        }
    }
}

fn main() -> Result<(), block_pool::Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let first = PooledPoint::new(Point { x: 1, y: 2 })?;
    let second = PooledPoint::new(Point { x: 3, y: 4 })?;

    println!("{}", *first);
    println!("{}", *second);

    drop(first);
    drop(second);

    // Enough points to need a second chunk.
    let many = (0..15)
        .map(|i| PooledPoint::new(Point { x: i, y: -i }))
        .collect::<Result<Vec<_>, _>>()?;

    let sum = many.iter().map(|point| point.x + point.y).sum::<i32>();
    assert_eq!(sum, 0);

    println!(
        "{} points stored in {} chunks of {} blocks",
        many.len(),
        POINT_POOL.chunk_count(),
        POINT_POOL.blocks_per_chunk()
    );

    drop(many);

    println!("Pooled objects example completed.");

    Ok(())
}
