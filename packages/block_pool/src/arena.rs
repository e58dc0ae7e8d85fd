use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::{BlockGeometry, FreeLink};

/// Segment `k` of the directory holds `2^k` chunk slots, so 32 segments cover every chunk
/// index a free list can address.
const SEGMENT_COUNT: usize = 32;

/// Maps global block indexes to block addresses.
///
/// Blocks are numbered consecutively across chunks: block `i` lives in chunk
/// `i / blocks_per_chunk` at position `i % blocks_per_chunk`. Chunk base addresses are kept in
/// a segmented directory that readers access without locking, because resolving an index
/// happens inside the lock-free allocation loop.
///
/// Segments are allocated on demand and never move once published, so growing the directory
/// never invalidates concurrent lookups.
pub(crate) struct BlockArena {
    geometry: BlockGeometry,

    segments: [OnceLock<Box<[AtomicPtr<u8>]>>; SEGMENT_COUNT],
}

impl BlockArena {
    #[must_use]
    pub(crate) fn new(geometry: BlockGeometry) -> Self {
        Self {
            geometry,
            segments: [const { OnceLock::new() }; SEGMENT_COUNT],
        }
    }

    #[must_use]
    pub(crate) fn geometry(&self) -> &BlockGeometry {
        &self.geometry
    }

    /// Returns the segment number and the slot within that segment for a chunk index.
    fn locate(chunk_index: usize) -> (usize, usize) {
        // Position counts from 1 so that segment k covers positions [2^k, 2^(k+1)).
        let position = chunk_index
            .checked_add(1)
            .expect("chunk index cannot be usize::MAX, the free list cannot address that many");

        let segment = position.ilog2() as usize;

        // Cannot underflow, 2^segment <= position by definition of ilog2.
        let slot = position.wrapping_sub(1 << segment);

        (segment, slot)
    }

    /// Records the base address of a chunk so that its blocks can be resolved.
    ///
    /// Only one thread may publish at a time (the pool calls this under its growth lock),
    /// and the chunk must outlive the arena's use for resolving block addresses.
    pub(crate) fn publish_chunk(&self, chunk_index: usize, base: NonNull<u8>) {
        let (segment, slot) = Self::locate(chunk_index);

        let segment_slots = self
            .segments
            .get(segment)
            .expect("chunk index exceeds the directory, guarded by pool growth limits")
            .get_or_init(|| {
                (0_usize..1 << segment)
                    .map(|_| AtomicPtr::new(ptr::null_mut()))
                    .collect()
            });

        let entry = segment_slots
            .get(slot)
            .expect("slot is within the segment by construction of locate()");

        debug_assert!(
            entry.load(Ordering::Relaxed).is_null(),
            "chunk {chunk_index} published twice"
        );

        entry.store(base.as_ptr(), Ordering::Release);
    }

    /// Returns the base address of a published chunk.
    ///
    /// # Panics
    ///
    /// Panics if the chunk has not been published.
    fn chunk_base(&self, chunk_index: usize) -> NonNull<u8> {
        let (segment, slot) = Self::locate(chunk_index);

        let ptr = self
            .segments
            .get(segment)
            .and_then(OnceLock::get)
            .and_then(|segment_slots| segment_slots.get(slot))
            .map(|entry| entry.load(Ordering::Acquire))
            .and_then(NonNull::new);

        ptr.unwrap_or_else(|| {
            panic!("block resolved in chunk {chunk_index} before the chunk was published")
        })
    }

    /// Returns the address of the block with the given global index.
    ///
    /// # Panics
    ///
    /// Panics if the chunk that would contain the block has not been published.
    #[must_use]
    pub(crate) fn block_ptr(&self, index: u32) -> NonNull<u8> {
        let index = index as usize;
        let blocks_per_chunk = self.geometry.blocks_per_chunk();

        let chunk_index = index / blocks_per_chunk;
        let index_in_chunk = index % blocks_per_chunk;

        // Cannot overflow, the offset stays within the chunk, whose size fits in usize.
        let offset = index_in_chunk.wrapping_mul(self.geometry.block_size());

        let base = self.chunk_base(chunk_index);

        // SAFETY: The chunk is `blocks_per_chunk * block_size` bytes long and
        // `index_in_chunk < blocks_per_chunk`, so the offset stays inside the allocation.
        unsafe { base.add(offset) }
    }

    /// Returns the free-list link stored in the first bytes of the block with the given index.
    #[must_use]
    pub(crate) fn link_ptr(&self, index: u32) -> NonNull<FreeLink> {
        // Chunks are aligned to the block alignment, the block size is a multiple of it and
        // it is at least the alignment of a link, so every block start is a valid link address.
        self.block_ptr(index).cast::<FreeLink>()
    }
}

impl fmt::Debug for BlockArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let allocated_segments = self
            .segments
            .iter()
            .filter(|segment| segment.get().is_some())
            .count();

        f.debug_struct("BlockArena")
            .field("geometry", &self.geometry)
            .field("allocated_segments", &allocated_segments)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(BlockArena: Send, Sync);

    #[test]
    fn locate_maps_chunks_to_geometric_segments() {
        assert_eq!(BlockArena::locate(0), (0, 0));
        assert_eq!(BlockArena::locate(1), (1, 0));
        assert_eq!(BlockArena::locate(2), (1, 1));
        assert_eq!(BlockArena::locate(3), (2, 0));
        assert_eq!(BlockArena::locate(6), (2, 3));
        assert_eq!(BlockArena::locate(7), (3, 0));
        assert_eq!(BlockArena::locate((1 << 20) - 1), (20, 0));
    }

    #[test]
    fn resolves_blocks_across_chunks() {
        let geometry = BlockGeometry::calculate(16, 8, nz!(4)).unwrap();
        let arena = BlockArena::new(geometry);

        let mut first = vec![0_u64; 8];
        let mut second = vec![0_u64; 8];
        let first_base = NonNull::new(first.as_mut_ptr().cast::<u8>()).unwrap();
        let second_base = NonNull::new(second.as_mut_ptr().cast::<u8>()).unwrap();

        arena.publish_chunk(0, first_base);
        arena.publish_chunk(1, second_base);

        assert_eq!(arena.block_ptr(0), first_base);
        assert_eq!(
            arena.block_ptr(3).as_ptr() as usize,
            first_base.as_ptr() as usize + 48
        );
        assert_eq!(arena.block_ptr(4), second_base);
        assert_eq!(
            arena.block_ptr(5).as_ptr() as usize,
            second_base.as_ptr() as usize + 16
        );
        assert_eq!(arena.link_ptr(5).cast::<u8>(), arena.block_ptr(5));
    }

    #[test]
    fn publishes_many_chunks() {
        let geometry = BlockGeometry::calculate(8, 8, nz!(1)).unwrap();
        let arena = BlockArena::new(geometry);

        let mut storage = vec![0_u64; 100];
        let base = storage.as_mut_ptr().cast::<u8>();

        for chunk_index in 0..100 {
            // SAFETY: Stays within the 100-element vector.
            let chunk_base = NonNull::new(unsafe { base.add(chunk_index * 8) }).unwrap();
            arena.publish_chunk(chunk_index, chunk_base);
        }

        for index in 0..100_u32 {
            assert_eq!(
                arena.block_ptr(index).as_ptr() as usize,
                base as usize + index as usize * 8
            );
        }
    }

    #[test]
    #[should_panic]
    fn resolving_unpublished_chunk_panics() {
        let geometry = BlockGeometry::calculate(8, 8, nz!(2)).unwrap();
        let arena = BlockArena::new(geometry);

        _ = arena.block_ptr(5);
    }
}
