use std::alloc::Layout;
use std::mem;
use std::num::NonZero;
use std::ptr::NonNull;

use crate::pal::{Memory, MemoryFacade};
use crate::{Error, FreeLink, Result};

/// Block and chunk layout of a pool, derived from the requested block size and alignment.
///
/// The requested size is raised to fit a [`FreeLink`] and then rounded up to a multiple of
/// the alignment, so that every block in a chunk starts at a correctly aligned address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct BlockGeometry {
    /// Layout of a single block. The size doubles as the stride between blocks in a chunk.
    block_layout: Layout,

    blocks_per_chunk: NonZero<usize>,

    /// Layout of one raw chunk holding `blocks_per_chunk` blocks.
    chunk_layout: Layout,
}

impl BlockGeometry {
    /// Calculates the geometry for blocks of `size` bytes aligned to `align`.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    pub(crate) fn calculate(
        size: usize,
        align: usize,
        blocks_per_chunk: NonZero<usize>,
    ) -> Result<Self> {
        assert!(
            align.is_power_of_two(),
            "block alignment must be a power of two, got {align}"
        );

        let size = size.max(mem::size_of::<FreeLink>());
        let align = align.max(mem::align_of::<FreeLink>());

        let too_large = || Error::ChunkTooLarge {
            block_size: size,
            block_align: align,
            blocks_per_chunk: blocks_per_chunk.get(),
        };

        // Layout::pad_to_align() makes the size a multiple of the alignment,
        // which is exactly the stride we need between consecutive blocks.
        let block_layout = Layout::from_size_align(size, align)
            .map_err(|_layout_error| too_large())?
            .pad_to_align();

        let chunk_size = block_layout
            .size()
            .checked_mul(blocks_per_chunk.get())
            .ok_or_else(too_large)?;

        let chunk_layout =
            Layout::from_size_align(chunk_size, align).map_err(|_layout_error| too_large())?;

        Ok(Self {
            block_layout,
            blocks_per_chunk,
            chunk_layout,
        })
    }

    #[must_use]
    pub(crate) fn block_layout(&self) -> Layout {
        self.block_layout
    }

    #[must_use]
    pub(crate) fn block_size(&self) -> usize {
        self.block_layout.size()
    }

    #[must_use]
    pub(crate) fn blocks_per_chunk(&self) -> NonZero<usize> {
        self.blocks_per_chunk
    }

    #[must_use]
    pub(crate) fn chunk_layout(&self) -> Layout {
        self.chunk_layout
    }
}

/// One contiguous allocation that is carved into the blocks of a pool.
///
/// The chunk owns its memory from acquisition until it is dropped, at which point the memory
/// is returned to the provider it came from. It is never resized or partially released.
///
/// The chunk does not create or keep references to the memory, so blocks may be accessed via
/// pointers from any thread while the chunk is alive.
#[derive(Debug)]
pub(crate) struct RawChunk {
    ptr: NonNull<u8>,
    layout: Layout,
    memory: MemoryFacade,
}

// SAFETY: The chunk is the exclusive owner of its allocation and only ever hands out raw
// pointers, so moving it to another thread (and releasing it there) is fine.
unsafe impl Send for RawChunk {}

impl RawChunk {
    /// Obtains a chunk with the given layout from `memory`.
    pub(crate) fn acquire(memory: &MemoryFacade, layout: Layout) -> Result<Self> {
        let ptr = memory.allocate(layout).ok_or(Error::OutOfMemory {
            size: layout.size(),
            align: layout.align(),
        })?;

        Ok(Self {
            ptr,
            layout,
            memory: memory.clone(),
        })
    }

    /// Address of the first byte of the chunk.
    #[must_use]
    pub(crate) fn base(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl Drop for RawChunk {
    fn drop(&mut self) {
        // SAFETY: The pointer was allocated by this same provider with this same layout in
        // `acquire()`, and drop runs exactly once.
        unsafe {
            self.memory.release(self.ptr, self.layout);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::pal::FakeMemory;

    assert_impl_all!(RawChunk: Send);
    assert_not_impl_any!(RawChunk: Sync, Clone);

    #[test]
    fn geometry_keeps_large_enough_size() {
        let geometry = BlockGeometry::calculate(16, 8, nz!(4)).unwrap();

        assert_eq!(geometry.block_size(), 16);
        assert_eq!(geometry.block_layout().align(), 8);
        assert_eq!(geometry.chunk_layout().size(), 64);
        assert_eq!(geometry.chunk_layout().align(), 8);
        assert_eq!(geometry.blocks_per_chunk().get(), 4);
    }

    #[test]
    fn geometry_raises_tiny_size_to_link_size() {
        let geometry = BlockGeometry::calculate(1, 1, nz!(10)).unwrap();

        assert_eq!(geometry.block_size(), mem::size_of::<FreeLink>());
        assert!(geometry.block_layout().align() >= mem::align_of::<FreeLink>());
        assert_eq!(
            geometry.chunk_layout().size(),
            mem::size_of::<FreeLink>() * 10
        );
    }

    #[test]
    fn geometry_pads_size_to_alignment() {
        let geometry = BlockGeometry::calculate(20, 16, nz!(3)).unwrap();

        assert_eq!(geometry.block_size(), 32);
        assert_eq!(geometry.chunk_layout().size(), 96);
    }

    #[test]
    fn geometry_rejects_overflowing_chunk() {
        let result = BlockGeometry::calculate(usize::MAX / 2, 8, nz!(4));

        assert!(matches!(
            result,
            Err(Error::ChunkTooLarge {
                blocks_per_chunk: 4,
                ..
            })
        ));
    }

    #[test]
    #[should_panic]
    fn geometry_rejects_non_power_of_two_alignment() {
        _ = BlockGeometry::calculate(16, 12, nz!(4));
    }

    #[test]
    fn chunk_is_released_once_on_drop() {
        let fake = FakeMemory::new();
        let memory = MemoryFacade::fake(fake.clone());
        let layout = Layout::from_size_align(256, 8).unwrap();

        let chunk = RawChunk::acquire(&memory, layout).unwrap();
        assert_eq!(chunk.base().as_ptr() as usize % 8, 0);
        assert_eq!(fake.live(), 1);

        drop(chunk);

        assert_eq!(fake.releases(), 1);
        assert_eq!(fake.live(), 0);
    }

    #[test]
    fn acquire_reports_out_of_memory() {
        let fake = FakeMemory::with_allocation_limit(0);
        let memory = MemoryFacade::fake(fake.clone());
        let layout = Layout::from_size_align(512, 16).unwrap();

        let result = RawChunk::acquire(&memory, layout);

        assert!(matches!(
            result,
            Err(Error::OutOfMemory {
                size: 512,
                align: 16
            })
        ));
        assert_eq!(fake.refusals(), 1);
    }
}
