//! Real memory provider backed by the global allocator.

use std::alloc::{Layout, alloc, dealloc};
use std::ptr::NonNull;

use crate::pal::abstractions::Memory;

/// Real implementation of the memory abstraction, using the global allocator.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RealMemory;

impl Memory for RealMemory {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() > 0, "chunk layouts are never zero-sized");

        // SAFETY: The layout has a non-zero size, which is the only requirement of `alloc()`.
        NonNull::new(unsafe { alloc(layout) })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        // SAFETY: Forwarding the caller's guarantee that `ptr` came from `alloc()` with `layout`.
        unsafe {
            dealloc(ptr.as_ptr(), layout);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_release_round_trip() {
        let layout = Layout::from_size_align(256, 64).unwrap();

        let ptr = RealMemory.allocate(layout).unwrap();
        assert_eq!(ptr.as_ptr() as usize % 64, 0);

        // SAFETY: We own the allocation and stay within its bounds.
        unsafe {
            ptr.as_ptr().write_bytes(0xAB, layout.size());
        }

        // SAFETY: The pointer came from the same provider with the same layout.
        unsafe {
            RealMemory.release(ptr, layout);
        }
    }
}
