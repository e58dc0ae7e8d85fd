//! Fake memory provider for testing.

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::pal::RealMemory;
use crate::pal::abstractions::Memory;

/// Internal state for the fake provider, shared between clones.
#[derive(Debug, Default)]
struct FakeMemoryState {
    /// How many more allocations will succeed. `None` means unlimited.
    remaining_allocations: Option<usize>,

    /// Total number of allocations that succeeded.
    allocations: usize,

    /// Total number of allocations that were refused.
    refusals: usize,

    /// Total number of releases.
    releases: usize,

    /// Addresses and layouts of allocations that have not been released yet.
    live: Vec<(usize, Layout)>,
}

/// Fake implementation of the memory abstraction for testing.
///
/// Memory is still obtained from the real allocator (the pool writes into it), but every
/// allocation and release is recorded and allocations can be made to fail on demand. Clones
/// share state, so a test can keep one clone for inspection while the pool owns another.
///
/// Releasing an address that is not live (never allocated or already released) panics.
#[derive(Clone, Debug, Default)]
pub(crate) struct FakeMemory {
    state: Arc<Mutex<FakeMemoryState>>,
}

impl FakeMemory {
    /// Creates a fake provider that never refuses an allocation.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Creates a fake provider that refuses every allocation after the first `count`.
    pub(crate) fn with_allocation_limit(count: usize) -> Self {
        let memory = Self::new();
        memory.set_allocation_limit(Some(count));
        memory
    }

    /// Limits how many more allocations will succeed. `None` removes the limit.
    pub(crate) fn set_allocation_limit(&self, count: Option<usize>) {
        self.state.lock().remaining_allocations = count;
    }

    /// Number of allocations that succeeded so far.
    pub(crate) fn allocations(&self) -> usize {
        self.state.lock().allocations
    }

    /// Number of allocations that were refused so far.
    pub(crate) fn refusals(&self) -> usize {
        self.state.lock().refusals
    }

    /// Number of releases so far.
    pub(crate) fn releases(&self) -> usize {
        self.state.lock().releases
    }

    /// Number of allocations that have not been released.
    pub(crate) fn live(&self) -> usize {
        self.state.lock().live.len()
    }
}

impl Memory for FakeMemory {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(remaining) = state.remaining_allocations.as_mut() {
            if *remaining == 0 {
                state.refusals = state.refusals.wrapping_add(1);
                return None;
            }

            *remaining = remaining.wrapping_sub(1);
        }

        let ptr = RealMemory.allocate(layout)?;

        state.allocations = state.allocations.wrapping_add(1);
        state.live.push((ptr.as_ptr() as usize, layout));

        Some(ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        let mut state = self.state.lock();

        let address = ptr.as_ptr() as usize;
        let position = state
            .live
            .iter()
            .position(|&(live_address, _)| live_address == address)
            .expect("released memory that is not a live allocation of this provider");

        let (_, live_layout) = state.live.swap_remove(position);
        assert_eq!(
            live_layout, layout,
            "memory released with a different layout than it was allocated with"
        );

        state.releases = state.releases.wrapping_add(1);

        // SAFETY: We just verified that the allocation is live and was made with this layout.
        unsafe {
            RealMemory.release(ptr, layout);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn counts_allocations_and_releases() {
        let memory = FakeMemory::new();
        let layout = Layout::from_size_align(64, 8).unwrap();

        let first = memory.allocate(layout).unwrap();
        let second = memory.allocate(layout).unwrap();

        assert_eq!(memory.allocations(), 2);
        assert_eq!(memory.live(), 2);

        // SAFETY: Allocated above with the same layout, released once.
        unsafe {
            memory.release(first, layout);
        }

        // SAFETY: Allocated above with the same layout, released once.
        unsafe {
            memory.release(second, layout);
        }

        assert_eq!(memory.releases(), 2);
        assert_eq!(memory.live(), 0);
    }

    #[test]
    fn refuses_after_limit() {
        let memory = FakeMemory::with_allocation_limit(1);
        let layout = Layout::from_size_align(32, 8).unwrap();

        let ptr = memory.allocate(layout).unwrap();
        assert!(memory.allocate(layout).is_none());
        assert_eq!(memory.refusals(), 1);

        memory.set_allocation_limit(None);
        let another = memory.allocate(layout).unwrap();

        // SAFETY: Allocated above with the same layout, released once.
        unsafe {
            memory.release(ptr, layout);
        }

        // SAFETY: Allocated above with the same layout, released once.
        unsafe {
            memory.release(another, layout);
        }
    }

    #[test]
    fn clones_share_state() {
        let memory = FakeMemory::new();
        let observer = memory.clone();
        let layout = Layout::from_size_align(16, 8).unwrap();

        let ptr = memory.allocate(layout).unwrap();
        assert_eq!(observer.allocations(), 1);

        // SAFETY: Allocated above with the same layout, released once.
        unsafe {
            memory.release(ptr, layout);
        }

        assert_eq!(observer.releases(), 1);
    }

    #[test]
    #[should_panic]
    fn double_release_panics() {
        let memory = FakeMemory::new();
        let layout = Layout::from_size_align(16, 8).unwrap();

        let ptr = memory.allocate(layout).unwrap();

        // SAFETY: Allocated above with the same layout.
        unsafe {
            memory.release(ptr, layout);
        }

        // SAFETY: Deliberately violating the contract; the fake detects this before touching
        // the allocator.
        unsafe {
            memory.release(ptr, layout);
        }
    }
}
