//! Memory facade for switching between real and fake providers.

use std::alloc::Layout;
use std::ptr::NonNull;

#[cfg(test)]
use crate::pal::FakeMemory;
use crate::pal::{Memory, RealMemory};

/// Facade that allows switching between real and fake memory providers.
///
/// Every pool and every chunk carries one of these, so chunks can be released through the
/// same provider that allocated them.
#[derive(Clone, Debug)]
pub(crate) enum MemoryFacade {
    /// Real provider using the global allocator.
    Real(RealMemory),

    /// Fake provider for testing.
    #[cfg(test)]
    Fake(FakeMemory),
}

impl MemoryFacade {
    /// Creates a facade that uses the real provider.
    pub(crate) const fn real() -> Self {
        Self::Real(RealMemory)
    }

    /// Creates a facade that uses the fake provider.
    #[cfg(test)]
    pub(crate) fn fake(memory: FakeMemory) -> Self {
        Self::Fake(memory)
    }
}

impl Memory for MemoryFacade {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        match self {
            Self::Real(memory) => memory.allocate(layout),
            #[cfg(test)]
            Self::Fake(memory) => memory.allocate(layout),
        }
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        match self {
            // SAFETY: Forwarding safety requirements to the caller.
            Self::Real(memory) => unsafe { memory.release(ptr, layout) },
            #[cfg(test)]
            // SAFETY: Forwarding safety requirements to the caller.
            Self::Fake(memory) => unsafe { memory.release(ptr, layout) },
        }
    }
}
