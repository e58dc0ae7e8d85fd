//! Platform abstraction layer for obtaining chunk memory.
//!
//! The pool never calls the global allocator directly. It goes through a [`MemoryFacade`],
//! which dispatches to the real allocator in production and to a fake, observable
//! allocator in tests (where we need to count chunk acquisitions and simulate exhaustion).

mod abstractions;
mod facade;
#[cfg(test)]
mod fake;
mod real;

pub(crate) use abstractions::Memory;
pub(crate) use facade::MemoryFacade;
#[cfg(test)]
pub(crate) use fake::FakeMemory;
pub(crate) use real::RealMemory;
