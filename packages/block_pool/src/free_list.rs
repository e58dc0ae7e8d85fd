use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// The link stored in the first bytes of every free block: the reference of the next free
/// block (block index + 1), or [`EMPTY`] if this is the last free block.
///
/// The allocator only touches this while the block is free. Once a block is handed to a
/// caller, these bytes belong to the caller.
pub(crate) type FreeLink = AtomicU32;

/// Block reference that marks the end of the free list.
const EMPTY: u32 = 0;

/// The largest number of blocks a free list can address. Block `index` is stored as
/// `index + 1` in a `u32`, with zero reserved for [`EMPTY`].
pub(crate) const MAX_BLOCKS: usize = u32::MAX as usize;

/// Snapshot of the free list head: a block reference plus a generation tag.
///
/// The tag is bumped by every successful push and pop, so a compare-and-swap against a stale
/// snapshot fails even if the same block has meanwhile been popped, reused and pushed back
/// (the ABA problem). The tag is 32 bits wide; a thread would have to be stalled between its
/// read and its compare-and-swap for 2^32 list operations for a stale snapshot to match again.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct TaggedHead {
    block_ref: u32,
    tag: u32,
}

impl TaggedHead {
    #[expect(
        clippy::cast_possible_truncation,
        reason = "intentionally splitting the packed word into halves"
    )]
    fn unpack(packed: u64) -> Self {
        Self {
            block_ref: packed as u32,
            tag: (packed >> 32) as u32,
        }
    }

    fn pack(self) -> u64 {
        (u64::from(self.tag) << 32) | u64::from(self.block_ref)
    }

    fn successor(self, block_ref: u32) -> Self {
        Self {
            block_ref,
            tag: self.tag.wrapping_add(1),
        }
    }
}

/// Lock-free singly-linked stack of free block indexes.
///
/// The list itself only stores the head. The links live inside the free blocks, which the
/// list reaches through [`FreeLink`] pointers supplied by the owner (the pool knows how to map
/// a block index to an address).
///
/// Memory ordering: a successful push publishes the block's link with release semantics and
/// every read of the head that may be followed by reading a link uses acquire semantics, so a
/// popper always observes the link written by the pusher that made the block visible.
pub(crate) struct FreeList {
    head: AtomicU64,
}

impl FreeList {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicU64::new(0),
        }
    }

    /// Whether the list was empty at the moment of the check.
    #[must_use]
    pub(crate) fn is_empty(&self) -> bool {
        TaggedHead::unpack(self.head.load(Ordering::Acquire)).block_ref == EMPTY
    }

    /// Pushes the block with the given index onto the list.
    ///
    /// # Safety
    ///
    /// `link` must point to the first bytes of the block identified by `index`, be aligned for
    /// [`FreeLink`] and remain valid for as long as the list is used. The block must not
    /// currently be in the list and nobody else may access it until it is popped again.
    pub(crate) unsafe fn push(&self, index: u32, link: NonNull<FreeLink>) {
        debug_assert!(
            (index as usize) < MAX_BLOCKS,
            "block index {index} cannot be addressed by the free list"
        );

        // Cannot overflow, guarded by the assertion above (and by pool growth limits).
        let block_ref = index.wrapping_add(1);

        // SAFETY: The caller guarantees that the link is valid and that the block is ours
        // until the compare-and-swap below publishes it.
        let link = unsafe { link.as_ref() };

        let mut current = self.head.load(Ordering::Relaxed);

        loop {
            let head = TaggedHead::unpack(current);

            // Tentatively chain the block in front of the current head. Nobody else can see
            // the block yet, so relaxed is enough - the release below publishes it.
            link.store(head.block_ref, Ordering::Relaxed);

            match self.head.compare_exchange_weak(
                current,
                head.successor(block_ref).pack(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Pops a block from the list, returning its index, or `None` if the list is empty.
    ///
    /// `resolve` maps a block index to the link stored in that block.
    ///
    /// # Safety
    ///
    /// `resolve` must return pointers that satisfy the requirements of [`push()`][Self::push]
    /// for every index that has ever been pushed onto this list.
    pub(crate) unsafe fn pop(&self, resolve: impl Fn(u32) -> NonNull<FreeLink>) -> Option<u32> {
        let mut current = self.head.load(Ordering::Acquire);

        loop {
            let head = TaggedHead::unpack(current);
            let index = head.block_ref.checked_sub(1)?;

            // This is a speculative read. Another thread may pop this same block and hand it to
            // a caller before our compare-and-swap below, and the caller may then write the
            // block with plain (non-atomic) stores that race with this load. That race is a
            // known limitation of a Treiber stack with links stored inside the blocks; nothing
            // here removes it. What holds is that the memory still belongs to a live chunk and
            // that the tag makes the compare-and-swap fail, so a value read this way is never
            // installed as the new head.
            // SAFETY: The caller guarantees `resolve` yields valid, aligned link pointers.
            let next = unsafe { resolve(index).as_ref() }.load(Ordering::Relaxed);

            // Acquire on failure too: the new head we observe is immediately used to read the
            // link of that block, which must be the value its pusher published.
            match self.head.compare_exchange_weak(
                current,
                head.successor(next).pack(),
                Ordering::Acquire,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(index),
                Err(actual) => current = actual,
            }
        }
    }

    /// Counts the blocks in the list by walking it.
    ///
    /// Exclusive access guarantees that nobody pushes or pops while we walk.
    ///
    /// # Safety
    ///
    /// Same requirements on `resolve` as [`pop()`][Self::pop].
    #[must_use]
    pub(crate) unsafe fn len(&mut self, resolve: impl Fn(u32) -> NonNull<FreeLink>) -> usize {
        let mut block_ref = TaggedHead::unpack(*self.head.get_mut()).block_ref;
        let mut count: usize = 0;

        while let Some(index) = block_ref.checked_sub(1) {
            // Cannot overflow, there are at most MAX_BLOCKS blocks.
            count = count.wrapping_add(1);

            // SAFETY: The caller guarantees `resolve` yields valid, aligned link pointers and
            // we hold exclusive access, so the block is free and its link is intact.
            block_ref = unsafe { resolve(index).as_ref() }.load(Ordering::Relaxed);
        }

        count
    }
}

impl fmt::Debug for FreeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head = TaggedHead::unpack(self.head.load(Ordering::Relaxed));

        f.debug_struct("FreeList")
            .field("head_block_ref", &head.block_ref)
            .field("tag", &head.tag)
            .finish_non_exhaustive()
    }
}
