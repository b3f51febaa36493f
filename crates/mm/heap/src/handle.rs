//! Handles to heap blocks.

use core::fmt;
use core::marker::PhantomData;

/// A locked allocation: a fixed offset into the heap region.
///
/// The block behind a `RawHandle` never moves. Handles are plain values; as
/// with a pointer, using one after its block is freed is a logic error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle {
    offset: usize,
}

impl RawHandle {
    pub(crate) const fn new(offset: usize) -> Self {
        Self { offset }
    }

    /// Offset of the payload within the heap region.
    #[must_use]
    pub const fn offset(self) -> usize {
        self.offset
    }
}

/// An unlocked allocation that compaction may move.
///
/// The handle names a slot in the heap's handle table; the heap rewrites the
/// slot whenever it slides the block, so the handle stays valid across
/// [`CompactHeap::compact_one`](crate::CompactHeap::compact_one). `T` records
/// what the block holds.
pub struct MovableHandle<T: ?Sized = [u8]> {
    slot: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ?Sized> MovableHandle<T> {
    pub(crate) const fn new(slot: usize) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    /// Index of the handle table slot.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }
}

impl<T: ?Sized> fmt::Debug for MovableHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MovableHandle")
            .field("slot", &self.slot)
            .finish()
    }
}

impl<T: ?Sized> PartialEq for MovableHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot
    }
}

impl<T: ?Sized> Eq for MovableHandle<T> {}
