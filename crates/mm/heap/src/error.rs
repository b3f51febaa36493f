//! Heap errors.

use core::fmt;

/// Errors returned by [`CompactHeap`](crate::CompactHeap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// No free block fits and the break cannot be raised far enough.
    OutOfMemory,
    /// Every handle table slot is in use.
    NoHandleSlots,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of heap memory"),
            Self::NoHandleSlots => write!(f, "no free movable-handle slots"),
        }
    }
}

impl core::error::Error for HeapError {}
