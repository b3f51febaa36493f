//! Compacting, handle-indirected heap for flat-memory microcontrollers.
//!
//! Small MCUs have no MMU, so a fragmented heap stays fragmented unless
//! blocks move. [`CompactHeap`] hands out *locked* blocks that never move;
//! a block can be *unlocked* into a [`MovableHandle`], after which
//! compaction is free to slide it towards the start of the region to merge
//! holes. The handle stays valid across moves because it names a slot in a
//! fixed handle table that the heap rewrites.
//!
//! The heap works on a borrowed `&mut [u8]` and addresses blocks by region
//! offset; mapping offsets to target addresses is the caller's business.
//!
//! ```
//! use kiln_heap::{CompactHeap, HeapConfig, MovableHandle};
//!
//! let mut region = [0u8; 512];
//! let mut heap = CompactHeap::<4>::new(&mut region, HeapConfig::new());
//!
//! let hole = heap.allocate(64)?;
//! let data = heap.allocate(16)?;
//! heap.bytes_mut(data)[..5].copy_from_slice(b"hello");
//! heap.free(hole);
//!
//! let data: MovableHandle = heap.unlock(data)?;
//! assert_eq!(heap.compact_all(), 1);
//! assert_eq!(&heap.get(&data)[..5], b"hello");
//! # Ok::<(), kiln_heap::HeapError>(())
//! ```

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod error;
pub mod handle;
pub mod heap;

pub use error::HeapError;
pub use handle::{MovableHandle, RawHandle};
pub use heap::{ALIGN, CompactHeap, HEADER_SIZE, HeapConfig};
