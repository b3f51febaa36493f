//! The compacting heap.
//!
//! Blocks are laid out back to back from offset 0 of the region up to the
//! break. Each block starts with a two-word header: the block size
//! (header included) and a link word. For free blocks the link is the
//! offset of the next free block; the free list is kept sorted by address
//! and adjacent free blocks are always merged. For allocated blocks the link
//! is 0 while the block is locked, or `slot + 1` while it is unlocked and
//! registered in the handle table.

use core::mem::size_of;

use log::{debug, trace};

use crate::error::HeapError;
use crate::handle::{MovableHandle, RawHandle};

const WORD: usize = size_of::<usize>();

/// Size of a block header.
pub const HEADER_SIZE: usize = 2 * WORD;

/// Granularity of block sizes.
pub const ALIGN: usize = WORD;

/// End of the free list.
const NIL: usize = usize::MAX;

/// An unused handle table slot.
const NO_BLOCK: usize = usize::MAX;

/// Heap tuning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapConfig {
    /// Bytes kept free between the break and the stack probe.
    pub stack_margin: usize,
}

impl HeapConfig {
    /// Default configuration: no stack margin.
    #[must_use]
    pub const fn new() -> Self {
        Self { stack_margin: 0 }
    }

    /// Sets the stack margin.
    #[must_use]
    pub const fn with_stack_margin(mut self, margin: usize) -> Self {
        self.stack_margin = margin;
        self
    }
}

/// A compacting heap over a borrowed byte region.
///
/// Allocations start out locked and never move. Unlocking registers a block
/// in a table of `SLOTS` handles; [`compact_one`](Self::compact_one) may then
/// slide it towards the start of the region to close holes.
pub struct CompactHeap<'r, const SLOTS: usize> {
    region: &'r mut [u8],
    /// First free block, or `NIL`.
    free_head: usize,
    /// End of the highest block.
    brk: usize,
    /// Block offset per handle slot, or `NO_BLOCK`.
    handles: [usize; SLOTS],
    config: HeapConfig,
    /// Returns the region offset the stack currently reaches down to.
    stack_probe: Option<fn() -> usize>,
}

impl<'r, const SLOTS: usize> CompactHeap<'r, SLOTS> {
    /// Creates an empty heap over `region`.
    pub fn new(region: &'r mut [u8], config: HeapConfig) -> Self {
        Self {
            region,
            free_head: NIL,
            brk: 0,
            handles: [NO_BLOCK; SLOTS],
            config,
            stack_probe: None,
        }
    }

    /// Registers a callback reporting how far down the stack has grown, as
    /// an offset into the region. The break is never raised past that
    /// offset minus the configured stack margin.
    pub fn register_stack_probe(&mut self, probe: fn() -> usize) {
        self.stack_probe = Some(probe);
    }

    /// Highest offset the break may currently reach.
    #[must_use]
    pub fn ceiling(&self) -> usize {
        let end = self.region.len() & !(ALIGN - 1);
        match self.stack_probe {
            Some(probe) => end.min(probe().saturating_sub(self.config.stack_margin) & !(ALIGN - 1)),
            None => end,
        }
    }

    // -----------------------------------------------------------------------
    // Header access
    // -----------------------------------------------------------------------

    fn word(&self, at: usize) -> usize {
        let mut raw = [0u8; WORD];
        raw.copy_from_slice(&self.region[at..at + WORD]);
        usize::from_ne_bytes(raw)
    }

    fn set_word(&mut self, at: usize, value: usize) {
        self.region[at..at + WORD].copy_from_slice(&value.to_ne_bytes());
    }

    fn size_at(&self, block: usize) -> usize {
        self.word(block)
    }

    fn link_at(&self, block: usize) -> usize {
        self.word(block + WORD)
    }

    fn set_link(&mut self, block: usize, link: usize) {
        self.set_word(block + WORD, link);
    }

    fn set_allocated(&mut self, block: usize, size: usize) {
        self.set_word(block, size);
        self.set_link(block, 0);
    }

    fn unlink(&mut self, prev: usize, block: usize) {
        let next = self.link_at(block);
        if prev == NIL {
            self.free_head = next;
        } else {
            self.set_link(prev, next);
        }
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    /// Allocates a locked block with room for `size` bytes.
    ///
    /// Prefers an exact fit, then the smallest free block that is large
    /// enough (handing out its upper part), then raises the break.
    ///
    /// # Errors
    ///
    /// [`HeapError::OutOfMemory`] if none of those succeed.
    pub fn allocate(&mut self, size: usize) -> Result<RawHandle, HeapError> {
        let need = size
            .checked_next_multiple_of(ALIGN)
            .and_then(|s| s.checked_add(HEADER_SIZE))
            .ok_or(HeapError::OutOfMemory)?;

        let block = match self.take_free(need) {
            Some(block) => block,
            None => self.bump(need)?,
        };
        trace!("heap: allocated {need} bytes at {block:#x}");
        Ok(RawHandle::new(block + HEADER_SIZE))
    }

    fn take_free(&mut self, need: usize) -> Option<usize> {
        let mut best: Option<(usize, usize, usize)> = None;
        let (mut prev, mut cur) = (NIL, self.free_head);
        while cur != NIL {
            let size = self.size_at(cur);
            if size == need {
                self.unlink(prev, cur);
                self.set_allocated(cur, size);
                return Some(cur);
            }
            if size > need && best.is_none_or(|(_, _, best_size)| size < best_size) {
                best = Some((prev, cur, size));
            }
            prev = cur;
            cur = self.link_at(cur);
        }

        let (prev, block, size) = best?;
        if size - need < HEADER_SIZE {
            self.unlink(prev, block);
            self.set_allocated(block, size);
            Some(block)
        } else {
            // The lower part stays on the free list in place.
            self.set_word(block, size - need);
            let upper = block + size - need;
            self.set_allocated(upper, need);
            Some(upper)
        }
    }

    fn bump(&mut self, need: usize) -> Result<usize, HeapError> {
        let end = self.brk.checked_add(need).ok_or(HeapError::OutOfMemory)?;
        if end > self.ceiling() {
            return Err(HeapError::OutOfMemory);
        }
        let block = self.brk;
        self.brk = end;
        self.set_allocated(block, need);
        Ok(block)
    }

    /// Frees a locked block.
    ///
    /// The block joins the free list, merging with free neighbours on both
    /// sides; free space that ends at the break lowers the break. A block
    /// freed while still unlocked also gives up its handle slot.
    pub fn free(&mut self, handle: RawHandle) {
        let block = handle.offset() - HEADER_SIZE;
        let link = self.link_at(block);
        if link != 0 {
            debug!("heap: freeing unlocked block at {block:#x}, dropping handle {}", link - 1);
            if let Some(slot) = self.handles.get_mut(link - 1) {
                *slot = NO_BLOCK;
            }
        }
        trace!("heap: freeing block at {block:#x}");
        self.insert_and_coalesce(block);
        self.trim_top();
    }

    fn insert_and_coalesce(&mut self, block: usize) {
        let size = self.size_at(block);

        let (mut prev, mut cur) = (NIL, self.free_head);
        while cur != NIL && cur < block {
            prev = cur;
            cur = self.link_at(cur);
        }

        if prev != NIL && prev + self.size_at(prev) == block {
            let merged = self.size_at(prev) + size;
            self.set_word(prev, merged);
            if cur != NIL && prev + merged == cur {
                self.set_word(prev, merged + self.size_at(cur));
                self.set_link(prev, self.link_at(cur));
            }
            return;
        }

        if cur != NIL && block + size == cur {
            self.set_word(block, size + self.size_at(cur));
            self.set_link(block, self.link_at(cur));
        } else {
            self.set_link(block, cur);
        }

        if prev == NIL {
            self.free_head = block;
        } else {
            self.set_link(prev, block);
        }
    }

    /// Returns a free block that ends at the break to the break.
    fn trim_top(&mut self) {
        let (mut prev, mut cur) = (NIL, self.free_head);
        while cur != NIL && self.link_at(cur) != NIL {
            prev = cur;
            cur = self.link_at(cur);
        }
        if cur != NIL && cur + self.size_at(cur) == self.brk {
            self.unlink(prev, cur);
            self.brk = cur;
        }
    }

    // -----------------------------------------------------------------------
    // Handles
    // -----------------------------------------------------------------------

    /// Unlocks a block so compaction may move it.
    ///
    /// # Errors
    ///
    /// [`HeapError::NoHandleSlots`] if the handle table is full; the block
    /// stays locked.
    pub fn unlock<T: ?Sized>(&mut self, handle: RawHandle) -> Result<MovableHandle<T>, HeapError> {
        let slot = self
            .handles
            .iter()
            .position(|&block| block == NO_BLOCK)
            .ok_or(HeapError::NoHandleSlots)?;
        let block = handle.offset() - HEADER_SIZE;
        self.handles[slot] = block;
        self.set_link(block, slot + 1);
        Ok(MovableHandle::new(slot))
    }

    /// Locks a block in place and releases its handle slot.
    pub fn lock<T: ?Sized>(&mut self, handle: MovableHandle<T>) -> RawHandle {
        let block = core::mem::replace(&mut self.handles[handle.slot()], NO_BLOCK);
        debug_assert_ne!(block, NO_BLOCK, "stale movable handle");
        self.set_link(block, 0);
        RawHandle::new(block + HEADER_SIZE)
    }

    /// Returns the current location of an unlocked block.
    #[must_use]
    pub fn resolve<T: ?Sized>(&self, handle: &MovableHandle<T>) -> RawHandle {
        RawHandle::new(self.handles[handle.slot()] + HEADER_SIZE)
    }

    /// Payload of a block. May be longer than requested, up to the block
    /// size.
    #[must_use]
    pub fn bytes(&self, handle: RawHandle) -> &[u8] {
        let block = handle.offset() - HEADER_SIZE;
        let end = block + self.size_at(block);
        &self.region[handle.offset()..end]
    }

    /// Mutable payload of a block.
    pub fn bytes_mut(&mut self, handle: RawHandle) -> &mut [u8] {
        let block = handle.offset() - HEADER_SIZE;
        let end = block + self.size_at(block);
        &mut self.region[handle.offset()..end]
    }

    /// Payload of an unlocked block.
    #[must_use]
    pub fn get<T: ?Sized>(&self, handle: &MovableHandle<T>) -> &[u8] {
        self.bytes(self.resolve(handle))
    }

    /// Mutable payload of an unlocked block.
    pub fn get_mut<T: ?Sized>(&mut self, handle: &MovableHandle<T>) -> &mut [u8] {
        let raw = self.resolve(handle);
        self.bytes_mut(raw)
    }

    // -----------------------------------------------------------------------
    // Compaction
    // -----------------------------------------------------------------------

    /// Moves one unlocked block down into the free block right below it.
    ///
    /// Returns `false` if no free block is directly followed by an unlocked
    /// block. Locked blocks never move.
    pub fn compact_one(&mut self) -> bool {
        let (mut prev, mut free) = (NIL, self.free_head);
        while free != NIL {
            let free_size = self.size_at(free);
            let next_free = self.link_at(free);
            // Free neighbours are always merged, so this block is allocated.
            let block = free + free_size;
            if block < self.brk && self.link_at(block) != 0 {
                self.slide_down(prev, free, free_size, next_free, block);
                return true;
            }
            prev = free;
            free = next_free;
        }
        false
    }

    fn slide_down(&mut self, prev: usize, free: usize, free_size: usize, next_free: usize, block: usize) {
        let size = self.size_at(block);
        let slot = self.link_at(block) - 1;
        self.region.copy_within(block..block + size, free);
        self.handles[slot] = free;
        debug!("heap: moved {size} bytes from {block:#x} to {free:#x}");

        let hole = free + size;
        if next_free != NIL && hole + free_size == next_free {
            self.set_word(hole, free_size + self.size_at(next_free));
            self.set_link(hole, self.link_at(next_free));
        } else {
            self.set_word(hole, free_size);
            self.set_link(hole, next_free);
        }
        if prev == NIL {
            self.free_head = hole;
        } else {
            self.set_link(prev, hole);
        }
        self.trim_top();
    }

    /// Compacts until no block can move; returns the number of moves.
    pub fn compact_all(&mut self) -> usize {
        let mut moves = 0;
        while self.compact_one() {
            moves += 1;
        }
        if moves > 0 {
            debug!("heap: compaction moved {moves} blocks, break now {:#x}", self.brk);
        }
        moves
    }

    // -----------------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------------

    /// Current break: the end of the highest block.
    #[must_use]
    pub fn high_water(&self) -> usize {
        self.brk
    }

    /// Size of the region in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes held by free blocks below the break.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.free_list().map(|block| self.size_at(block)).sum()
    }

    /// Number of free blocks below the break.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        self.free_list().count()
    }

    /// Number of handle table slots in use.
    #[must_use]
    pub fn handles_in_use(&self) -> usize {
        self.handles.iter().filter(|&&block| block != NO_BLOCK).count()
    }

    fn free_list(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cur = self.free_head;
        core::iter::from_fn(move || {
            (cur != NIL).then(|| {
                let block = cur;
                cur = self.link_at(block);
                block
            })
        })
    }

    /// Audits the heap structure.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated invariant.
    pub fn check(&self) -> Result<(), &'static str> {
        let mut at = 0;
        let mut next_free = self.free_head;
        let mut prev_was_free = false;
        while at < self.brk {
            let size = self.size_at(at);
            if size < HEADER_SIZE || size % ALIGN != 0 {
                return Err("bad block size");
            }
            let is_free = at == next_free;
            if is_free {
                if prev_was_free {
                    return Err("adjacent free blocks");
                }
                next_free = self.link_at(at);
                if next_free != NIL && next_free <= at {
                    return Err("free list out of order");
                }
            } else {
                let link = self.link_at(at);
                if link != 0 && self.handles.get(link - 1) != Some(&at) {
                    return Err("unlocked block not in handle table");
                }
            }
            prev_was_free = is_free;
            at += size;
        }
        if at != self.brk {
            return Err("blocks overrun the break");
        }
        if next_free != NIL {
            return Err("free list leaves the heap");
        }
        if prev_was_free {
            return Err("free block at the break");
        }
        for (slot, &block) in self.handles.iter().enumerate() {
            if block != NO_BLOCK && (block >= self.brk || self.link_at(block) != slot + 1) {
                return Err("stale handle slot");
            }
        }
        Ok(())
    }
}
