//! Loader errors.

use core::fmt;

use kiln_elf::{ElfError, SymbolName};
use kiln_heap::HeapError;
use kiln_reloc::RelocError;

use crate::platform::PlatformError;

/// Errors returned by [`ModuleLoader`](crate::ModuleLoader).
///
/// A failed load has already released everything it allocated; the slot is
/// `Empty` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The object could not be parsed.
    Elf(ElfError),
    /// A relocation or symbol lookup failed.
    Reloc(RelocError),
    /// The module defines neither a constructor nor a task descriptor.
    NoStartpoint,
    /// `.text` plus `.rodata` exceeds the limit or does not fit in memory.
    TextTooLarge,
    /// `.data` exceeds the limit, or data plus bss does not fit in memory.
    DataTooLarge,
    /// `.bss` exceeds the limit.
    BssTooLarge,
    /// The slot already holds a module, or no slot is free.
    ModuleBusy,
    /// The slot index is out of range.
    BadSlot(usize),
    /// The heap is exhausted.
    OutOfMemory,
    /// Writing module code to flash failed.
    Flash(PlatformError),
    /// The scheduler refused to start or stop the module's task.
    Scheduler(PlatformError),
}

impl LoadError {
    /// Returns the symbol the error is about, if any.
    #[must_use]
    pub fn symbol(&self) -> Option<&SymbolName> {
        match self {
            Self::Reloc(e) => e.symbol(),
            _ => None,
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elf(e) => write!(f, "bad object: {e}"),
            Self::Reloc(e) => write!(f, "link failed: {e}"),
            Self::NoStartpoint => write!(f, "module has no _init or task descriptor"),
            Self::TextTooLarge => write!(f, "module code too large"),
            Self::DataTooLarge => write!(f, "module data too large"),
            Self::BssTooLarge => write!(f, "module bss too large"),
            Self::ModuleBusy => write!(f, "module slot busy"),
            Self::BadSlot(slot) => write!(f, "no module slot {slot}"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Flash(e) => write!(f, "flash write failed: {e}"),
            Self::Scheduler(e) => write!(f, "scheduler: {e}"),
        }
    }
}

impl core::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Elf(e) => Some(e),
            Self::Reloc(e) => Some(e),
            Self::Flash(e) | Self::Scheduler(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ElfError> for LoadError {
    fn from(e: ElfError) -> Self {
        Self::Elf(e)
    }
}

impl From<RelocError> for LoadError {
    fn from(e: RelocError) -> Self {
        Self::Reloc(e)
    }
}

impl From<HeapError> for LoadError {
    fn from(_: HeapError) -> Self {
        Self::OutOfMemory
    }
}
