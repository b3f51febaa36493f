//! Relocation errors.

use core::fmt;

use kiln_elf::{ElfError, SymbolName};

/// Errors raised by a [`RelocationBackend`](crate::RelocationBackend) while
/// patching a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchError {
    /// The back-end does not implement this relocation type.
    UnknownReloc(u8),
    /// The patched field does not lie entirely within the segment.
    OutOfBounds {
        /// Offset of the field within the segment.
        offset: u32,
    },
}

impl fmt::Display for PatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownReloc(ty) => write!(f, "unsupported relocation type {ty}"),
            Self::OutOfBounds { offset } => {
                write!(f, "relocation target {offset:#x} outside the segment")
            }
        }
    }
}

impl core::error::Error for PatchError {}

/// Errors that can occur while relocating a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocError {
    /// A named symbol is defined neither in the module nor in the firmware.
    Undefined(SymbolName),
    /// A named symbol is defined both in the module and in the firmware.
    MultiplyDefined(SymbolName),
    /// An anonymous symbol refers to a section that was not loaded.
    UnknownSegment,
    /// The back-end does not implement this relocation type.
    UnknownReloc(u8),
    /// A relocation targets a field outside the segment.
    OutOfBounds {
        /// Offset of the field within the segment.
        offset: u32,
    },
    /// A relocation refers to a symbol index past the end of the symbol table.
    BadSymbol(u32),
    /// Reading the object failed.
    Elf(ElfError),
}

impl RelocError {
    /// Returns the symbol name carried by the error, if any.
    #[must_use]
    pub fn symbol(&self) -> Option<&SymbolName> {
        match self {
            Self::Undefined(name) | Self::MultiplyDefined(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for RelocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined(name) => write!(f, "undefined symbol '{name}'"),
            Self::MultiplyDefined(name) => {
                write!(f, "symbol '{name}' defined in both module and firmware")
            }
            Self::UnknownSegment => write!(f, "section symbol refers to an unloaded section"),
            Self::UnknownReloc(ty) => write!(f, "unsupported relocation type {ty}"),
            Self::OutOfBounds { offset } => {
                write!(f, "relocation target {offset:#x} outside the segment")
            }
            Self::BadSymbol(index) => write!(f, "symbol index {index} out of range"),
            Self::Elf(e) => write!(f, "{e}"),
        }
    }
}

impl core::error::Error for RelocError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Elf(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ElfError> for RelocError {
    fn from(e: ElfError) -> Self {
        Self::Elf(e)
    }
}

impl From<PatchError> for RelocError {
    fn from(e: PatchError) -> Self {
        match e {
            PatchError::UnknownReloc(ty) => Self::UnknownReloc(ty),
            PatchError::OutOfBounds { offset } => Self::OutOfBounds { offset },
        }
    }
}
