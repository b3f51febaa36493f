//! Relocation of ELF32 module segments.
//!
//! A [`Relocator`] walks a relocation table entry by entry, resolves each
//! referenced symbol against the module's own segments or the firmware
//! [`SymbolTable`](kiln_symtab::SymbolTable), and hands the resolved value to
//! a [`RelocationBackend`] that knows the target's instruction encodings.
//! Segments are patched in place; nothing is allocated.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod avr;
pub mod backend;
pub mod error;
pub mod relocator;
pub mod symbols;

pub use avr::AvrBackend;
pub use backend::RelocationBackend;
pub use error::{PatchError, RelocError};
pub use relocator::{Relocator, SegmentBases};
pub use symbols::ModuleSymbols;
