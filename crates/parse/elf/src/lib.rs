//! ELF32 relocatable object parser for the kiln module loader.
//!
//! Objects are read through a [`ByteSource`], a random-access `pread`
//! primitive, so the whole file never has to fit in RAM. The parser reads the
//! file header and the section header table once and records where the
//! sections the loader cares about live; everything else is read lazily by
//! the relocator. No unsafe code, no allocations.
//!
//! # Usage
//!
//! ```
//! use kiln_elf::{ElfError, parse};
//!
//! fn inspect(object: &[u8]) -> Result<u32, ElfError> {
//!     let mut source = object;
//!     let meta = parse(&mut source, 0)?;
//!     Ok(meta.text.size)
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

#[cfg(any(test, feature = "builder"))]
extern crate alloc;

#[cfg(any(test, feature = "builder"))]
pub mod builder;
pub mod header;
pub mod io;
pub mod metadata;
pub mod name;
pub mod reloc;
pub mod section;

pub use header::{EM_AVR, ELF_IDENT_PREFIX, ET_REL, Elf32Header, ElfError};
pub use io::{ByteSource, IoError};
pub use metadata::{ObjectMetadata, Section, SegmentKind, Span, parse};
pub use name::{NAME_LEN, SymbolName};
pub use reloc::{Elf32Rela, RelocFormat, RelocTable};
pub use section::{
    ELF32_SYM_SIZE, Elf32SectionHeader, Elf32Symbol, SHN_ABS, SHN_UNDEF, SHT_NOBITS, SHT_NULL,
    SHT_PROGBITS, SHT_REL, SHT_RELA, SHT_STRTAB, SHT_SYMTAB, STB_GLOBAL, STB_LOCAL, STT_FUNC,
    STT_NOTYPE, STT_OBJECT, STT_SECTION, SectionFlags,
};
