//! ELF32 section header and symbol table entry parsing.

use bitflags::bitflags;

use crate::header::{ELF32_SHDR_SIZE, ElfError, le_u16, le_u32};
use crate::io::ByteSource;

/// Section type: inactive.
pub const SHT_NULL: u32 = 0;

/// Section type: program-defined contents.
pub const SHT_PROGBITS: u32 = 1;

/// Section type: symbol table.
pub const SHT_SYMTAB: u32 = 2;

/// Section type: string table.
pub const SHT_STRTAB: u32 = 3;

/// Section type: relocation entries with addends.
pub const SHT_RELA: u32 = 4;

/// Section type: occupies no file space (`.bss`).
pub const SHT_NOBITS: u32 = 8;

/// Section type: relocation entries without addends.
pub const SHT_REL: u32 = 9;

/// Special section index: undefined.
pub const SHN_UNDEF: u16 = 0;

/// Special section index: absolute value.
pub const SHN_ABS: u16 = 0xfff1;

/// Symbol type: unspecified.
pub const STT_NOTYPE: u8 = 0;

/// Symbol type: data object.
pub const STT_OBJECT: u8 = 1;

/// Symbol type: function.
pub const STT_FUNC: u8 = 2;

/// Symbol type: section.
pub const STT_SECTION: u8 = 3;

/// Symbol binding: local.
pub const STB_LOCAL: u8 = 0;

/// Symbol binding: global.
pub const STB_GLOBAL: u8 = 1;

/// Size of an ELF32 symbol entry (16 bytes).
pub const ELF32_SYM_SIZE: usize = 16;

bitflags! {
    /// ELF section flags (`sh_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SectionFlags: u32 {
        /// Writable at run time.
        const WRITE     = 0x1;
        /// Occupies memory during execution.
        const ALLOC     = 0x2;
        /// Contains executable machine instructions.
        const EXECINSTR = 0x4;
        /// `sh_info` holds a section header table index.
        const INFO_LINK = 0x40;
    }
}

/// Parsed ELF32 section header entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32SectionHeader {
    /// Offset into the section header string table for this section's name.
    pub sh_name: u32,
    /// Section type (`SHT_SYMTAB`, `SHT_STRTAB`, etc.).
    pub sh_type: u32,
    /// Raw section flags; see [`Elf32SectionHeader::flags`].
    pub sh_flags: u32,
    /// Offset of the section data, relative to the start of the object.
    pub sh_offset: u32,
    /// Size of the section in bytes.
    pub sh_size: u32,
    /// Associated section index (e.g. `.strtab` index for `.symtab`).
    pub sh_link: u32,
    /// Extra info (interpretation depends on section type).
    pub sh_info: u32,
    /// Size of each entry, for sections with fixed-size entries.
    pub sh_entsize: u32,
}

impl Elf32SectionHeader {
    /// Parse a section header from the first 40 bytes of `data`.
    ///
    /// The caller must ensure `data.len() >= ELF32_SHDR_SIZE`.
    pub(crate) fn parse(data: &[u8]) -> Self {
        Self {
            sh_name: le_u32(data, 0),
            sh_type: le_u32(data, 4),
            sh_flags: le_u32(data, 8),
            // sh_addr at 12 is always 0 in relocatable objects
            sh_offset: le_u32(data, 16),
            sh_size: le_u32(data, 20),
            sh_link: le_u32(data, 24),
            sh_info: le_u32(data, 28),
            // sh_addralign at 32: unused
            sh_entsize: le_u32(data, 36),
        }
    }

    /// Reads the section header at `offset` in `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError`] if the read fails or comes up short.
    pub fn read<S: ByteSource + ?Sized>(source: &mut S, offset: u64) -> Result<Self, ElfError> {
        let mut raw = [0u8; ELF32_SHDR_SIZE];
        source.read_exact(&mut raw, offset)?;
        Ok(Self::parse(&raw))
    }

    /// Returns the known flag bits of this section.
    #[must_use]
    pub fn flags(&self) -> SectionFlags {
        SectionFlags::from_bits_truncate(self.sh_flags)
    }
}

/// Parsed ELF32 symbol table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Symbol {
    /// Offset into the string table for this symbol's name; 0 means anonymous.
    pub st_name: u32,
    /// Symbol value: section-relative offset for defined symbols.
    pub st_value: u32,
    /// Symbol size in bytes.
    pub st_size: u32,
    /// Symbol type and binding packed into one byte.
    pub st_info: u8,
    /// Section index this symbol is defined in.
    pub st_shndx: u16,
}

impl Elf32Symbol {
    /// Parse a symbol entry from the first 16 bytes of `data`.
    pub(crate) fn parse(data: &[u8]) -> Self {
        Self {
            st_name: le_u32(data, 0),
            st_value: le_u32(data, 4),
            st_size: le_u32(data, 8),
            st_info: data[12],
            // st_other at 13: unused
            st_shndx: le_u16(data, 14),
        }
    }

    /// Reads the symbol entry at `offset` in `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError`] if the read fails or comes up short.
    pub fn read<S: ByteSource + ?Sized>(source: &mut S, offset: u64) -> Result<Self, ElfError> {
        let mut raw = [0u8; ELF32_SYM_SIZE];
        source.read_exact(&mut raw, offset)?;
        Ok(Self::parse(&raw))
    }

    /// Returns `true` if the symbol has no name (a section or static symbol).
    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.st_name == 0
    }

    /// Returns the symbol type (lower 4 bits of `st_info`).
    #[must_use]
    pub fn sym_type(&self) -> u8 {
        self.st_info & 0xf
    }

    /// Returns the symbol binding (upper 4 bits of `st_info`).
    #[must_use]
    pub fn sym_bind(&self) -> u8 {
        self.st_info >> 4
    }
}
