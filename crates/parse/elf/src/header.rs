//! ELF32 header parsing.
//!
//! Parses the ELF32 file header from raw bytes using safe field extraction
//! via `from_le_bytes()`.

use core::fmt;

use crate::io::{ByteSource, IoError};

/// ELF class: 32-bit.
const ELFCLASS32: u8 = 1;

/// ELF data encoding: little-endian.
const ELFDATA2LSB: u8 = 1;

/// ELF identification version.
const EV_CURRENT: u8 = 1;

/// The identification prefix every loadable object must start with:
/// magic, 32-bit class, little-endian, version 1.
pub const ELF_IDENT_PREFIX: [u8; 7] = [0x7f, b'E', b'L', b'F', ELFCLASS32, ELFDATA2LSB, EV_CURRENT];

/// ELF type: relocatable object.
pub const ET_REL: u16 = 1;

/// ELF machine: Atmel AVR 8-bit microcontroller.
pub const EM_AVR: u16 = 83;

/// Size of an ELF32 file header (52 bytes).
pub const ELF32_EHDR_SIZE: usize = 52;

/// Size of an ELF32 section header entry (40 bytes).
pub const ELF32_SHDR_SIZE: usize = 40;

/// Read a little-endian `u16` from `data` at byte offset `off`.
///
/// # Panics
///
/// Panics if `off + 2 > data.len()`. Callers must bounds-check first.
pub(crate) fn le_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

/// Read a little-endian `u32` from `data` at byte offset `off`.
pub(crate) fn le_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

/// Read a little-endian `i32` from `data` at byte offset `off`.
pub(crate) fn le_i32(data: &[u8], off: usize) -> i32 {
    i32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

/// Errors that can occur when parsing an ELF object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// The identification prefix or header layout is not a supported ELF32 object.
    BadHeader,
    /// The object has no symbol table.
    NoSymtab,
    /// The object has no string table.
    NoStrtab,
    /// The object has no (or an empty) `.text` section.
    NoText,
    /// The source ended before a complete structure could be read.
    Truncated,
    /// A section offset or size lies outside the object.
    InvalidOffset,
    /// The byte source failed.
    Io(IoError),
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadHeader => write!(f, "bad ELF header (expected 32-bit little-endian ELF)"),
            Self::NoSymtab => write!(f, "object has no symbol table"),
            Self::NoStrtab => write!(f, "object has no string table"),
            Self::NoText => write!(f, "object has no .text section"),
            Self::Truncated => write!(f, "input data truncated"),
            Self::InvalidOffset => write!(f, "invalid section offset or size"),
            Self::Io(e) => write!(f, "read failed: {e}"),
        }
    }
}

impl core::error::Error for ElfError {}

impl From<IoError> for ElfError {
    fn from(e: IoError) -> Self {
        Self::Io(e)
    }
}

/// Parsed ELF32 file header.
///
/// Only the fields the loader needs are kept; program headers are meaningless
/// for relocatable objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Header {
    /// ELF type (`ET_REL` for loadable modules).
    pub e_type: u16,
    /// Target machine architecture.
    pub e_machine: u16,
    /// Processor-specific flags.
    pub e_flags: u32,
    /// Offset of the section header table in the file.
    pub e_shoff: u32,
    /// Size of each section header entry.
    pub e_shentsize: u16,
    /// Number of section header entries.
    pub e_shnum: u16,
    /// Section header string table index.
    pub e_shstrndx: u16,
}

impl Elf32Header {
    /// Parse an ELF32 file header from raw bytes.
    ///
    /// Validates the 7-byte identification prefix and that section header
    /// entries are large enough to hold an ELF32 section header.
    ///
    /// The prefix is compared before the length is checked, so any input
    /// that does not start with it is a bad header however short it is.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError::BadHeader`] if validation fails and
    /// [`ElfError::Truncated`] if a well-identified `data` is shorter than a
    /// header.
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if !data.starts_with(&ELF_IDENT_PREFIX) {
            return Err(ElfError::BadHeader);
        }
        if data.len() < ELF32_EHDR_SIZE {
            return Err(ElfError::Truncated);
        }

        let e_shentsize = le_u16(data, 46);
        let e_shnum = le_u16(data, 48);
        if e_shnum > 0 && usize::from(e_shentsize) < ELF32_SHDR_SIZE {
            return Err(ElfError::BadHeader);
        }

        Ok(Self {
            e_type: le_u16(data, 16),
            e_machine: le_u16(data, 18),
            // e_version (20), e_entry (24), e_phoff (28) are unused
            e_shoff: le_u32(data, 32),
            e_flags: le_u32(data, 36),
            e_shentsize,
            e_shnum,
            e_shstrndx: le_u16(data, 50),
        })
    }

    /// Reads and parses the header at `offset` in `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError`] if the read fails or the header is invalid.
    pub fn read<S: ByteSource + ?Sized>(source: &mut S, offset: u64) -> Result<Self, ElfError> {
        let mut raw = [0u8; ELF32_EHDR_SIZE];
        let mut filled = 0;
        while filled < raw.len() {
            let n = source.pread(&mut raw[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Self::parse(&raw[..filled])
    }

    /// Returns the file offset (relative to the object start) of section
    /// header `index`.
    #[must_use]
    pub fn section_header_offset(&self, index: u16) -> u64 {
        u64::from(self.e_shoff) + u64::from(index) * u64::from(self.e_shentsize)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a minimal valid ELF32 relocatable header (52 bytes).
    ///
    /// Defaults: `ET_REL`, `EM_AVR`, no sections.
    pub(crate) fn make_elf_header() -> Vec<u8> {
        let mut buf = vec![0u8; ELF32_EHDR_SIZE];

        buf[..7].copy_from_slice(&ELF_IDENT_PREFIX);
        buf[16..18].copy_from_slice(&ET_REL.to_le_bytes());
        buf[18..20].copy_from_slice(&EM_AVR.to_le_bytes());
        buf[20..24].copy_from_slice(&1u32.to_le_bytes());
        buf[40..42].copy_from_slice(&(ELF32_EHDR_SIZE as u16).to_le_bytes());
        buf[46..48].copy_from_slice(&(ELF32_SHDR_SIZE as u16).to_le_bytes());

        buf
    }

    #[test]
    fn parse_valid_header() {
        let buf = make_elf_header();
        let hdr = Elf32Header::parse(&buf).expect("valid header");
        assert_eq!(hdr.e_type, ET_REL);
        assert_eq!(hdr.e_machine, EM_AVR);
        assert_eq!(hdr.e_shnum, 0);
        assert_eq!(hdr.e_shentsize, ELF32_SHDR_SIZE as u16);
    }

    #[test]
    fn reject_bad_magic() {
        let mut buf = make_elf_header();
        buf[1] = b'X';
        assert_eq!(Elf32Header::parse(&buf), Err(ElfError::BadHeader));
    }

    #[test]
    fn reject_64bit_class() {
        let mut buf = make_elf_header();
        buf[4] = 2; // ELFCLASS64
        assert_eq!(Elf32Header::parse(&buf), Err(ElfError::BadHeader));
    }

    #[test]
    fn reject_big_endian() {
        let mut buf = make_elf_header();
        buf[5] = 2; // ELFDATA2MSB
        assert_eq!(Elf32Header::parse(&buf), Err(ElfError::BadHeader));
    }

    #[test]
    fn reject_wrong_version() {
        let mut buf = make_elf_header();
        buf[6] = 0;
        assert_eq!(Elf32Header::parse(&buf), Err(ElfError::BadHeader));
    }

    #[test]
    fn reject_small_section_entries() {
        let mut buf = make_elf_header();
        buf[46..48].copy_from_slice(&32u16.to_le_bytes());
        buf[48..50].copy_from_slice(&1u16.to_le_bytes());
        assert_eq!(Elf32Header::parse(&buf), Err(ElfError::BadHeader));
    }

    #[test]
    fn machine_is_not_validated() {
        let mut buf = make_elf_header();
        buf[18..20].copy_from_slice(&105u16.to_le_bytes()); // EM_MSP430
        let hdr = Elf32Header::parse(&buf).expect("machine is the back-end's concern");
        assert_eq!(hdr.e_machine, 105);
    }

    #[test]
    fn reject_truncated_data() {
        let buf = make_elf_header();
        assert_eq!(Elf32Header::parse(&buf[..20]), Err(ElfError::Truncated));
        assert_eq!(Elf32Header::parse(&buf[..7]), Err(ElfError::Truncated));
    }

    #[test]
    fn short_input_without_prefix_is_bad_header() {
        assert_eq!(Elf32Header::parse(&[0x55; 16]), Err(ElfError::BadHeader));
        assert_eq!(Elf32Header::parse(&ELF_IDENT_PREFIX[..6]), Err(ElfError::BadHeader));
        assert_eq!(Elf32Header::parse(&[]), Err(ElfError::BadHeader));

        let mut src: &[u8] = &[0u8; 20];
        assert_eq!(Elf32Header::read(&mut src, 0), Err(ElfError::BadHeader));
    }

    #[test]
    fn read_reports_truncation_after_prefix() {
        let header = make_elf_header();
        let mut src = &header[..30];
        assert_eq!(Elf32Header::read(&mut src, 0), Err(ElfError::Truncated));
    }

    #[test]
    fn section_header_offset_arithmetic() {
        let mut buf = make_elf_header();
        buf[32..36].copy_from_slice(&0x200u32.to_le_bytes());
        buf[48..50].copy_from_slice(&4u16.to_le_bytes());
        let hdr = Elf32Header::parse(&buf).expect("valid header");
        assert_eq!(hdr.section_header_offset(0), 0x200);
        assert_eq!(hdr.section_header_offset(3), 0x200 + 3 * 40);
    }

    #[test]
    fn read_from_source_at_offset() {
        let mut file = vec![0xAAu8; 16];
        file.extend_from_slice(&make_elf_header());
        let mut src = file.as_slice();
        let hdr = Elf32Header::read(&mut src, 16).expect("header after padding");
        assert_eq!(hdr.e_type, ET_REL);
    }

    #[test]
    fn display_errors() {
        let errors = [
            ElfError::BadHeader,
            ElfError::NoSymtab,
            ElfError::NoStrtab,
            ElfError::NoText,
            ElfError::Truncated,
            ElfError::InvalidOffset,
            ElfError::Io(IoError::Device(-5)),
        ];
        for err in &errors {
            let msg = format!("{err}");
            assert!(!msg.is_empty());
        }
    }
}
