//! ELF32 relocation entry parsing.
//!
//! Relocation tables come in two flavours: `SHT_RELA` entries carry an
//! explicit addend, `SHT_REL` entries keep the addend at the location being
//! patched. Both are read one entry at a time from the [`ByteSource`].

use crate::header::{ElfError, le_i32, le_u32};
use crate::io::ByteSource;

/// Size of an ELF32 `Rela` entry (12 bytes).
pub const ELF32_RELA_SIZE: usize = 12;

/// Size of an ELF32 `Rel` entry (8 bytes).
pub const ELF32_REL_SIZE: usize = 8;

/// Entry format of a relocation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocFormat {
    /// `SHT_RELA`: offset, info, explicit addend.
    Rela,
    /// `SHT_REL`: offset, info; the addend is stored at the patched location.
    Rel,
}

impl RelocFormat {
    /// Size of one entry in bytes.
    #[must_use]
    pub const fn entry_size(self) -> usize {
        match self {
            Self::Rela => ELF32_RELA_SIZE,
            Self::Rel => ELF32_REL_SIZE,
        }
    }
}

/// A parsed ELF32 relocation entry.
///
/// For [`RelocFormat::Rel`] entries `r_addend` is 0 until the relocator
/// fills it in from the target location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Rela {
    /// Byte offset within the target section.
    pub r_offset: u32,
    /// Symbol table index (`r_info >> 8`).
    pub r_sym: u32,
    /// Relocation type (low byte of `r_info`).
    pub r_type: u8,
    /// Addend value.
    pub r_addend: i32,
}

impl Elf32Rela {
    /// Parse an entry of the given format from the start of `data`.
    ///
    /// The caller must ensure `data.len() >= format.entry_size()`.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "ELF32_R_TYPE is defined as the low byte of r_info"
    )]
    pub(crate) fn parse(data: &[u8], format: RelocFormat) -> Self {
        let r_info = le_u32(data, 4);
        Self {
            r_offset: le_u32(data, 0),
            r_sym: r_info >> 8,
            r_type: r_info as u8,
            r_addend: match format {
                RelocFormat::Rela => le_i32(data, 8),
                RelocFormat::Rel => 0,
            },
        }
    }
}

/// Location and format of one relocation table within an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocTable {
    /// Offset of the table, relative to the start of the object.
    pub offset: u32,
    /// Size of the table in bytes.
    pub size: u32,
    /// Entry format.
    pub format: RelocFormat,
}

impl RelocTable {
    /// Number of complete entries in the table. A trailing partial entry is
    /// ignored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.size as usize / self.format.entry_size()
    }

    /// Returns `true` if the table holds no complete entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads entry `index` of the table from an object starting at
    /// `file_offset` in `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ElfError`] if the read fails or comes up short.
    pub fn read_entry<S: ByteSource + ?Sized>(
        &self,
        source: &mut S,
        file_offset: u64,
        index: usize,
    ) -> Result<Elf32Rela, ElfError> {
        let entry_size = self.format.entry_size();
        let mut raw = [0u8; ELF32_RELA_SIZE];
        let offset = file_offset + u64::from(self.offset) + (index * entry_size) as u64;
        source.read_exact(&mut raw[..entry_size], offset)?;
        Ok(Elf32Rela::parse(&raw, self.format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a 12-byte Rela entry.
    fn make_rela(r_offset: u32, r_sym: u32, r_type: u8, r_addend: i32) -> [u8; 12] {
        let mut b = [0u8; 12];
        b[0..4].copy_from_slice(&r_offset.to_le_bytes());
        let r_info = (r_sym << 8) | u32::from(r_type);
        b[4..8].copy_from_slice(&r_info.to_le_bytes());
        b[8..12].copy_from_slice(&r_addend.to_le_bytes());
        b
    }

    #[test]
    fn parse_rela_entry() {
        let data = make_rela(0x1a, 5, 4, -42);
        let rela = Elf32Rela::parse(&data, RelocFormat::Rela);
        assert_eq!(rela.r_offset, 0x1a);
        assert_eq!(rela.r_sym, 5);
        assert_eq!(rela.r_type, 4);
        assert_eq!(rela.r_addend, -42);
    }

    #[test]
    fn parse_rel_entry_has_no_addend() {
        let data = make_rela(0x10, 0x1234, 18, 99);
        let rel = Elf32Rela::parse(&data[..8], RelocFormat::Rel);
        assert_eq!(rel.r_sym, 0x1234);
        assert_eq!(rel.r_type, 18);
        assert_eq!(rel.r_addend, 0);
    }

    #[test]
    fn table_len_ignores_partial_entry() {
        let table = RelocTable {
            offset: 0,
            size: 30,
            format: RelocFormat::Rela,
        };
        assert_eq!(table.len(), 2);
        let rel = RelocTable {
            format: RelocFormat::Rel,
            ..table
        };
        assert_eq!(rel.len(), 3);
    }

    #[test]
    fn read_entries_from_source() {
        let mut file = vec![0u8; 8];
        file.extend_from_slice(&make_rela(0x100, 1, 6, 0));
        file.extend_from_slice(&make_rela(0x200, 2, 7, 8));
        let table = RelocTable {
            offset: 4,
            size: 24,
            format: RelocFormat::Rela,
        };
        let mut src = file.as_slice();
        let second = table.read_entry(&mut src, 4, 1).expect("entry in range");
        assert_eq!(second.r_offset, 0x200);
        assert_eq!(second.r_sym, 2);
        assert_eq!(second.r_addend, 8);
    }

    #[test]
    fn read_entry_past_end_is_truncated() {
        let file = make_rela(0, 0, 0, 0);
        let table = RelocTable {
            offset: 0,
            size: 24,
            format: RelocFormat::Rela,
        };
        let mut src = &file[..];
        assert_eq!(table.read_entry(&mut src, 0, 1), Err(ElfError::Truncated));
    }
}
