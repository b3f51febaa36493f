//! The architecture seam of the relocator.

use kiln_elf::Elf32Rela;

use crate::error::PatchError;

/// Encodes resolved relocation values into machine code and data.
///
/// The relocator resolves the target value; the back-end owns the bit
/// layout of every relocation type for its machine.
pub trait RelocationBackend {
    /// ELF `e_machine` value this back-end handles.
    const MACHINE: u16;

    /// Writes `value` into the field `rela` describes.
    ///
    /// `place` is the target address of the field itself, for PC-relative
    /// types. Only the bytes of the field change.
    ///
    /// # Errors
    ///
    /// [`PatchError::UnknownReloc`] for unsupported types,
    /// [`PatchError::OutOfBounds`] if the field is not inside `segment`.
    fn apply(
        &self,
        segment: &mut [u8],
        rela: &Elf32Rela,
        place: u32,
        value: u32,
    ) -> Result<(), PatchError>;

    /// Reads back the value encoded in a field of type `r_type` at `offset`.
    ///
    /// Address-carrying fields are returned as byte addresses; partial
    /// fields (one byte of an address) are returned as stored.
    ///
    /// # Errors
    ///
    /// As for [`apply`](Self::apply).
    fn decode(
        &self,
        segment: &[u8],
        r_type: u8,
        offset: u32,
        place: u32,
    ) -> Result<u32, PatchError>;

    /// Returns the addend a `SHT_REL` entry keeps at its target.
    ///
    /// The default reads a little-endian 32-bit word.
    ///
    /// # Errors
    ///
    /// [`PatchError::OutOfBounds`] if the field is not inside `segment`.
    #[expect(clippy::cast_possible_wrap, reason = "the stored word is a signed addend")]
    fn implicit_addend(&self, segment: &[u8], rela: &Elf32Rela) -> Result<i32, PatchError> {
        let b = field(segment, rela.r_offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i32)
    }
}

/// Returns the `len`-byte field at `offset` within `segment`.
///
/// # Errors
///
/// [`PatchError::OutOfBounds`] if the field is not entirely inside `segment`.
pub fn field(segment: &[u8], offset: u32, len: usize) -> Result<&[u8], PatchError> {
    let start = offset as usize;
    segment
        .get(start..start.saturating_add(len))
        .ok_or(PatchError::OutOfBounds { offset })
}

/// Mutable variant of [`field`].
///
/// # Errors
///
/// [`PatchError::OutOfBounds`] if the field is not entirely inside `segment`.
pub fn field_mut(segment: &mut [u8], offset: u32, len: usize) -> Result<&mut [u8], PatchError> {
    let start = offset as usize;
    segment
        .get_mut(start..start.saturating_add(len))
        .ok_or(PatchError::OutOfBounds { offset })
}
