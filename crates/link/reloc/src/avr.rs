//! AVR relocation back-end.
//!
//! AVR is a Harvard machine: code is addressed in 16-bit words, data in
//! bytes. Symbol values handed to the back-end are byte addresses; the
//! program-memory (`_PM`) types and the branch/call encodings convert to word
//! addresses themselves.

use kiln_elf::{EM_AVR, Elf32Rela};

use crate::backend::{RelocationBackend, field, field_mut};
use crate::error::PatchError;

// ---------------------------------------------------------------------------
// AVR relocation type constants
// ---------------------------------------------------------------------------

/// No relocation.
pub const R_AVR_NONE: u8 = 0;

/// 32-bit absolute (not supported by this back-end).
pub const R_AVR_32: u8 = 1;

/// 7-bit PC-relative branch (`BRxx`).
pub const R_AVR_7_PCREL: u8 = 2;

/// 13-bit PC-relative jump (`RJMP`/`RCALL`).
pub const R_AVR_13_PCREL: u8 = 3;

/// 16-bit absolute byte address.
pub const R_AVR_16: u8 = 4;

/// 16-bit absolute word address.
pub const R_AVR_16_PM: u8 = 5;

/// `LDI` with bits 7..0 of the value.
pub const R_AVR_LO8_LDI: u8 = 6;

/// `LDI` with bits 15..8 of the value.
pub const R_AVR_HI8_LDI: u8 = 7;

/// `LDI` with bits 23..16 of the value.
pub const R_AVR_HH8_LDI: u8 = 8;

/// `LDI` with bits 7..0 of the negated value.
pub const R_AVR_LO8_LDI_NEG: u8 = 9;

/// `LDI` with bits 15..8 of the negated value.
pub const R_AVR_HI8_LDI_NEG: u8 = 10;

/// `LDI` with bits 23..16 of the negated value.
pub const R_AVR_HH8_LDI_NEG: u8 = 11;

/// `LDI` with bits 7..0 of the word address.
pub const R_AVR_LO8_LDI_PM: u8 = 12;

/// `LDI` with bits 15..8 of the word address.
pub const R_AVR_HI8_LDI_PM: u8 = 13;

/// `LDI` with bits 23..16 of the word address.
pub const R_AVR_HH8_LDI_PM: u8 = 14;

/// `LDI` with bits 7..0 of the negated word address.
pub const R_AVR_LO8_LDI_PM_NEG: u8 = 15;

/// `LDI` with bits 15..8 of the negated word address.
pub const R_AVR_HI8_LDI_PM_NEG: u8 = 16;

/// `LDI` with bits 23..16 of the negated word address.
pub const R_AVR_HH8_LDI_PM_NEG: u8 = 17;

/// 22-bit absolute `CALL`/`JMP` target.
pub const R_AVR_CALL: u8 = 18;

// ---------------------------------------------------------------------------
// AvrBackend
// ---------------------------------------------------------------------------

/// Relocation back-end for 8-bit AVR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvrBackend;

impl AvrBackend {
    /// Factor between firmware function addresses (words) and byte addresses.
    pub const CODE_SCALE: u32 = 2;
}

/// Branch offset in words from the instruction after `place`.
fn pcrel_words(place: u32, value: u32) -> u32 {
    value.wrapping_sub(place.wrapping_add(2)) >> 1
}

/// Target byte address of a branch at `place` with a `bits`-wide word offset.
#[expect(clippy::cast_possible_wrap, reason = "offset is sign-extended on purpose")]
#[expect(clippy::cast_sign_loss, reason = "two's complement arithmetic")]
fn pcrel_target(place: u32, raw: u32, bits: u32) -> u32 {
    let shift = 32 - bits;
    let words = ((raw << shift) as i32) >> shift;
    place.wrapping_add(2).wrapping_add((words << 1) as u32)
}

/// The byte an `LDI`-family type loads from `value`.
fn ldi_byte(r_type: u8, value: u32) -> Option<u32> {
    let neg = value.wrapping_neg();
    let v = match r_type {
        R_AVR_LO8_LDI => value,
        R_AVR_HI8_LDI => value >> 8,
        R_AVR_HH8_LDI => value >> 16,
        R_AVR_LO8_LDI_NEG => neg,
        R_AVR_HI8_LDI_NEG => neg >> 8,
        R_AVR_HH8_LDI_NEG => neg >> 16,
        R_AVR_LO8_LDI_PM => value >> 1,
        R_AVR_HI8_LDI_PM => value >> 9,
        R_AVR_HH8_LDI_PM => value >> 17,
        R_AVR_LO8_LDI_PM_NEG => neg >> 1,
        R_AVR_HI8_LDI_PM_NEG => neg >> 9,
        R_AVR_HH8_LDI_PM_NEG => neg >> 17,
        _ => return None,
    };
    Some(v & 0xff)
}

fn write_u16(b: &mut [u8], v: u32) {
    b[..2].copy_from_slice(&v.to_le_bytes()[..2]);
}

fn read_u16(b: &[u8]) -> u32 {
    u32::from(u16::from_le_bytes([b[0], b[1]]))
}

impl RelocationBackend for AvrBackend {
    const MACHINE: u16 = EM_AVR;

    #[expect(clippy::cast_possible_truncation, reason = "fields are masked to width")]
    fn apply(
        &self,
        segment: &mut [u8],
        rela: &Elf32Rela,
        place: u32,
        value: u32,
    ) -> Result<(), PatchError> {
        let offset = rela.r_offset;
        match rela.r_type {
            R_AVR_7_PCREL => {
                let off = pcrel_words(place, value);
                let b = field_mut(segment, offset, 2)?;
                b[0] = (b[0] & 0x07) | ((off << 3) as u8 & 0xf8);
                b[1] = (b[1] & 0xfc) | ((off >> 5) as u8 & 0x03);
            }
            R_AVR_13_PCREL => {
                let off = pcrel_words(place, value);
                let b = field_mut(segment, offset, 2)?;
                b[0] = off as u8;
                b[1] = (b[1] & 0xf0) | ((off >> 8) as u8 & 0x0f);
            }
            R_AVR_16 => write_u16(field_mut(segment, offset, 2)?, value),
            R_AVR_16_PM => write_u16(field_mut(segment, offset, 2)?, value >> 1),
            R_AVR_CALL => {
                let words = value >> 1;
                let b = field_mut(segment, offset, 4)?;
                let first = read_u16(b);
                let first = (first & !0x01f1) | ((words >> 16) & 0x01) | (((words >> 17) & 0x1f) << 4);
                write_u16(&mut b[..2], first);
                write_u16(&mut b[2..], words);
            }
            r_type => {
                let v = ldi_byte(r_type, value).ok_or(PatchError::UnknownReloc(r_type))?;
                let b = field_mut(segment, offset, 2)?;
                b[0] = (b[0] & 0xf0) | (v as u8 & 0x0f);
                b[1] = (b[1] & 0xf0) | ((v >> 4) as u8 & 0x0f);
            }
        }
        Ok(())
    }

    fn decode(
        &self,
        segment: &[u8],
        r_type: u8,
        offset: u32,
        place: u32,
    ) -> Result<u32, PatchError> {
        let value = match r_type {
            R_AVR_7_PCREL => {
                let b = field(segment, offset, 2)?;
                let raw = u32::from((b[0] >> 3) & 0x1f) | (u32::from(b[1] & 0x03) << 5);
                pcrel_target(place, raw, 7)
            }
            R_AVR_13_PCREL => {
                let b = field(segment, offset, 2)?;
                let raw = u32::from(b[0]) | (u32::from(b[1] & 0x0f) << 8);
                pcrel_target(place, raw, 12)
            }
            R_AVR_16 => read_u16(field(segment, offset, 2)?),
            R_AVR_16_PM => read_u16(field(segment, offset, 2)?) << 1,
            R_AVR_CALL => {
                let b = field(segment, offset, 4)?;
                let first = read_u16(b);
                let words = ((first & 0x01) << 16) | (((first >> 4) & 0x1f) << 17) | read_u16(&b[2..]);
                words << 1
            }
            r_type => {
                if ldi_byte(r_type, 0).is_none() {
                    return Err(PatchError::UnknownReloc(r_type));
                }
                let b = field(segment, offset, 2)?;
                u32::from(b[0] & 0x0f) | (u32::from(b[1] & 0x0f) << 4)
            }
        };
        Ok(value)
    }

    /// Data words carry their addend in place; instruction fields never do.
    #[expect(clippy::cast_possible_wrap, reason = "16-bit value fits in i32")]
    fn implicit_addend(&self, segment: &[u8], rela: &Elf32Rela) -> Result<i32, PatchError> {
        let addend = match rela.r_type {
            R_AVR_16 => read_u16(field(segment, rela.r_offset, 2)?),
            R_AVR_16_PM => read_u16(field(segment, rela.r_offset, 2)?) << 1,
            _ => 0,
        };
        Ok(addend as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rela(r_offset: u32, r_type: u8) -> Elf32Rela {
        Elf32Rela {
            r_offset,
            r_sym: 1,
            r_type,
            r_addend: 0,
        }
    }

    /// Patch a copy of `code` and return it.
    fn patch(code: &[u8], r_type: u8, place: u32, value: u32) -> Vec<u8> {
        let mut seg = code.to_vec();
        AvrBackend
            .apply(&mut seg, &rela(0, r_type), place, value)
            .expect("supported relocation");
        seg
    }

    // `ldi r16, 0x00` encodes as 0xe000.
    const LDI: [u8; 2] = [0x00, 0xe0];

    #[test]
    fn ldi_bytes() {
        assert_eq!(patch(&LDI, R_AVR_LO8_LDI, 0, 0x1234), [0x04, 0xe3]);
        assert_eq!(patch(&LDI, R_AVR_HI8_LDI, 0, 0x1234), [0x02, 0xe1]);
        assert_eq!(patch(&LDI, R_AVR_HH8_LDI, 0, 0x0012_3456), [0x02, 0xe1]);
    }

    #[test]
    fn ldi_negated() {
        // -1 == 0xffff_ffff
        assert_eq!(patch(&LDI, R_AVR_LO8_LDI_NEG, 0, 1), [0x0f, 0xef]);
        // -0x0100 == 0xffff_ff00
        assert_eq!(patch(&LDI, R_AVR_LO8_LDI_NEG, 0, 0x100), [0x00, 0xe0]);
        assert_eq!(patch(&LDI, R_AVR_HI8_LDI_NEG, 0, 0x100), [0x0f, 0xef]);
        assert_eq!(patch(&LDI, R_AVR_HH8_LDI_NEG, 0, 0x0001_0000), [0x0f, 0xef]);
    }

    #[test]
    fn ldi_program_memory() {
        // Byte address 0x0468 is word address 0x0234.
        assert_eq!(patch(&LDI, R_AVR_LO8_LDI_PM, 0, 0x0468), [0x04, 0xe3]);
        assert_eq!(patch(&LDI, R_AVR_HI8_LDI_PM, 0, 0x0468), [0x02, 0xe0]);
        assert_eq!(patch(&LDI, R_AVR_HH8_LDI_PM, 0, 0x0006_0000), [0x03, 0xe0]);
        // -(0x0468 >> 1) low byte: (-0x468 >> 1) & 0xff == 0xcc
        assert_eq!(patch(&LDI, R_AVR_LO8_LDI_PM_NEG, 0, 0x0468), [0x0c, 0xec]);
        assert_eq!(patch(&LDI, R_AVR_HI8_LDI_PM_NEG, 0, 0x0468), [0x0d, 0xef]);
        assert_eq!(patch(&LDI, R_AVR_HH8_LDI_PM_NEG, 0, 0x0468), [0x0f, 0xef]);
    }

    #[test]
    fn ldi_keeps_register_bits() {
        // `ldi r31, 0xff` is 0xefff; the register nibble (0xf0 of byte 0) stays.
        assert_eq!(patch(&[0xff, 0xef], R_AVR_LO8_LDI, 0, 0x00), [0xf0, 0xe0]);
    }

    #[test]
    fn absolute_words() {
        assert_eq!(patch(&[0, 0], R_AVR_16, 0, 0xbeef), [0xef, 0xbe]);
        assert_eq!(patch(&[0, 0], R_AVR_16_PM, 0, 0x1000), [0x00, 0x08]);
        let seg = patch(&[0, 0], R_AVR_16_PM, 0, 0x1000);
        assert_eq!(AvrBackend.decode(&seg, R_AVR_16_PM, 0, 0), Ok(0x1000));
    }

    #[test]
    fn call_target() {
        // `call 0` is 0x940e 0x0000.
        let call = [0x0e, 0x94, 0x00, 0x00];
        assert_eq!(patch(&call, R_AVR_CALL, 0, 0x0001_2344), [0x0e, 0x94, 0xa2, 0x91]);
        assert_eq!(patch(&call, R_AVR_CALL, 0, 0x0003_0000), [0x0f, 0x94, 0x00, 0x80]);
        assert_eq!(patch(&call, R_AVR_CALL, 0, 0x007f_fffe), [0xff, 0x95, 0xff, 0xff]);
    }

    #[test]
    fn call_decodes_to_byte_address() {
        let call = [0x0e, 0x94, 0x00, 0x00];
        for target in [0x0000_0400, 0x0001_2344, 0x0003_0000, 0x007f_fffe] {
            let seg = patch(&call, R_AVR_CALL, 0, target);
            assert_eq!(AvrBackend.decode(&seg, R_AVR_CALL, 0, 0), Ok(target));
        }
    }

    #[test]
    fn relative_jump() {
        // `rjmp .+0` is 0xc000.
        let rjmp = [0x00, 0xc0];
        let seg = patch(&rjmp, R_AVR_13_PCREL, 0x100, 0x80);
        assert_eq!(seg, [0xbf, 0xcf]);
        assert_eq!(AvrBackend.decode(&seg, R_AVR_13_PCREL, 0, 0x100), Ok(0x80));

        let seg = patch(&rjmp, R_AVR_13_PCREL, 0x100, 0x200);
        assert_eq!(AvrBackend.decode(&seg, R_AVR_13_PCREL, 0, 0x100), Ok(0x200));
    }

    #[test]
    fn conditional_branch() {
        // `brne .+0` is 0xf401.
        let brne = [0x01, 0xf4];
        let forward = patch(&brne, R_AVR_7_PCREL, 0x10, 0x20);
        assert_eq!(forward, [0x39, 0xf4]);
        assert_eq!(AvrBackend.decode(&forward, R_AVR_7_PCREL, 0, 0x10), Ok(0x20));

        let backward = patch(&brne, R_AVR_7_PCREL, 0x10, 0x00);
        assert_eq!(backward, [0xb9, 0xf7]);
        assert_eq!(AvrBackend.decode(&backward, R_AVR_7_PCREL, 0, 0x10), Ok(0x00));
    }

    #[test]
    fn ldi_decodes_stored_byte() {
        let seg = patch(&LDI, R_AVR_HI8_LDI, 0, 0xabcd);
        assert_eq!(AvrBackend.decode(&seg, R_AVR_HI8_LDI, 0, 0), Ok(0xab));
    }

    #[test]
    fn every_supported_type_decodes_what_it_patched() {
        const PLACE: u32 = 0x0100;
        let brne: &[u8] = &[0x01, 0xf4];
        let rjmp: &[u8] = &[0x00, 0xc0];
        let word: &[u8] = &[0x00, 0x00];
        let call: &[u8] = &[0x0e, 0x94, 0x00, 0x00];

        // (type, instruction, symbol value, addend, decoded field)
        // 0x0012_3456 negated is 0xffed_cbaa; as words, 0x0009_1a2b and 0x7ff6_e5d5.
        let cases: [(u8, &[u8], u32, i32, u32); 17] = [
            (R_AVR_7_PCREL, brne, 0x0120, 0x10, 0x0130),
            (R_AVR_13_PCREL, rjmp, 0x0460, 0x24, 0x0484),
            (R_AVR_16, word, 0x0488, -4, 0x0484),
            (R_AVR_16_PM, word, 0x0460, 0x24, 0x0484),
            (R_AVR_LO8_LDI, &LDI, 0x0012_3400, 0x56, 0x56),
            (R_AVR_HI8_LDI, &LDI, 0x0012_3400, 0x56, 0x34),
            (R_AVR_HH8_LDI, &LDI, 0x0012_3400, 0x56, 0x12),
            (R_AVR_LO8_LDI_NEG, &LDI, 0x0012_3400, 0x56, 0xaa),
            (R_AVR_HI8_LDI_NEG, &LDI, 0x0012_3400, 0x56, 0xcb),
            (R_AVR_HH8_LDI_NEG, &LDI, 0x0012_3400, 0x56, 0xed),
            (R_AVR_LO8_LDI_PM, &LDI, 0x0012_3400, 0x56, 0x2b),
            (R_AVR_HI8_LDI_PM, &LDI, 0x0012_3400, 0x56, 0x1a),
            (R_AVR_HH8_LDI_PM, &LDI, 0x0012_3400, 0x56, 0x09),
            (R_AVR_LO8_LDI_PM_NEG, &LDI, 0x0012_3400, 0x56, 0xd5),
            (R_AVR_HI8_LDI_PM_NEG, &LDI, 0x0012_3400, 0x56, 0xe5),
            (R_AVR_HH8_LDI_PM_NEG, &LDI, 0x0012_3400, 0x56, 0xf6),
            (R_AVR_CALL, call, 0x0001_2300, 0x44, 0x0001_2344),
        ];

        for (r_type, code, base, addend, expected) in cases {
            let seg = patch(code, r_type, PLACE, base.wrapping_add_signed(addend));
            assert_eq!(
                AvrBackend.decode(&seg, r_type, 0, PLACE),
                Ok(expected),
                "type {r_type}"
            );
        }

        let covered: Vec<u8> = cases.iter().map(|case| case.0).collect();
        assert_eq!(covered, (R_AVR_7_PCREL..=R_AVR_CALL).collect::<Vec<_>>());
    }

    #[test]
    fn only_the_field_changes() {
        let mut seg = [0xaa; 8];
        AvrBackend
            .apply(&mut seg, &rela(2, R_AVR_16), 0, 0x1234)
            .unwrap();
        assert_eq!(seg, [0xaa, 0xaa, 0x34, 0x12, 0xaa, 0xaa, 0xaa, 0xaa]);
    }

    #[test]
    fn unsupported_types() {
        let mut seg = [0u8; 4];
        for ty in [R_AVR_NONE, R_AVR_32, 19, 0xff] {
            assert_eq!(
                AvrBackend.apply(&mut seg, &rela(0, ty), 0, 0),
                Err(PatchError::UnknownReloc(ty))
            );
            assert_eq!(
                AvrBackend.decode(&seg, ty, 0, 0),
                Err(PatchError::UnknownReloc(ty))
            );
        }
    }

    #[test]
    fn field_outside_segment() {
        let mut seg = [0u8; 4];
        assert_eq!(
            AvrBackend.apply(&mut seg, &rela(3, R_AVR_16), 0, 0),
            Err(PatchError::OutOfBounds { offset: 3 })
        );
        assert_eq!(
            AvrBackend.apply(&mut seg, &rela(2, R_AVR_CALL), 0, 0),
            Err(PatchError::OutOfBounds { offset: 2 })
        );
    }

    #[test]
    fn implicit_addends() {
        let seg = [0x10, 0x00, 0x34, 0x12];
        assert_eq!(AvrBackend.implicit_addend(&seg, &rela(0, R_AVR_16)), Ok(0x10));
        assert_eq!(AvrBackend.implicit_addend(&seg, &rela(2, R_AVR_16_PM)), Ok(0x2468));
        assert_eq!(AvrBackend.implicit_addend(&seg, &rela(0, R_AVR_LO8_LDI)), Ok(0));
    }
}
