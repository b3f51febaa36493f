//! Symbol resolution and segment patching.

use kiln_elf::{
    ByteSource, ELF32_SYM_SIZE, Elf32Symbol, ObjectMetadata, RelocFormat, RelocTable,
    SegmentKind, SymbolName,
};
use kiln_symtab::SymbolTable;
use log::debug;

use crate::backend::RelocationBackend;
use crate::error::RelocError;
use crate::symbols::ModuleSymbols;

/// Target addresses at which a module's segments are placed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentBases {
    /// Base of `.text`.
    pub text: u32,
    /// Base of `.rodata`, if the module has one.
    pub rodata: Option<u32>,
    /// Base of `.data`, if the module has one.
    pub data: Option<u32>,
    /// Base of `.bss`, if the module has one.
    pub bss: Option<u32>,
}

impl SegmentBases {
    /// Returns the base address of segment `kind`.
    #[must_use]
    pub fn of(&self, kind: SegmentKind) -> Option<u32> {
        match kind {
            SegmentKind::Text => Some(self.text),
            SegmentKind::Rodata => self.rodata,
            SegmentKind::Data => self.data,
            SegmentKind::Bss => self.bss,
        }
    }
}

/// Links one module's segments against itself and the firmware.
pub struct Relocator<'a, B> {
    meta: &'a ObjectMetadata,
    symbols: &'a SymbolTable<'a>,
    backend: &'a B,
    bases: SegmentBases,
}

impl<'a, B: RelocationBackend> Relocator<'a, B> {
    /// Creates a relocator for the module described by `meta`, placed at
    /// `bases`.
    #[must_use]
    pub fn new(
        meta: &'a ObjectMetadata,
        symbols: &'a SymbolTable<'a>,
        backend: &'a B,
        bases: SegmentBases,
    ) -> Self {
        Self {
            meta,
            symbols,
            backend,
            bases,
        }
    }

    /// Returns the module's own symbols, as placed.
    #[must_use]
    pub fn module_symbols(&self) -> ModuleSymbols<'a> {
        ModuleSymbols::new(self.meta, self.bases)
    }

    /// Applies every entry of `table` to `segment`, the in-memory copy of a
    /// segment placed at `segment_base`.
    ///
    /// Stops at the first failing entry. Entries already applied stay
    /// applied; only `segment` is written.
    ///
    /// # Errors
    ///
    /// See [`RelocError`].
    pub fn relocate<S: ByteSource + ?Sized>(
        &self,
        source: &mut S,
        file_offset: u64,
        segment: &mut [u8],
        segment_base: u32,
        table: &RelocTable,
    ) -> Result<(), RelocError> {
        for index in 0..table.len() {
            let mut rela = table.read_entry(source, file_offset, index)?;
            if table.format == RelocFormat::Rel {
                rela.r_addend = self.backend.implicit_addend(segment, &rela)?;
            }

            let value = self
                .resolve(source, file_offset, rela.r_sym)?
                .wrapping_add_signed(rela.r_addend);
            let place = segment_base.wrapping_add(rela.r_offset);
            debug!(
                "reloc: type {} at {:#x} sym {} -> {:#x}",
                rela.r_type, place, rela.r_sym, value
            );

            self.backend.apply(segment, &rela, place, value)?;
        }
        Ok(())
    }

    /// Resolves symbol `index` to an absolute target address.
    ///
    /// Anonymous (section) symbols resolve to the base of their segment.
    /// Named symbols must be defined in exactly one of the module and the
    /// firmware.
    fn resolve<S: ByteSource + ?Sized>(
        &self,
        source: &mut S,
        file_offset: u64,
        index: u32,
    ) -> Result<u32, RelocError> {
        let sym = read_symbol(source, file_offset, self.meta, index)?;
        let module_addr = self
            .meta
            .segment_of(sym.st_shndx)
            .and_then(|kind| self.bases.of(kind));

        if sym.is_anonymous() {
            return module_addr.ok_or(RelocError::UnknownSegment);
        }

        let name = SymbolName::read(
            source,
            file_offset + u64::from(self.meta.strtab.offset) + u64::from(sym.st_name),
        )?;
        let firmware_addr = self.symbols.lookup(name.as_bytes());

        match (module_addr, firmware_addr) {
            (Some(base), None) => Ok(base.wrapping_add(sym.st_value)),
            (None, Some(addr)) => Ok(addr),
            (None, None) => Err(RelocError::Undefined(name)),
            (Some(_), Some(_)) => Err(RelocError::MultiplyDefined(name)),
        }
    }
}

/// Reads symbol `index` of the module's symbol table.
pub(crate) fn read_symbol<S: ByteSource + ?Sized>(
    source: &mut S,
    file_offset: u64,
    meta: &ObjectMetadata,
    index: u32,
) -> Result<Elf32Symbol, RelocError> {
    if index as usize >= meta.symbol_count() {
        return Err(RelocError::BadSymbol(index));
    }
    let offset = file_offset
        + u64::from(meta.symtab.offset)
        + u64::from(index) * ELF32_SYM_SIZE as u64;
    Ok(Elf32Symbol::read(source, offset)?)
}

#[cfg(test)]
mod tests {
    use kiln_elf::builder::{ObjectBuilder, SymbolSection};
    use kiln_elf::{SHT_PROGBITS, parse};
    use kiln_symtab::Symbol;

    use super::*;
    use crate::avr::{AvrBackend, R_AVR_16, R_AVR_32, R_AVR_CALL, R_AVR_LO8_LDI};

    const FUNCTIONS: [Symbol; 2] = [Symbol::new("memcpy", 0x0200), Symbol::new("printf", 0x0340)];
    const OBJECTS: [Symbol; 1] = [Symbol::new("sentinel", 0x0120)];

    fn firmware() -> SymbolTable<'static> {
        SymbolTable::new(&FUNCTIONS, &OBJECTS).with_code_scale(AvrBackend::CODE_SCALE)
    }

    const BASES: SegmentBases = SegmentBases {
        text: 0x1000,
        rodata: Some(0x1100),
        data: Some(0x0208),
        bss: Some(0x0200),
    };

    /// Parse `obj` and relocate its text with the test firmware.
    fn relocate_text(obj: &[u8], text: &mut [u8]) -> Result<(), RelocError> {
        let mut src = obj;
        let meta = parse(&mut src, 0).expect("test object parses");
        let symbols = firmware();
        let relocator = Relocator::new(&meta, &symbols, &AvrBackend, BASES);
        let table = meta.relocs(SegmentKind::Text).expect("text relocations");
        relocator.relocate(&mut src, 0, text, BASES.text, &table)
    }

    #[test]
    fn firmware_function_is_scaled() {
        let mut b = ObjectBuilder::default().text(&[0x0e, 0x94, 0x00, 0x00]);
        let printf = b.symbol("printf", SymbolSection::Undefined, 0);
        b.text_reloc(0, printf, R_AVR_CALL, 0);
        let obj = b.build();

        let mut text = [0x0e, 0x94, 0x00, 0x00];
        relocate_text(&obj, &mut text).unwrap();
        assert_eq!(AvrBackend.decode(&text, R_AVR_CALL, 0, BASES.text), Ok(0x0680));
    }

    #[test]
    fn firmware_object_with_addend() {
        let mut b = ObjectBuilder::default().text(&[0; 2]);
        let sentinel = b.symbol("sentinel", SymbolSection::Undefined, 0);
        b.text_reloc(0, sentinel, R_AVR_16, 4);
        let obj = b.build();

        let mut text = [0; 2];
        relocate_text(&obj, &mut text).unwrap();
        assert_eq!(text, 0x0124u16.to_le_bytes());
    }

    #[test]
    fn local_symbol_uses_segment_base() {
        let mut b = ObjectBuilder::default().text(&[0; 4]).data(&[0; 8]).bss(8);
        let counter = b.symbol("counter", SymbolSection::Bss, 6);
        let table = b.symbol("table", SymbolSection::Data, 2);
        b.text_reloc(0, counter, R_AVR_16, 0);
        b.text_reloc(2, table, R_AVR_16, -1);
        let obj = b.build();

        let mut text = [0; 4];
        relocate_text(&obj, &mut text).unwrap();
        assert_eq!(text[..2], 0x0206u16.to_le_bytes());
        assert_eq!(text[2..], 0x0209u16.to_le_bytes());
    }

    #[test]
    fn absolute_symbols_resolve_through_firmware() {
        let mut b = ObjectBuilder::default().text(&[0; 2]);
        let sentinel = b.symbol("sentinel", SymbolSection::Absolute, 0x7777);
        b.text_reloc(0, sentinel, R_AVR_16, 0);
        let obj = b.build();
        let mut text = [0; 2];
        relocate_text(&obj, &mut text).unwrap();
        assert_eq!(text, 0x0120u16.to_le_bytes());

        let mut b = ObjectBuilder::default().text(&[0; 2]);
        let port = b.symbol("PORTB", SymbolSection::Absolute, 0x25);
        b.text_reloc(0, port, R_AVR_16, 0);
        let obj = b.build();
        let err = relocate_text(&obj, &mut text).unwrap_err();
        assert_eq!(err.symbol().map(SymbolName::as_bytes), Some(&b"PORTB"[..]));
    }

    #[test]
    fn section_symbol_resolves_to_base() {
        let mut b = ObjectBuilder::default().text(&[0; 2]).rodata(b"hello\0");
        let rodata = b.section_symbol(SymbolSection::Rodata);
        b.text_reloc(0, rodata, R_AVR_LO8_LDI, 3);
        let obj = b.build();

        let mut text = [0x00, 0xe0];
        relocate_text(&obj, &mut text).unwrap();
        assert_eq!(AvrBackend.decode(&text, R_AVR_LO8_LDI, 0, 0), Ok(0x03));
    }

    #[test]
    fn section_symbol_for_unloaded_section() {
        let mut b = ObjectBuilder::default()
            .text(&[0; 2])
            .extra_section(".init9", SHT_PROGBITS, &[0; 2]);
        // .init9 is section 2 (after .text).
        let sym = b.section_symbol(SymbolSection::Index(2));
        b.text_reloc(0, sym, R_AVR_16, 0);
        let obj = b.build();

        let mut text = [0; 2];
        assert_eq!(relocate_text(&obj, &mut text), Err(RelocError::UnknownSegment));
    }

    #[test]
    fn undefined_symbol_is_reported_by_name() {
        let mut b = ObjectBuilder::default().text(&[0; 2]);
        let sym = b.symbol("does_not_exist", SymbolSection::Undefined, 0);
        b.text_reloc(0, sym, R_AVR_16, 0);
        let obj = b.build();

        let mut text = [0; 2];
        let err = relocate_text(&obj, &mut text).unwrap_err();
        assert_eq!(err, RelocError::Undefined(SymbolName::from("does_not_exist")));
        assert_eq!(text, [0, 0]);
    }

    #[test]
    fn multiply_defined_keeps_earlier_patches() {
        let mut b = ObjectBuilder::default().text(&[0; 4]).data(&[0; 2]);
        let memcpy_ref = b.symbol("memcpy", SymbolSection::Undefined, 0);
        let clash = b.symbol("printf", SymbolSection::Data, 0);
        b.text_reloc(0, memcpy_ref, R_AVR_16, 0);
        b.text_reloc(2, clash, R_AVR_16, 0);
        let obj = b.build();

        let mut text = [0; 4];
        let err = relocate_text(&obj, &mut text).unwrap_err();
        assert_eq!(err, RelocError::MultiplyDefined(SymbolName::from("printf")));
        assert_eq!(err.symbol().and_then(SymbolName::as_str), Some("printf"));
        // The first relocation was applied before the failure.
        assert_eq!(text[..2], 0x0400u16.to_le_bytes());
        assert_eq!(text[2..], [0, 0]);
    }

    #[test]
    fn unsupported_type_and_bad_index() {
        let mut b = ObjectBuilder::default().text(&[0; 4]);
        let sym = b.symbol("memcpy", SymbolSection::Undefined, 0);
        b.text_reloc(0, sym, R_AVR_32, 0);
        let obj = b.build();
        let mut text = [0; 4];
        assert_eq!(relocate_text(&obj, &mut text), Err(RelocError::UnknownReloc(R_AVR_32)));

        let mut b = ObjectBuilder::default().text(&[0; 4]);
        b.text_reloc(0, 7, R_AVR_16, 0);
        let obj = b.build();
        assert_eq!(relocate_text(&obj, &mut text), Err(RelocError::BadSymbol(7)));
    }

    #[test]
    fn target_outside_segment() {
        let mut b = ObjectBuilder::default().text(&[0; 4]);
        let sym = b.symbol("memcpy", SymbolSection::Undefined, 0);
        b.text_reloc(3, sym, R_AVR_16, 0);
        let obj = b.build();
        let mut text = [0; 4];
        assert_eq!(
            relocate_text(&obj, &mut text),
            Err(RelocError::OutOfBounds { offset: 3 })
        );
    }

    #[test]
    fn rel_table_reads_addend_in_place() {
        let mut b = ObjectBuilder::default().text(&[0; 2]).use_rel();
        let sentinel = b.symbol("sentinel", SymbolSection::Undefined, 0);
        b.text_reloc(0, sentinel, R_AVR_16, 0);
        let obj = b.build();

        // Addend 6 stored in the field itself.
        let mut text = [0x06, 0x00];
        relocate_text(&obj, &mut text).unwrap();
        assert_eq!(text, 0x0126u16.to_le_bytes());
    }

    #[test]
    fn bases_by_kind() {
        assert_eq!(BASES.of(SegmentKind::Text), Some(0x1000));
        assert_eq!(BASES.of(SegmentKind::Bss), Some(0x0200));
        assert_eq!(SegmentBases::default().of(SegmentKind::Data), None);
    }

    #[test]
    fn machine_constant() {
        assert_eq!(AvrBackend::MACHINE, kiln_elf::EM_AVR);
    }
}
