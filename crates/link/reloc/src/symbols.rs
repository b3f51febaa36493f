//! Lookups in a module's own symbol table.

use kiln_elf::{ByteSource, ObjectMetadata, SymbolName};

use crate::error::RelocError;
use crate::relocator::{SegmentBases, read_symbol};

/// A module's symbol table, with its segments placed at known bases.
#[derive(Debug, Clone, Copy)]
pub struct ModuleSymbols<'a> {
    meta: &'a ObjectMetadata,
    bases: SegmentBases,
}

impl<'a> ModuleSymbols<'a> {
    /// Creates a view over the symbols of the module described by `meta`.
    #[must_use]
    pub fn new(meta: &'a ObjectMetadata, bases: SegmentBases) -> Self {
        Self { meta, bases }
    }

    /// Finds the symbol `name` defined in one of the module's segments and
    /// returns its absolute address.
    ///
    /// Undefined symbols and symbols in unloaded sections are skipped, so
    /// a module that merely references `name` does not match.
    ///
    /// # Errors
    ///
    /// Returns [`RelocError::Elf`] if the symbol or string table cannot be
    /// read.
    #[expect(clippy::cast_possible_truncation, reason = "symbol_count fits the u32 index space")]
    pub fn find<S: ByteSource + ?Sized>(
        &self,
        source: &mut S,
        file_offset: u64,
        name: &[u8],
    ) -> Result<Option<u32>, RelocError> {
        let names = file_offset + u64::from(self.meta.strtab.offset);
        for index in 1..self.meta.symbol_count() as u32 {
            let sym = read_symbol(source, file_offset, self.meta, index)?;
            if sym.is_anonymous() {
                continue;
            }
            let Some(base) = self
                .meta
                .segment_of(sym.st_shndx)
                .and_then(|kind| self.bases.of(kind))
            else {
                continue;
            };
            let candidate = SymbolName::read(source, names + u64::from(sym.st_name))?;
            if candidate.as_bytes() == name {
                return Ok(Some(base.wrapping_add(sym.st_value)));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use kiln_elf::builder::{ObjectBuilder, SymbolSection};
    use kiln_elf::parse;

    use super::*;

    const BASES: SegmentBases = SegmentBases {
        text: 0x4000,
        rodata: None,
        data: Some(0x0310),
        bss: Some(0x0300),
    };

    fn find(obj: &[u8], name: &str) -> Option<u32> {
        let mut src = obj;
        let meta = parse(&mut src, 0).expect("test object parses");
        ModuleSymbols::new(&meta, BASES)
            .find(&mut src, 0, name.as_bytes())
            .expect("symbol table readable")
    }

    #[test]
    fn finds_defined_symbols() {
        let mut b = ObjectBuilder::default().text(&[0; 16]).data(&[0; 4]).bss(16);
        b.symbol("_init", SymbolSection::Text, 0);
        b.symbol("_fini", SymbolSection::Text, 8);
        b.symbol("autostart_processes", SymbolSection::Data, 2);
        let obj = b.build();

        assert_eq!(find(&obj, "_init"), Some(0x4000));
        assert_eq!(find(&obj, "_fini"), Some(0x4008));
        assert_eq!(find(&obj, "autostart_processes"), Some(0x0312));
    }

    #[test]
    fn skips_references_and_missing() {
        let mut b = ObjectBuilder::default().text(&[0; 2]);
        b.symbol("_init", SymbolSection::Undefined, 0);
        b.section_symbol(SymbolSection::Text);
        let obj = b.build();

        assert_eq!(find(&obj, "_init"), None);
        assert_eq!(find(&obj, "process_load"), None);
    }

    #[test]
    fn exact_match_only() {
        let mut b = ObjectBuilder::default().text(&[0; 2]);
        b.symbol("_init_hw", SymbolSection::Text, 0);
        let obj = b.build();
        assert_eq!(find(&obj, "_init"), None);
    }
}
