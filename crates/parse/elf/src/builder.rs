//! Synthesises ELF32 relocatable objects.
//!
//! Toolchains for small targets are rarely available on the build host, so
//! tests across the workspace describe the object they need with an
//! [`ObjectBuilder`] and load the bytes it produces.
//!
//! Layout of the output: file header, section contents, relocation tables,
//! symbol table, string tables, section header table. Section order is
//! `NULL`, `.text`, `.data`, `.rodata`, `.bss`, extra sections, relocation
//! tables, `.symtab`, `.strtab`, `.shstrtab`; absent sections are left out.

use alloc::string::String;
use alloc::vec::Vec;

use crate::header::{ELF_IDENT_PREFIX, ELF32_EHDR_SIZE, ELF32_SHDR_SIZE, EM_AVR, ET_REL};
use crate::reloc::RelocFormat;
use crate::section::{
    SHN_ABS, SHN_UNDEF, SHT_NOBITS, SHT_PROGBITS, SHT_REL, SHT_RELA, SHT_STRTAB,
    SHT_SYMTAB, STB_GLOBAL, STB_LOCAL, STT_FUNC, STT_NOTYPE, STT_OBJECT, STT_SECTION,
};

/// Where a synthesised symbol is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolSection {
    /// Not defined in the object (`SHN_UNDEF`).
    Undefined,
    /// Defined in `.text`.
    Text,
    /// Defined in `.data`.
    Data,
    /// Defined in `.bss`.
    Bss,
    /// Defined in `.rodata`.
    Rodata,
    /// An absolute value (`SHN_ABS`).
    Absolute,
    /// A raw section header index.
    Index(u16),
}

#[derive(Debug, Clone)]
struct SymbolEntry {
    name: Option<String>,
    section: SymbolSection,
    value: u32,
}

#[derive(Debug, Clone, Copy)]
struct RelocEntry {
    offset: u32,
    sym: u32,
    r_type: u8,
    addend: i32,
}

#[derive(Debug, Clone)]
struct ExtraSection {
    name: String,
    sh_type: u32,
    contents: Vec<u8>,
}

/// Builder for an ELF32 `ET_REL` object.
#[derive(Debug, Clone)]
pub struct ObjectBuilder {
    machine: u16,
    text: Vec<u8>,
    data: Vec<u8>,
    rodata: Vec<u8>,
    bss: u32,
    symbols: Vec<SymbolEntry>,
    text_relocs: Vec<RelocEntry>,
    data_relocs: Vec<RelocEntry>,
    rodata_relocs: Vec<RelocEntry>,
    format: RelocFormat,
    symtab_name: String,
    emit_symtab: bool,
    emit_strtab: bool,
    extra: Vec<ExtraSection>,
}

impl Default for ObjectBuilder {
    fn default() -> Self {
        Self::new(EM_AVR)
    }
}

impl ObjectBuilder {
    /// Starts an empty object for `machine`.
    #[must_use]
    pub fn new(machine: u16) -> Self {
        Self {
            machine,
            text: Vec::new(),
            data: Vec::new(),
            rodata: Vec::new(),
            bss: 0,
            // Index 0 is the reserved null symbol.
            symbols: alloc::vec![SymbolEntry {
                name: None,
                section: SymbolSection::Undefined,
                value: 0,
            }],
            text_relocs: Vec::new(),
            data_relocs: Vec::new(),
            rodata_relocs: Vec::new(),
            format: RelocFormat::Rela,
            symtab_name: String::from(".symtab"),
            emit_symtab: true,
            emit_strtab: true,
            extra: Vec::new(),
        }
    }

    /// Sets the `.text` contents.
    #[must_use]
    pub fn text(mut self, bytes: &[u8]) -> Self {
        self.text = bytes.to_vec();
        self
    }

    /// Sets the `.data` contents.
    #[must_use]
    pub fn data(mut self, bytes: &[u8]) -> Self {
        self.data = bytes.to_vec();
        self
    }

    /// Sets the `.rodata` contents.
    #[must_use]
    pub fn rodata(mut self, bytes: &[u8]) -> Self {
        self.rodata = bytes.to_vec();
        self
    }

    /// Sets the size of `.bss`.
    #[must_use]
    pub fn bss(mut self, size: u32) -> Self {
        self.bss = size;
        self
    }

    /// Writes relocation tables as `SHT_REL`; addends are left to the
    /// section contents.
    #[must_use]
    pub fn use_rel(mut self) -> Self {
        self.format = RelocFormat::Rel;
        self
    }

    /// Leaves the symbol table out.
    #[must_use]
    pub fn omit_symtab(mut self) -> Self {
        self.emit_symtab = false;
        self
    }

    /// Leaves the symbol string table out.
    #[must_use]
    pub fn omit_strtab(mut self) -> Self {
        self.emit_strtab = false;
        self
    }

    /// Names the symbol table section something other than `.symtab`.
    #[must_use]
    pub fn with_symtab_name(mut self, name: &str) -> Self {
        self.symtab_name = String::from(name);
        self
    }

    /// Adds a section the loader does not know about.
    #[must_use]
    pub fn extra_section(mut self, name: &str, sh_type: u32, contents: &[u8]) -> Self {
        self.extra.push(ExtraSection {
            name: String::from(name),
            sh_type,
            contents: contents.to_vec(),
        });
        self
    }

    /// Adds a named global symbol and returns its symbol table index.
    #[expect(clippy::cast_possible_truncation, reason = "test objects are small")]
    pub fn symbol(&mut self, name: &str, section: SymbolSection, value: u32) -> u32 {
        self.symbols.push(SymbolEntry {
            name: Some(String::from(name)),
            section,
            value,
        });
        (self.symbols.len() - 1) as u32
    }

    /// Adds an anonymous section symbol and returns its index.
    #[expect(clippy::cast_possible_truncation, reason = "test objects are small")]
    pub fn section_symbol(&mut self, section: SymbolSection) -> u32 {
        self.symbols.push(SymbolEntry {
            name: None,
            section,
            value: 0,
        });
        (self.symbols.len() - 1) as u32
    }

    /// Adds a relocation against `.text`.
    pub fn text_reloc(&mut self, offset: u32, sym: u32, r_type: u8, addend: i32) {
        self.text_relocs.push(RelocEntry {
            offset,
            sym,
            r_type,
            addend,
        });
    }

    /// Adds a relocation against `.data`.
    pub fn data_reloc(&mut self, offset: u32, sym: u32, r_type: u8, addend: i32) {
        self.data_relocs.push(RelocEntry {
            offset,
            sym,
            r_type,
            addend,
        });
    }

    /// Adds a relocation against `.rodata`.
    pub fn rodata_reloc(&mut self, offset: u32, sym: u32, r_type: u8, addend: i32) {
        self.rodata_relocs.push(RelocEntry {
            offset,
            sym,
            r_type,
            addend,
        });
    }

    /// Serialises the object.
    #[must_use]
    #[expect(clippy::cast_possible_truncation, reason = "test objects are small")]
    #[expect(clippy::too_many_lines, reason = "linear layout of one file")]
    pub fn build(&self) -> Vec<u8> {
        let mut out = alloc::vec![0u8; ELF32_EHDR_SIZE];
        let mut shstrtab = Strings::new();
        let mut headers: Vec<RawSection> = alloc::vec![RawSection::default()];

        let place = |out: &mut Vec<u8>,
                         headers: &mut Vec<RawSection>,
                         shstrtab: &mut Strings,
                         name: &str,
                         sh_type: u32,
                         sh_flags: u32,
                         contents: &[u8]|
         -> u16 {
            let offset = out.len() as u32;
            out.extend_from_slice(contents);
            headers.push(RawSection {
                name: shstrtab.add(name),
                sh_type,
                sh_flags,
                offset,
                size: contents.len() as u32,
                link: 0,
            });
            (headers.len() - 1) as u16
        };

        let text = (!self.text.is_empty()).then(|| {
            place(&mut out, &mut headers, &mut shstrtab, ".text", SHT_PROGBITS, 0x6, &self.text)
        });
        let data = (!self.data.is_empty()).then(|| {
            place(&mut out, &mut headers, &mut shstrtab, ".data", SHT_PROGBITS, 0x3, &self.data)
        });
        let rodata = (!self.rodata.is_empty()).then(|| {
            place(&mut out, &mut headers, &mut shstrtab, ".rodata", SHT_PROGBITS, 0x2, &self.rodata)
        });
        let bss = (self.bss > 0).then(|| {
            headers.push(RawSection {
                name: shstrtab.add(".bss"),
                sh_type: SHT_NOBITS,
                sh_flags: 0x3,
                offset: out.len() as u32,
                size: self.bss,
                link: 0,
            });
            (headers.len() - 1) as u16
        });
        for extra in &self.extra {
            place(&mut out, &mut headers, &mut shstrtab, &extra.name, extra.sh_type, 0, &extra.contents);
        }

        let (prefix, sh_type) = match self.format {
            RelocFormat::Rela => (".rela", SHT_RELA),
            RelocFormat::Rel => (".rel", SHT_REL),
        };
        for (target, relocs) in [
            (".text", &self.text_relocs),
            (".data", &self.data_relocs),
            (".rodata", &self.rodata_relocs),
        ] {
            if relocs.is_empty() {
                continue;
            }
            let mut table = Vec::new();
            for r in relocs {
                table.extend_from_slice(&r.offset.to_le_bytes());
                table.extend_from_slice(&((r.sym << 8) | u32::from(r.r_type)).to_le_bytes());
                if self.format == RelocFormat::Rela {
                    table.extend_from_slice(&r.addend.to_le_bytes());
                }
            }
            let name = alloc::format!("{prefix}{target}");
            place(&mut out, &mut headers, &mut shstrtab, &name, sh_type, 0, &table);
        }

        let index_of = |section: SymbolSection| match section {
            SymbolSection::Undefined => SHN_UNDEF,
            SymbolSection::Absolute => SHN_ABS,
            SymbolSection::Text => text.unwrap_or(SHN_UNDEF),
            SymbolSection::Data => data.unwrap_or(SHN_UNDEF),
            SymbolSection::Rodata => rodata.unwrap_or(SHN_UNDEF),
            SymbolSection::Bss => bss.unwrap_or(SHN_UNDEF),
            SymbolSection::Index(index) => index,
        };

        let mut strtab = Strings::new();
        let mut symtab = Vec::new();
        for (i, sym) in self.symbols.iter().enumerate() {
            let name = sym.name.as_deref().map_or(0, |n| strtab.add(n));
            let info = if i == 0 {
                0
            } else if sym.name.is_none() {
                (STB_LOCAL << 4) | STT_SECTION
            } else {
                let kind = match sym.section {
                    SymbolSection::Text => STT_FUNC,
                    SymbolSection::Undefined | SymbolSection::Absolute => STT_NOTYPE,
                    _ => STT_OBJECT,
                };
                (STB_GLOBAL << 4) | kind
            };
            let shndx = if i == 0 { SHN_UNDEF } else { index_of(sym.section) };
            symtab.extend_from_slice(&name.to_le_bytes());
            symtab.extend_from_slice(&sym.value.to_le_bytes());
            symtab.extend_from_slice(&0u32.to_le_bytes());
            symtab.push(info);
            symtab.push(0);
            symtab.extend_from_slice(&shndx.to_le_bytes());
        }

        let symtab_index = self.emit_symtab.then(|| {
            place(&mut out, &mut headers, &mut shstrtab, &self.symtab_name, SHT_SYMTAB, 0, &symtab)
        });
        let strtab_index = self.emit_strtab.then(|| {
            place(&mut out, &mut headers, &mut shstrtab, ".strtab", SHT_STRTAB, 0, &strtab.bytes)
        });
        if let (Some(sym), Some(str)) = (symtab_index, strtab_index) {
            headers[usize::from(sym)].link = u32::from(str);
        }

        let shstrtab_name = shstrtab.add(".shstrtab");
        headers.push(RawSection {
            name: shstrtab_name,
            sh_type: SHT_STRTAB,
            sh_flags: 0,
            offset: out.len() as u32,
            size: shstrtab.bytes.len() as u32,
            link: 0,
        });
        out.extend_from_slice(&shstrtab.bytes);
        let shstrndx = (headers.len() - 1) as u16;

        let shoff = out.len() as u32;
        for h in &headers {
            h.write(&mut out);
        }

        out[..ELF_IDENT_PREFIX.len()].copy_from_slice(&ELF_IDENT_PREFIX);
        out[16..18].copy_from_slice(&ET_REL.to_le_bytes());
        out[18..20].copy_from_slice(&self.machine.to_le_bytes());
        out[20..24].copy_from_slice(&1u32.to_le_bytes());
        out[32..36].copy_from_slice(&shoff.to_le_bytes());
        out[40..42].copy_from_slice(&(ELF32_EHDR_SIZE as u16).to_le_bytes());
        out[46..48].copy_from_slice(&(ELF32_SHDR_SIZE as u16).to_le_bytes());
        out[48..50].copy_from_slice(&(headers.len() as u16).to_le_bytes());
        out[50..52].copy_from_slice(&shstrndx.to_le_bytes());
        out
    }
}

/// A string table under construction; offset 0 is the empty string.
struct Strings {
    bytes: Vec<u8>,
}

impl Strings {
    fn new() -> Self {
        Self {
            bytes: alloc::vec![0],
        }
    }

    #[expect(clippy::cast_possible_truncation, reason = "test objects are small")]
    fn add(&mut self, s: &str) -> u32 {
        let offset = self.bytes.len() as u32;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        offset
    }
}

#[derive(Default)]
struct RawSection {
    name: u32,
    sh_type: u32,
    sh_flags: u32,
    offset: u32,
    size: u32,
    link: u32,
}

impl RawSection {
    fn write(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + ELF32_SHDR_SIZE, 0);
        let b = &mut out[start..];
        b[0..4].copy_from_slice(&self.name.to_le_bytes());
        b[4..8].copy_from_slice(&self.sh_type.to_le_bytes());
        b[8..12].copy_from_slice(&self.sh_flags.to_le_bytes());
        b[16..20].copy_from_slice(&self.offset.to_le_bytes());
        b[20..24].copy_from_slice(&self.size.to_le_bytes());
        b[24..28].copy_from_slice(&self.link.to_le_bytes());
    }
}
