//! Object metadata: where the loadable pieces of a relocatable object live.
//!
//! [`parse`] walks the section header table once and records the offsets,
//! sizes and indices of the sections the loader understands. Section names
//! are matched by prefix against a fixed table; anything else is skipped.

use log::{debug, trace};

use crate::header::{Elf32Header, ElfError};
use crate::io::ByteSource;
use crate::name::SymbolName;
use crate::reloc::{RelocFormat, RelocTable};
use crate::section::{Elf32SectionHeader, SHT_STRTAB, SHT_SYMTAB, SectionFlags};

/// The loadable segments of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Executable code.
    Text,
    /// Read-only data, placed alongside the code.
    Rodata,
    /// Initialised, writable data.
    Data,
    /// Zero-initialised data.
    Bss,
}

/// A loadable section recognised by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    /// Index in the section header table; symbols refer to it via `st_shndx`.
    pub index: u16,
    /// Offset of the contents, relative to the start of the object.
    pub offset: u32,
    /// Size in bytes.
    pub size: u32,
    /// Section flags.
    pub flags: SectionFlags,
}

/// A byte range within the object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    /// Offset relative to the start of the object.
    pub offset: u32,
    /// Size in bytes.
    pub size: u32,
}

/// Everything the loader needs to know about an object before allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Target machine from the file header.
    pub machine: u16,
    /// `.text`; always present and non-empty.
    pub text: Section,
    /// `.rodata`, if present.
    pub rodata: Option<Section>,
    /// `.data`, if present.
    pub data: Option<Section>,
    /// `.bss`, if present. Its contents occupy no file space.
    pub bss: Option<Section>,
    /// Relocations against `.text`.
    pub text_relocs: Option<RelocTable>,
    /// Relocations against `.rodata`.
    pub rodata_relocs: Option<RelocTable>,
    /// Relocations against `.data`.
    pub data_relocs: Option<RelocTable>,
    /// The symbol table.
    pub symtab: Span,
    /// The string table holding symbol names.
    pub strtab: Span,
}

impl ObjectMetadata {
    /// Returns the segment defined by section header `index`, if any.
    #[must_use]
    pub fn segment_of(&self, index: u16) -> Option<SegmentKind> {
        let is = |s: Option<Section>| s.is_some_and(|s| s.index == index);
        if is(self.bss) {
            Some(SegmentKind::Bss)
        } else if is(self.data) {
            Some(SegmentKind::Data)
        } else if is(self.rodata) {
            Some(SegmentKind::Rodata)
        } else if self.text.index == index {
            Some(SegmentKind::Text)
        } else {
            None
        }
    }

    /// Returns the section backing `kind`, if the object has one.
    #[must_use]
    pub fn section(&self, kind: SegmentKind) -> Option<Section> {
        match kind {
            SegmentKind::Text => Some(self.text),
            SegmentKind::Rodata => self.rodata,
            SegmentKind::Data => self.data,
            SegmentKind::Bss => self.bss,
        }
    }

    /// Size of segment `kind` in bytes (0 if absent).
    #[must_use]
    pub fn size_of(&self, kind: SegmentKind) -> u32 {
        self.section(kind).map_or(0, |s| s.size)
    }

    /// Returns the relocation table for `kind`, if it has a non-empty one.
    #[must_use]
    pub fn relocs(&self, kind: SegmentKind) -> Option<RelocTable> {
        let table = match kind {
            SegmentKind::Text => self.text_relocs,
            SegmentKind::Rodata => self.rodata_relocs,
            SegmentKind::Data => self.data_relocs,
            SegmentKind::Bss => None,
        };
        table.filter(|t| !t.is_empty())
    }

    /// Number of entries in the symbol table.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.symtab.size as usize / crate::section::ELF32_SYM_SIZE
    }
}

// ---------------------------------------------------------------------------
// Section name dispatch
// ---------------------------------------------------------------------------

/// What a recognised section name maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Segment(SegmentKind),
    Relocs(SegmentKind, RelocFormat),
    Symtab,
    Strtab,
}

/// Section name prefixes, matched in order; the first match wins.
const SECTION_ROLES: [(&[u8], Role); 12] = [
    (b".text", Role::Segment(SegmentKind::Text)),
    (b".rela.text", Role::Relocs(SegmentKind::Text, RelocFormat::Rela)),
    (b".rel.text", Role::Relocs(SegmentKind::Text, RelocFormat::Rel)),
    (b".data", Role::Segment(SegmentKind::Data)),
    (b".rela.data", Role::Relocs(SegmentKind::Data, RelocFormat::Rela)),
    (b".rel.data", Role::Relocs(SegmentKind::Data, RelocFormat::Rel)),
    (b".rodata", Role::Segment(SegmentKind::Rodata)),
    (b".rela.rodata", Role::Relocs(SegmentKind::Rodata, RelocFormat::Rela)),
    (b".rel.rodata", Role::Relocs(SegmentKind::Rodata, RelocFormat::Rel)),
    (b".symtab", Role::Symtab),
    (b".strtab", Role::Strtab),
    (b".bss", Role::Segment(SegmentKind::Bss)),
];

fn role_of(name: &SymbolName) -> Option<Role> {
    SECTION_ROLES
        .iter()
        .find(|(prefix, _)| name.starts_with(prefix))
        .map(|&(_, role)| role)
}

/// Accumulates recognised sections during the header walk.
#[derive(Default)]
struct Scan {
    machine: u16,
    text: Option<Section>,
    rodata: Option<Section>,
    data: Option<Section>,
    bss: Option<Section>,
    text_relocs: Option<RelocTable>,
    rodata_relocs: Option<RelocTable>,
    data_relocs: Option<RelocTable>,
    symtab: Option<Span>,
    strtab: Option<Span>,
    /// First `SHT_SYMTAB` section and its `sh_link`, for objects whose
    /// symbol table is not called `.symtab`.
    typed_symtab: Option<(Span, u32)>,
}

impl Scan {
    fn record(&mut self, index: u16, shdr: &Elf32SectionHeader, name: &SymbolName) {
        if shdr.sh_type == SHT_SYMTAB && self.typed_symtab.is_none() {
            self.typed_symtab = Some((span_of(shdr), shdr.sh_link));
        }

        let Some(role) = role_of(name) else {
            trace!("elf: skipping section {index} '{name}'");
            return;
        };
        debug!(
            "elf: section {index} '{name}' offset={:#x} size={:#x}",
            shdr.sh_offset, shdr.sh_size
        );

        match role {
            Role::Segment(kind) => {
                let section = Some(Section {
                    index,
                    offset: shdr.sh_offset,
                    size: shdr.sh_size,
                    flags: shdr.flags(),
                });
                match kind {
                    SegmentKind::Text => self.text = section,
                    SegmentKind::Rodata => self.rodata = section,
                    SegmentKind::Data => self.data = section,
                    SegmentKind::Bss => self.bss = section,
                }
            }
            Role::Relocs(kind, format) => {
                let table = Some(RelocTable {
                    offset: shdr.sh_offset,
                    size: shdr.sh_size,
                    format,
                });
                match kind {
                    SegmentKind::Text => self.text_relocs = table,
                    SegmentKind::Rodata => self.rodata_relocs = table,
                    SegmentKind::Data => self.data_relocs = table,
                    SegmentKind::Bss => {}
                }
            }
            Role::Symtab => self.symtab = Some(span_of(shdr)),
            Role::Strtab => self.strtab = Some(span_of(shdr)),
        }
    }
}

fn span_of(shdr: &Elf32SectionHeader) -> Span {
    Span {
        offset: shdr.sh_offset,
        size: shdr.sh_size,
    }
}

// ---------------------------------------------------------------------------
// parse
// ---------------------------------------------------------------------------

/// Parses the metadata of the object starting at `file_offset` in `source`.
///
/// Performs reads only; nothing is allocated and nothing is written.
///
/// # Errors
///
/// - [`ElfError::BadHeader`] if the identification prefix does not match.
/// - [`ElfError::NoSymtab`], [`ElfError::NoStrtab`], [`ElfError::NoText`]
///   (checked in that order) if a required section is missing or empty.
/// - [`ElfError::InvalidOffset`] if the source knows its length and a
///   section extends past it.
/// - [`ElfError::Truncated`] or [`ElfError::Io`] on read failures.
pub fn parse<S: ByteSource + ?Sized>(
    source: &mut S,
    file_offset: u64,
) -> Result<ObjectMetadata, ElfError> {
    let header = Elf32Header::read(source, file_offset)?;

    let names = Elf32SectionHeader::read(
        source,
        file_offset + header.section_header_offset(header.e_shstrndx),
    )?;
    let names_base = file_offset + u64::from(names.sh_offset);

    let mut scan = Scan {
        machine: header.e_machine,
        ..Scan::default()
    };
    for index in 0..header.e_shnum {
        let shdr =
            Elf32SectionHeader::read(source, file_offset + header.section_header_offset(index))?;
        let name = SymbolName::read(source, names_base + u64::from(shdr.sh_name))?;
        scan.record(index, &shdr, &name);
    }

    if scan.symtab.is_none() {
        if let Some((span, link)) = scan.typed_symtab {
            debug!("elf: using unnamed SHT_SYMTAB section");
            scan.symtab = Some(span);
            if scan.strtab.is_none() {
                scan.strtab = linked_strtab(source, file_offset, &header, link)?;
            }
        }
    }

    let meta = finish(scan)?;
    if let Some(len) = source.total_len() {
        check_bounds(&meta, file_offset, len)?;
    }
    Ok(meta)
}

/// Follows a symbol table's `sh_link` to its string table.
fn linked_strtab<S: ByteSource + ?Sized>(
    source: &mut S,
    file_offset: u64,
    header: &Elf32Header,
    link: u32,
) -> Result<Option<Span>, ElfError> {
    let index = match u16::try_from(link) {
        Ok(index) if index != 0 && index < header.e_shnum => index,
        _ => return Ok(None),
    };
    let linked =
        Elf32SectionHeader::read(source, file_offset + header.section_header_offset(index))?;
    Ok((linked.sh_type == SHT_STRTAB).then(|| span_of(&linked)))
}

fn finish(scan: Scan) -> Result<ObjectMetadata, ElfError> {
    let symtab = scan.symtab.filter(|s| s.size > 0).ok_or(ElfError::NoSymtab)?;
    let strtab = scan.strtab.filter(|s| s.size > 0).ok_or(ElfError::NoStrtab)?;
    let text = scan.text.filter(|s| s.size > 0).ok_or(ElfError::NoText)?;

    Ok(ObjectMetadata {
        machine: scan.machine,
        text,
        rodata: scan.rodata,
        data: scan.data,
        bss: scan.bss,
        text_relocs: scan.text_relocs,
        rodata_relocs: scan.rodata_relocs,
        data_relocs: scan.data_relocs,
        symtab,
        strtab,
    })
}

/// Checks that every file-backed range lies within `len` bytes.
fn check_bounds(meta: &ObjectMetadata, file_offset: u64, len: u64) -> Result<(), ElfError> {
    let within = |offset: u32, size: u32| {
        file_offset + u64::from(offset) + u64::from(size) <= len
    };

    let sections = [Some(meta.text), meta.rodata, meta.data];
    let tables = [meta.text_relocs, meta.rodata_relocs, meta.data_relocs];
    let ok = sections.iter().flatten().all(|s| within(s.offset, s.size))
        && tables.iter().flatten().all(|t| within(t.offset, t.size))
        && within(meta.symtab.offset, meta.symtab.size)
        && within(meta.strtab.offset, meta.strtab.size);

    if ok { Ok(()) } else { Err(ElfError::InvalidOffset) }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
