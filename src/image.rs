//! Image model.
//!
//! This module defines the read-only view of an ELF file that every pass works on.
//! It flattens the program headers, section headers and the symbol table of a 32- or
//! 64-bit ELF file of either byte order into plain structures, and remembers where
//! each header lives in the file so that passes can patch fields in place.

use anyhow::{anyhow, bail, Context, Result};
use object::elf;
use object::read::elf::{FileHeader, ProgramHeader as _, SectionHeader as _, Sym as _};
use object::{Endianness, FileKind};

/// Represents a program header of the image.
///
/// Only `PT_LOAD` segments carry content; the others are kept so that the
/// address fix-up can see every header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Segment type (`PT_LOAD`, `PT_NOTE`, ...).
    pub p_type: u32,
    /// Permission flags (`PF_R`, `PF_W`, `PF_X`).
    pub flags: u32,
    /// Offset of the segment's bytes in the file.
    pub offset: u64,
    /// The address where the segment runs.
    pub virtual_address: u64,
    /// The address where the segment is loaded (LMA).
    pub physical_address: u64,
    /// Number of bytes present in the file.
    pub file_size: u64,
    /// Number of bytes occupied in memory.
    pub memory_size: u64,
    /// Required alignment.
    pub align: u64,
    /// Offset of the program header itself in the file.
    pub header_offset: u64,
}

impl Segment {
    /// Returns true for loadable segments with bytes in the file.
    pub fn is_load(&self) -> bool {
        self.p_type == elf::PT_LOAD && self.file_size > 0
    }
}

/// Represents a section header of the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Index in the section header table.
    pub index: usize,
    /// Name from the section header string table.
    pub name: String,
    /// Section type (`SHT_PROGBITS`, `SHT_NOBITS`, ...).
    pub sh_type: u32,
    /// Section flags (`SHF_ALLOC`, `SHF_WRITE`, ...).
    pub flags: u64,
    /// Address of the section in memory (0 in relocatable objects).
    pub address: u64,
    /// Offset of the section's bytes in the file.
    pub offset: u64,
    /// Size in bytes.
    pub size: u64,
    /// Required alignment (0 and 1 both mean none).
    pub align: u64,
    /// Offset of the section header itself in the file.
    pub header_offset: u64,
}

impl Section {
    /// Returns true if the section occupies memory at run time.
    pub fn is_alloc(&self) -> bool {
        self.flags & u64::from(elf::SHF_ALLOC) != 0
    }

    /// Returns true if the section has bytes in the file.
    pub fn has_file_data(&self) -> bool {
        self.sh_type != elf::SHT_NOBITS && self.sh_type != elf::SHT_NULL && self.size > 0
    }
}

/// An entry of the symbol table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    /// Address in linked images, section offset in relocatable objects.
    pub value: u64,
    pub size: u64,
    /// `STB_*` binding.
    pub binding: u8,
    /// `STT_*` type.
    pub kind: u8,
    /// Raw `st_shndx`, so `SHN_ABS` and `SHN_UNDEF` stay visible.
    pub section_index: u16,
}

impl Symbol {
    pub fn is_global(&self) -> bool {
        self.binding == elf::STB_GLOBAL
    }

    pub fn is_absolute(&self) -> bool {
        self.section_index == elf::SHN_ABS
    }

    pub fn is_undefined(&self) -> bool {
        self.section_index == elf::SHN_UNDEF
    }
}

/// A parsed ELF file.
///
/// The image borrows the file's bytes; headers are copied out so that callers can
/// hold on to them while mutating a separate copy of the file.
pub struct Image<'data> {
    data: &'data [u8],
    /// True for ELFCLASS64.
    pub is_64: bool,
    /// Byte order of the file.
    pub endian: Endianness,
    /// `e_machine`.
    pub machine: u16,
    /// `e_entry`.
    pub entry: u64,
    /// Program headers in table order.
    pub segments: Vec<Segment>,
    /// Section headers in table order, including the null section.
    pub sections: Vec<Section>,
    /// Symbols from `SHT_SYMTAB` in table order, without the null symbol.
    pub symbols: Vec<Symbol>,
}

impl<'data> Image<'data> {
    /// Parses an ELF file of either class and byte order.
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        match FileKind::parse(data).context("unrecognized file format")? {
            FileKind::Elf32 => parse_elf::<elf::FileHeader32<Endianness>>(data, false),
            FileKind::Elf64 => parse_elf::<elf::FileHeader64<Endianness>>(data, true),
            other => bail!("not an ELF file (found {:?})", other),
        }
    }

    /// The raw bytes of the file.
    pub fn data(&self) -> &'data [u8] {
        self.data
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    pub fn symbol_by_name(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Returns the file bytes of a section (empty for `SHT_NOBITS`).
    pub fn section_data(&self, section: &Section) -> Result<&'data [u8]> {
        if !section.has_file_data() {
            return Ok(&[]);
        }
        self.slice(section.offset, section.size)
            .with_context(|| format!("section {} extends past end of file", section.name))
    }

    /// Returns the file bytes of a segment.
    pub fn segment_data(&self, segment: &Segment) -> Result<&'data [u8]> {
        self.slice(segment.offset, segment.file_size).with_context(|| {
            format!(
                "segment at 0x{:x} extends past end of file",
                segment.virtual_address
            )
        })
    }

    /// Loadable segments with file content.
    pub fn load_segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.is_load())
    }

    fn slice(&self, offset: u64, size: u64) -> Result<&'data [u8]> {
        let start = usize::try_from(offset)?;
        let end = start
            .checked_add(usize::try_from(size)?)
            .ok_or_else(|| anyhow!("range overflow"))?;
        self.data
            .get(start..end)
            .ok_or_else(|| anyhow!("range 0x{:x}..0x{:x} out of bounds", start, end))
    }
}

fn parse_elf<'data, Elf: FileHeader<Endian = Endianness>>(
    data: &'data [u8],
    is_64: bool,
) -> Result<Image<'data>> {
    let header = Elf::parse(data).context("invalid ELF header")?;
    let endian = header.endian().context("unsupported ELF byte order")?;

    let phoff: u64 = header.e_phoff(endian).into();
    let phentsize = u64::from(header.e_phentsize(endian));
    let program_headers = header
        .program_headers(endian, data)
        .context("invalid program header table")?;
    let segments = program_headers
        .iter()
        .enumerate()
        .map(|(i, ph)| Segment {
            p_type: ph.p_type(endian),
            flags: ph.p_flags(endian),
            offset: ph.p_offset(endian).into(),
            virtual_address: ph.p_vaddr(endian).into(),
            physical_address: ph.p_paddr(endian).into(),
            file_size: ph.p_filesz(endian).into(),
            memory_size: ph.p_memsz(endian).into(),
            align: ph.p_align(endian).into(),
            header_offset: phoff + i as u64 * phentsize,
        })
        .collect();

    let table = header
        .sections(endian, data)
        .context("invalid section header table")?;
    let shoff: u64 = header.e_shoff(endian).into();
    let shentsize = u64::from(header.e_shentsize(endian));
    let mut sections = Vec::with_capacity(table.len());
    for (index, sh) in table.iter().enumerate() {
        let name = table
            .section_name(endian, sh)
            .with_context(|| format!("invalid name for section {index}"))?;
        sections.push(Section {
            index,
            name: String::from_utf8_lossy(name).into_owned(),
            sh_type: sh.sh_type(endian),
            flags: sh.sh_flags(endian).into(),
            address: sh.sh_addr(endian).into(),
            offset: sh.sh_offset(endian).into(),
            size: sh.sh_size(endian).into(),
            align: sh.sh_addralign(endian).into(),
            header_offset: shoff + index as u64 * shentsize,
        });
    }

    let symtab = table
        .symbols(endian, data, elf::SHT_SYMTAB)
        .context("invalid symbol table")?;
    let mut symbols = Vec::new();
    for (index, sym) in symtab.iter().enumerate().skip(1) {
        let name = symtab
            .symbol_name(endian, sym)
            .with_context(|| format!("invalid name for symbol {index}"))?;
        symbols.push(Symbol {
            name: String::from_utf8_lossy(name).into_owned(),
            value: sym.st_value(endian).into(),
            size: sym.st_size(endian).into(),
            binding: sym.st_bind(),
            kind: sym.st_type(),
            section_index: sym.st_shndx(endian),
        });
    }

    tracing::debug!(
        "parsed ELF{}: {} segments, {} sections, {} symbols",
        if is_64 { 64 } else { 32 },
        program_headers.len(),
        sections.len(),
        symbols.len()
    );

    Ok(Image {
        data,
        is_64,
        endian,
        machine: header.e_machine(endian),
        entry: header.e_entry(endian).into(),
        segments,
        sections,
        symbols,
    })
}
