//! Fixtures shared by the integration tests.
//!
//! Relocatable objects come from `object::write`. Linked images need program
//! headers and section addresses, which `object::write::Object` does not produce,
//! so `ExecBuilder` lays one out by hand.

#![allow(dead_code)]

use object::elf;
use object::write::{Object, SectionId, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};
use std::path::PathBuf;

/// Creates a fresh scratch directory for one test.
pub fn scratch_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("postlink-{}-{}", test, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// A relocatable x86-64 object under construction.
pub struct Relocatable {
    pub obj: Object<'static>,
}

impl Relocatable {
    pub fn new() -> Self {
        Self {
            obj: Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little),
        }
    }

    pub fn section(&mut self, name: &str, kind: SectionKind, data: &[u8], align: u64) -> SectionId {
        let id = self.obj.add_section(Vec::new(), name.as_bytes().to_vec(), kind);
        self.obj.append_section_data(id, data, align);
        id
    }

    pub fn bss(&mut self, name: &str, size: u64, align: u64) -> SectionId {
        let id = self
            .obj
            .add_section(Vec::new(), name.as_bytes().to_vec(), SectionKind::UninitializedData);
        self.obj.append_section_bss(id, size, align);
        id
    }

    /// Adds an absolute symbol, global unless `local`.
    pub fn absolute(&mut self, name: &str, value: u64, local: bool) {
        self.obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value,
            size: 0,
            kind: SymbolKind::Data,
            scope: if local { SymbolScope::Compilation } else { SymbolScope::Linkage },
            weak: false,
            section: SymbolSection::Absolute,
            flags: SymbolFlags::None,
        });
    }

    /// Adds a weak absolute symbol.
    pub fn weak_absolute(&mut self, name: &str, value: u64) {
        self.obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value,
            size: 0,
            kind: SymbolKind::Data,
            scope: SymbolScope::Linkage,
            weak: true,
            section: SymbolSection::Absolute,
            flags: SymbolFlags::None,
        });
    }

    /// Adds a global data symbol inside a section.
    pub fn defined(&mut self, name: &str, section: SectionId, offset: u64, size: u64) {
        self.obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value: offset,
            size,
            kind: SymbolKind::Data,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(section),
            flags: SymbolFlags::None,
        });
    }

    pub fn build(&self) -> Vec<u8> {
        self.obj.write().unwrap()
    }
}

struct ExecSection {
    name: String,
    sh_type: u32,
    flags: u64,
    address: u64,
    data: Vec<u8>,
    size: u64,
    align: u64,
}

struct ExecSegment {
    virtual_address: u64,
    physical_address: u64,
    /// Index into `sections` (0-based, excluding the null section).
    section: usize,
    memory_size: u64,
}

struct ExecSymbol {
    name: String,
    /// Index into `sections`, as for segments.
    section: usize,
    value: u64,
    size: u64,
}

/// Builds an `ET_EXEC` ELF with one `PT_LOAD` per segment and, when symbols
/// are added, a `.symtab`/`.strtab` pair.
pub struct ExecBuilder {
    is_64: bool,
    big_endian: bool,
    entry: u64,
    sections: Vec<ExecSection>,
    segments: Vec<ExecSegment>,
    symbols: Vec<ExecSymbol>,
}

/// Layout of a built image, for assertions.
pub struct ExecLayout {
    /// File offset of each user section's data, in insertion order.
    pub section_offsets: Vec<u64>,
}

impl ExecBuilder {
    pub fn new(is_64: bool) -> Self {
        Self {
            is_64,
            big_endian: false,
            entry: 0,
            sections: Vec::new(),
            segments: Vec::new(),
            symbols: Vec::new(),
        }
    }

    pub fn entry(mut self, entry: u64) -> Self {
        self.entry = entry;
        self
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    /// Adds an allocated `SHT_PROGBITS` section and returns its builder index.
    pub fn progbits(&mut self, name: &str, address: u64, data: &[u8], flags: u32) -> usize {
        self.sections.push(ExecSection {
            name: name.to_string(),
            sh_type: elf::SHT_PROGBITS,
            flags: u64::from(flags),
            address,
            data: data.to_vec(),
            size: data.len() as u64,
            align: 4,
        });
        self.sections.len() - 1
    }

    /// Adds an allocated `SHT_NOBITS` section.
    pub fn nobits(&mut self, name: &str, address: u64, size: u64) -> usize {
        self.sections.push(ExecSection {
            name: name.to_string(),
            sh_type: elf::SHT_NOBITS,
            flags: u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
            address,
            data: Vec::new(),
            size,
            align: 4,
        });
        self.sections.len() - 1
    }

    /// Adds a non-allocated section such as debug info.
    pub fn note(&mut self, name: &str, address: u64, data: &[u8]) -> usize {
        self.sections.push(ExecSection {
            name: name.to_string(),
            sh_type: elf::SHT_PROGBITS,
            flags: 0,
            address,
            data: data.to_vec(),
            size: data.len() as u64,
            align: 1,
        });
        self.sections.len() - 1
    }

    /// Adds a `PT_LOAD` covering one section.
    pub fn load(&mut self, section: usize, virtual_address: u64, physical_address: u64) {
        let memory_size = self.sections[section].size;
        self.segments.push(ExecSegment { virtual_address, physical_address, section, memory_size });
    }

    /// Adds a global object symbol at an absolute address inside a section.
    pub fn symbol(&mut self, name: &str, section: usize, value: u64, size: u64) {
        self.symbols.push(ExecSymbol { name: name.to_string(), section, value, size });
    }

    /// Serializes `.symtab` and `.strtab`.
    fn symbol_tables(&self) -> (Vec<u8>, Vec<u8>) {
        let mut strtab = vec![0u8];
        let mut w = Writer { buf: Vec::new(), is_64: self.is_64, big_endian: self.big_endian };
        w.symbol(0, 0, 0, 0, 0);
        let info = (elf::STB_GLOBAL << 4) | elf::STT_OBJECT;
        for sym in &self.symbols {
            let name = strtab.len() as u32;
            strtab.extend_from_slice(sym.name.as_bytes());
            strtab.push(0);
            w.symbol(name, info, (sym.section + 1) as u16, sym.value, sym.size);
        }
        (w.buf, strtab)
    }

    pub fn build(&self) -> (Vec<u8>, ExecLayout) {
        let (ehsize, phentsize, shentsize) = if self.is_64 { (64, 56, 64) } else { (52, 32, 40) };
        let symentsize: u64 = if self.is_64 { 24 } else { 16 };
        let phoff = ehsize as u64;
        let mut offset = phoff + phentsize as u64 * self.segments.len() as u64;

        let mut section_offsets = Vec::new();
        for s in &self.sections {
            offset = offset.next_multiple_of(s.align.max(1));
            section_offsets.push(offset);
            offset += s.data.len() as u64;
        }

        let has_symbols = !self.symbols.is_empty();
        let (symtab, strtab) = self.symbol_tables();
        let symtab_offset = offset.next_multiple_of(8);
        let strtab_offset = symtab_offset + symtab.len() as u64;
        if has_symbols {
            offset = strtab_offset + strtab.len() as u64;
        }

        let mut shstrtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for s in &self.sections {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(s.name.as_bytes());
            shstrtab.push(0);
        }
        let symtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".symtab\0");
        let strtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".strtab\0");
        let shstrtab_name = shstrtab.len() as u32;
        shstrtab.extend_from_slice(b".shstrtab\0");
        let shstrtab_offset = offset;
        offset += shstrtab.len() as u64;
        let shoff = offset.next_multiple_of(8);
        let symtab_index = self.sections.len() as u32 + 1;
        let shnum = self.sections.len() + if has_symbols { 4 } else { 2 };

        let mut w = Writer { buf: Vec::new(), is_64: self.is_64, big_endian: self.big_endian };

        // File header.
        w.buf.extend_from_slice(&elf::ELFMAG);
        w.buf.push(if self.is_64 { elf::ELFCLASS64 } else { elf::ELFCLASS32 });
        w.buf.push(if self.big_endian { elf::ELFDATA2MSB } else { elf::ELFDATA2LSB });
        w.buf.push(elf::EV_CURRENT);
        w.buf.resize(16, 0);
        w.u16(elf::ET_EXEC);
        w.u16(if self.is_64 { elf::EM_X86_64 } else { elf::EM_XTENSA });
        w.u32(u32::from(elf::EV_CURRENT));
        w.word(self.entry);
        w.word(if self.segments.is_empty() { 0 } else { phoff });
        w.word(shoff);
        w.u32(0);
        w.u16(ehsize);
        w.u16(phentsize);
        w.u16(self.segments.len() as u16);
        w.u16(shentsize);
        w.u16(shnum as u16);
        w.u16((shnum - 1) as u16);

        // Program headers.
        for seg in &self.segments {
            let s = &self.sections[seg.section];
            let file_offset = section_offsets[seg.section];
            let file_size = s.data.len() as u64;
            let flags = elf::PF_R | if s.flags & u64::from(elf::SHF_EXECINSTR) != 0 { elf::PF_X } else { elf::PF_W };
            if self.is_64 {
                w.u32(elf::PT_LOAD);
                w.u32(flags);
                w.word(file_offset);
                w.word(seg.virtual_address);
                w.word(seg.physical_address);
                w.word(file_size);
                w.word(seg.memory_size);
                w.word(4);
            } else {
                w.u32(elf::PT_LOAD);
                w.word(file_offset);
                w.word(seg.virtual_address);
                w.word(seg.physical_address);
                w.word(file_size);
                w.word(seg.memory_size);
                w.u32(flags);
                w.word(4);
            }
        }

        // Section contents.
        for (s, &off) in self.sections.iter().zip(&section_offsets) {
            w.buf.resize(off as usize, 0);
            w.buf.extend_from_slice(&s.data);
        }
        if has_symbols {
            w.buf.resize(symtab_offset as usize, 0);
            w.buf.extend_from_slice(&symtab);
            w.buf.extend_from_slice(&strtab);
        }
        w.buf.resize(shstrtab_offset as usize, 0);
        w.buf.extend_from_slice(&shstrtab);
        w.buf.resize(shoff as usize, 0);

        // Section headers: null, user sections, symbol tables, .shstrtab.
        w.section_header(0, elf::SHT_NULL, 0, 0, 0, 0, 0, 0, 0, 0);
        for (i, s) in self.sections.iter().enumerate() {
            w.section_header(name_offsets[i], s.sh_type, s.flags, s.address, section_offsets[i], s.size, 0, 0, s.align, 0);
        }
        if has_symbols {
            w.section_header(
                symtab_name,
                elf::SHT_SYMTAB,
                0,
                0,
                symtab_offset,
                symtab.len() as u64,
                symtab_index + 1,
                1,
                8,
                symentsize,
            );
            w.section_header(strtab_name, elf::SHT_STRTAB, 0, 0, strtab_offset, strtab.len() as u64, 0, 0, 1, 0);
        }
        w.section_header(shstrtab_name, elf::SHT_STRTAB, 0, 0, shstrtab_offset, shstrtab.len() as u64, 0, 0, 1, 0);

        (w.buf, ExecLayout { section_offsets })
    }
}

struct Writer {
    buf: Vec<u8>,
    is_64: bool,
    big_endian: bool,
}

impl Writer {
    fn u16(&mut self, v: u16) {
        let bytes = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.buf.extend_from_slice(&bytes);
    }

    fn u32(&mut self, v: u32) {
        let bytes = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.buf.extend_from_slice(&bytes);
    }

    fn u64(&mut self, v: u64) {
        let bytes = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
        self.buf.extend_from_slice(&bytes);
    }

    fn word(&mut self, v: u64) {
        if self.is_64 {
            self.u64(v);
        } else {
            self.u32(v as u32);
        }
    }

    fn symbol(&mut self, name: u32, info: u8, shndx: u16, value: u64, size: u64) {
        self.u32(name);
        if self.is_64 {
            self.buf.push(info);
            self.buf.push(0);
            self.u16(shndx);
            self.u64(value);
            self.u64(size);
        } else {
            self.u32(value as u32);
            self.u32(size as u32);
            self.buf.push(info);
            self.buf.push(0);
            self.u16(shndx);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn section_header(
        &mut self,
        name: u32,
        sh_type: u32,
        flags: u64,
        addr: u64,
        offset: u64,
        size: u64,
        link: u32,
        info: u32,
        align: u64,
        entsize: u64,
    ) {
        self.u32(name);
        self.u32(sh_type);
        self.word(flags);
        self.word(addr);
        self.word(offset);
        self.word(size);
        self.u32(link);
        self.u32(info);
        self.word(align);
        self.word(entsize);
    }
}
