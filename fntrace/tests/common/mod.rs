//! Synthetic ELF images with DWARF for symbolization tests
//!
//! Images are relocatable objects written by `object::write`; debug info is
//! a single DWARF 4 unit written by `gimli::write` with constant addresses,
//! so no relocations are involved.

#![allow(dead_code)]

use gimli::write::{
    Address, AttributeValue, DwarfUnit, EndianVec, FileId, LineProgram, LineString, Sections, UnitEntryId,
};
use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};
use std::io::Write;
use tempfile::NamedTempFile;

/// `DW_AT_high_pc` offset and line sequence length of every function
pub const FUNCTION_SIZE: u64 = 16;

/// A `DW_TAG_subprogram` to emit
#[derive(Debug, Clone, Default)]
pub struct Subprogram {
    pub name: &'static str,
    pub linkage_name: Option<&'static str>,
    pub low_pc: u64,
    pub decl_file: Option<u64>,
    pub decl_line: Option<u64>,
    pub artificial: bool,
    pub children: Vec<Subprogram>,
}

impl Subprogram {
    pub fn new(name: &'static str, low_pc: u64) -> Self {
        Self { name, low_pc, ..Self::default() }
    }

    pub fn declared(mut self, file: u64, line: u64) -> Self {
        self.decl_file = Some(file);
        self.decl_line = Some(line);
        self
    }
}

pub struct ImageBuilder {
    arch: Architecture,
    symbols: Vec<(&'static str, u64, u64)>,
    unit_name: &'static str,
    files: Vec<&'static str>,
    subprograms: Vec<Subprogram>,
    build_id: Option<Vec<u8>>,
}

impl ImageBuilder {
    pub fn new(arch: Architecture) -> Self {
        Self {
            arch,
            symbols: Vec::new(),
            unit_name: "main.c",
            files: Vec::new(),
            subprograms: Vec::new(),
            build_id: None,
        }
    }

    pub fn symbol(mut self, name: &'static str, address: u64, size: u64) -> Self {
        self.symbols.push((name, address, size));
        self
    }

    /// Line-table file; the first one added is index 1
    pub fn file(mut self, name: &'static str) -> Self {
        self.files.push(name);
        self
    }

    pub fn unit_name(mut self, name: &'static str) -> Self {
        self.unit_name = name;
        self
    }

    pub fn subprogram(mut self, subprogram: Subprogram) -> Self {
        self.subprograms.push(subprogram);
        self
    }

    pub fn build_id(mut self, id: &[u8]) -> Self {
        self.build_id = Some(id.to_vec());
        self
    }

    fn address_size(&self) -> u8 {
        match self.arch {
            Architecture::Arm | Architecture::I386 => 4,
            _ => 8,
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut obj = Object::new(BinaryFormat::Elf, self.arch, Endianness::Little);

        let text = obj.section_id(StandardSection::Text);
        obj.append_section_data(text, &[0u8; 64], 16);
        for &(name, address, size) in &self.symbols {
            obj.add_symbol(Symbol {
                name: name.as_bytes().to_vec(),
                value: address,
                size,
                kind: SymbolKind::Text,
                scope: SymbolScope::Linkage,
                weak: false,
                section: SymbolSection::Section(text),
                flags: SymbolFlags::None,
            });
        }

        if let Some(id) = &self.build_id {
            let section = obj.add_section(Vec::new(), b".note.gnu.build-id".to_vec(), SectionKind::Note);
            obj.set_section_data(section, gnu_note(id), 4);
        }

        if !self.subprograms.is_empty() || !self.files.is_empty() {
            for (name, data) in self.dwarf_sections() {
                let section = obj.add_section(Vec::new(), name.as_bytes().to_vec(), SectionKind::Debug);
                obj.set_section_data(section, data, 1);
            }
        }

        obj.write().unwrap()
    }

    pub fn write(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&self.bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn dwarf_sections(&self) -> Vec<(&'static str, Vec<u8>)> {
        let encoding = gimli::Encoding { format: gimli::Format::Dwarf32, version: 4, address_size: self.address_size() };
        let mut dwarf = DwarfUnit::new(encoding);

        let mut program = LineProgram::new(
            encoding,
            gimli::LineEncoding::default(),
            LineString::String(Vec::new()),
            LineString::String(self.unit_name.as_bytes().to_vec()),
            None,
        );
        let dir = program.default_directory();
        let file_ids: Vec<FileId> = self
            .files
            .iter()
            .map(|name| program.add_file(LineString::String(name.as_bytes().to_vec()), dir, None))
            .collect();

        // One sequence per top-level function, its body attributed to the
        // declaration line
        for subprogram in &self.subprograms {
            let (Some(file), Some(line)) = (subprogram.decl_file, subprogram.decl_line) else {
                continue;
            };
            let Some(&file_id) = usize::try_from(file).ok().and_then(|n| n.checked_sub(1)).and_then(|n| file_ids.get(n))
            else {
                continue;
            };
            program.begin_sequence(Some(Address::Constant(subprogram.low_pc)));
            program.row().file = file_id;
            program.row().line = line;
            program.row().address_offset = 0;
            program.generate_row();
            program.end_sequence(FUNCTION_SIZE);
        }
        dwarf.unit.line_program = program;

        let root = dwarf.unit.root();
        dwarf.unit.get_mut(root).set(gimli::DW_AT_name, AttributeValue::String(self.unit_name.as_bytes().to_vec()));
        for subprogram in &self.subprograms {
            add_subprogram(&mut dwarf, root, subprogram);
        }

        let mut sections = Sections::new(EndianVec::new(gimli::LittleEndian));
        dwarf.write(&mut sections).unwrap();

        let mut out = Vec::new();
        sections
            .for_each(|id, data| -> Result<(), gimli::Error> {
                if !data.slice().is_empty() {
                    out.push((id.name(), data.slice().to_vec()));
                }
                Ok(())
            })
            .unwrap();
        out
    }
}

fn add_subprogram(dwarf: &mut DwarfUnit, parent: UnitEntryId, subprogram: &Subprogram) {
    let id = dwarf.unit.add(parent, gimli::DW_TAG_subprogram);
    let entry = dwarf.unit.get_mut(id);
    entry.set(gimli::DW_AT_name, AttributeValue::String(subprogram.name.as_bytes().to_vec()));
    if let Some(linkage) = subprogram.linkage_name {
        entry.set(gimli::DW_AT_linkage_name, AttributeValue::String(linkage.as_bytes().to_vec()));
    }
    entry.set(gimli::DW_AT_low_pc, AttributeValue::Address(Address::Constant(subprogram.low_pc)));
    entry.set(gimli::DW_AT_high_pc, AttributeValue::Udata(FUNCTION_SIZE));
    if let Some(file) = subprogram.decl_file {
        entry.set(gimli::DW_AT_decl_file, AttributeValue::Udata(file));
    }
    if let Some(line) = subprogram.decl_line {
        entry.set(gimli::DW_AT_decl_line, AttributeValue::Udata(line));
    }
    if subprogram.artificial {
        entry.set(gimli::DW_AT_artificial, AttributeValue::Flag(true));
    }
    for child in &subprogram.children {
        add_subprogram(dwarf, id, child);
    }
}

/// `NT_GNU_BUILD_ID` note owned by "GNU"
fn gnu_note(id: &[u8]) -> Vec<u8> {
    let mut note = Vec::new();
    note.extend_from_slice(&4u32.to_le_bytes());
    note.extend_from_slice(&u32::try_from(id.len()).unwrap().to_le_bytes());
    note.extend_from_slice(&3u32.to_le_bytes());
    note.extend_from_slice(b"GNU\0");
    note.extend_from_slice(id);
    note
}

/// Minimal ELF64 executable header with the given `(p_flags, p_vaddr)`
/// `PT_LOAD` segments and no sections
pub fn elf_with_segments(segments: &[(u32, u64)]) -> NamedTempFile {
    const EHDR_SIZE: u16 = 64;
    const PHDR_SIZE: u16 = 56;
    const PT_LOAD: u32 = 1;

    let mut out = Vec::new();
    out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(&3u16.to_le_bytes()); // ET_DYN
    out.extend_from_slice(&62u16.to_le_bytes()); // EM_X86_64
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
    out.extend_from_slice(&u64::from(EHDR_SIZE).to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&EHDR_SIZE.to_le_bytes());
    out.extend_from_slice(&PHDR_SIZE.to_le_bytes());
    out.extend_from_slice(&u16::try_from(segments.len()).unwrap().to_le_bytes());
    out.extend_from_slice(&64u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    assert_eq!(out.len(), usize::from(EHDR_SIZE));

    for &(flags, vaddr) in segments {
        out.extend_from_slice(&PT_LOAD.to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // p_offset
        out.extend_from_slice(&vaddr.to_le_bytes());
        out.extend_from_slice(&vaddr.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes()); // p_filesz
        out.extend_from_slice(&0u64.to_le_bytes()); // p_memsz
        out.extend_from_slice(&0x1000u64.to_le_bytes());
    }

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&out).unwrap();
    file.flush().unwrap();
    file
}
