//! # DWARF Debug-Info Index
//!
//! Maps a function's low address to its `DW_TAG_subprogram` entry, and an
//! entry to its declared source location.
//!
//! ## Build
//!
//! Every unit's tree is walked depth-first with an explicit stack; an entry
//! is recorded only after all of its children (post-order), so nested
//! definitions are indexed before the function that contains them.
//!
//! ```text
//! for each unit:
//!     for each subprogram with a non-zero low_pc (children first):
//!         address = low_pc
//!         if arm32 and address not in symtab:
//!             address + 1 in symtab ? use it : skip
//!         index[address] empty      → insert
//!         same demangled name       → duplicate, ignore
//!         different name            → push to conflicts
//! ```
//!
//! The first entry to claim an address keeps it. Malformed units are
//! skipped or partially indexed; the build never fails.

use gimli::{AttributeValue, EndianSlice, RunTimeEndian, UnitOffset};
use log::{debug, info, warn};
use object::{Object, ObjectSection};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use super::demangle::demangle;
use super::elf::{ElfImage, ImageArch};
use super::symtab::SymbolTable;

type Slice<'a> = EndianSlice<'a, RunTimeEndian>;
type Dwarf<'a> = gimli::Dwarf<Slice<'a>>;
type Unit<'a> = gimli::Unit<Slice<'a>>;
type Entry<'abbrev, 'unit, 'a> = gimli::DebuggingInformationEntry<'abbrev, 'unit, Slice<'a>>;

/// How many `DW_AT_specification`/`DW_AT_abstract_origin` hops are followed
const MAX_ORIGIN_DEPTH: usize = 8;

/// Lifecycle of a lazily built index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Empty,
    Building,
    Ready,
}

/// One indexed subprogram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEntry {
    /// Index key: low_pc, after the ARM32 fixup
    pub address: u64,
    /// Demangled linkage name, or plain name
    pub name: String,
    pub decl_file: Option<u64>,
    pub decl_line: Option<u64>,
    /// Compiler-generated, no user source
    pub artificial: bool,
    /// Owning compilation unit (position in [`DebugInfoIndex::units`])
    pub unit: usize,
}

/// Declared source location of a [`DebugEntry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// `line` is `-1` for artificial entries attributed to their unit
    Known { file: String, line: i64 },
    Unknown,
}

impl SourceLocation {
    #[must_use]
    pub fn file(&self) -> Option<&str> {
        match self {
            SourceLocation::Known { file, .. } => Some(file),
            SourceLocation::Unknown => None,
        }
    }

    #[must_use]
    pub fn line(&self) -> Option<i64> {
        match self {
            SourceLocation::Known { line, .. } => Some(*line),
            SourceLocation::Unknown => None,
        }
    }
}

/// What a compilation unit contributes to source resolution
#[derive(Debug, Clone, Default)]
pub struct UnitInfo {
    /// `DW_AT_name` of the unit's root entry
    pub name: String,
    pub comp_dir: Option<String>,
    /// Line-table file index → path
    files: HashMap<u64, String>,
}

impl UnitInfo {
    #[must_use]
    pub fn file(&self, index: u64) -> Option<&str> {
        self.files.get(&index).map(String::as_str)
    }
}

/// Counters reported after a build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub units: usize,
    pub subprograms: usize,
    pub indexed: usize,
    pub duplicates: usize,
    pub conflicts: usize,
    /// ARM32 entries with no matching symbol at either address
    pub skipped: usize,
}

/// Outcome of offering an entry to the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Insertion {
    Indexed,
    Duplicate,
    Conflict,
}

/// Immutable address → subprogram map
#[derive(Debug, Default)]
pub struct DebugInfoIndex {
    entries: BTreeMap<u64, DebugEntry>,
    conflicts: Vec<DebugEntry>,
    units: Vec<UnitInfo>,
    stats: IndexStats,
}

// ============================================================================
// Build
// ============================================================================

impl DebugInfoIndex {
    /// Walk all of `image`'s DWARF units.
    ///
    /// `symbols` is consulted only for the ARM32 Thumb-bit fixup.
    #[must_use]
    pub fn build(image: &ElfImage, symbols: &SymbolTable) -> Self {
        let mut index = Self::default();
        let Some(obj) = image.object() else {
            return index;
        };

        let endian = if obj.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };
        let load_section = |id: gimli::SectionId| -> Result<Cow<[u8]>, gimli::Error> {
            Ok(obj
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or(Cow::Borrowed(&[][..])))
        };
        let sections = match gimli::DwarfSections::load(load_section) {
            Ok(sections) => sections,
            Err(e) => {
                warn!("{}: unreadable debug sections: {e}", image.path().display());
                return index;
            }
        };
        let dwarf = sections.borrow(|section| EndianSlice::new(section, endian));

        let fixup = Fixup { arch: image.arch(), symbols };
        let mut headers = dwarf.units();
        loop {
            let header = match headers.next() {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(e) => {
                    warn!("Stopping at malformed unit header: {e}");
                    break;
                }
            };
            let unit = match dwarf.unit(header) {
                Ok(unit) => unit,
                Err(e) => {
                    warn!("Skipping unreadable unit: {e}");
                    continue;
                }
            };

            let unit_id = index.units.len();
            index.units.push(read_unit_info(&dwarf, &unit));
            if let Err(e) = index.walk_unit(&dwarf, &unit, unit_id, &fixup) {
                warn!("Unit {:?} only partially indexed: {e}", index.units[unit_id].name);
            }
        }

        index.stats.units = index.units.len();
        let stats = index.stats;
        info!(
            "Indexed {} of {} subprograms in {} units ({} duplicates, {} conflicts, {} skipped)",
            stats.indexed, stats.subprograms, stats.units, stats.duplicates, stats.conflicts, stats.skipped
        );
        index
    }

    /// Post-order walk of one unit's entry tree.
    ///
    /// `pending` holds subprograms whose subtrees are still being visited,
    /// innermost last. An entry is complete once the cursor returns to its
    /// depth or above.
    fn walk_unit(&mut self, dwarf: &Dwarf<'_>, unit: &Unit<'_>, unit_id: usize, fixup: &Fixup<'_>) -> gimli::Result<()> {
        let mut pending: Vec<(isize, DebugEntry)> = Vec::new();
        let mut depth = 0isize;
        let mut cursor = unit.entries();

        let result = loop {
            let (delta, entry) = match cursor.next_dfs() {
                Ok(Some(next)) => next,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            depth += delta;

            while pending.last().is_some_and(|(open, _)| *open >= depth) {
                if let Some((_, done)) = pending.pop() {
                    self.offer(done, fixup);
                }
            }

            if entry.tag() != gimli::DW_TAG_subprogram {
                continue;
            }
            match read_subprogram(dwarf, unit, entry, unit_id) {
                Ok(Some(subprogram)) => pending.push((depth, subprogram)),
                Ok(None) => {}
                Err(e) => debug!("Skipping unreadable subprogram: {e}"),
            }
        };

        while let Some((_, done)) = pending.pop() {
            self.offer(done, fixup);
        }
        result
    }

    /// Apply the address fixup, then insert
    fn offer(&mut self, mut entry: DebugEntry, fixup: &Fixup<'_>) {
        self.stats.subprograms += 1;
        match fixup.apply(entry.address) {
            Some(address) => entry.address = address,
            None => {
                debug!("No symbol at {:#x} or {:#x} for {}, skipping", entry.address, entry.address + 1, entry.name);
                self.stats.skipped += 1;
                return;
            }
        }
        match self.insert(entry) {
            Insertion::Indexed => self.stats.indexed += 1,
            Insertion::Duplicate => self.stats.duplicates += 1,
            Insertion::Conflict => self.stats.conflicts += 1,
        }
    }

    /// First-seen wins; a differently named claimant goes to `conflicts`
    fn insert(&mut self, entry: DebugEntry) -> Insertion {
        match self.entries.get(&entry.address) {
            None => {
                self.entries.insert(entry.address, entry);
                Insertion::Indexed
            }
            Some(kept) if kept.name == entry.name => Insertion::Duplicate,
            Some(kept) => {
                debug!("{:#x} claimed by {} and {}, keeping the first", entry.address, kept.name, entry.name);
                self.conflicts.push(entry);
                Insertion::Conflict
            }
        }
    }
}

/// Thumb-bit interworking fixup for 32-bit ARM images
struct Fixup<'a> {
    arch: ImageArch,
    symbols: &'a SymbolTable,
}

impl Fixup<'_> {
    /// Index key for a raw low_pc. `None` means skip the entry.
    ///
    /// Only `address → address + 1` is tried, never the reverse.
    fn apply(&self, address: u64) -> Option<u64> {
        if self.arch != ImageArch::Arm32 || self.symbols.contains(address) {
            return Some(address);
        }
        let thumb = address.checked_add(1)?;
        self.symbols.contains(thumb).then_some(thumb)
    }
}

// ============================================================================
// Queries
// ============================================================================

impl DebugInfoIndex {
    /// Exact-match lookup. Return addresses need the caller to also try
    /// `address - 1`.
    #[must_use]
    pub fn die(&self, address: u64) -> Option<&DebugEntry> {
        self.entries.get(&address)
    }

    /// Declared location of `entry`
    ///
    /// A `decl_file` of 0 is unknown. Without a `decl_file`, artificial
    /// entries are attributed to their unit with line `-1`.
    #[must_use]
    pub fn resolve(&self, entry: &DebugEntry) -> SourceLocation {
        let Some(unit) = self.units.get(entry.unit) else {
            return SourceLocation::Unknown;
        };
        match entry.decl_file {
            Some(0) => SourceLocation::Unknown,
            Some(index) => match unit.file(index) {
                Some(file) => SourceLocation::Known {
                    file: file.to_string(),
                    line: entry.decl_line.and_then(|line| i64::try_from(line).ok()).unwrap_or(0),
                },
                None => SourceLocation::Unknown,
            },
            None if entry.artificial => SourceLocation::Known { file: unit.name.clone(), line: -1 },
            None => SourceLocation::Unknown,
        }
    }

    /// Entries that lost an address to a differently named one
    #[must_use]
    pub fn conflicts(&self) -> &[DebugEntry] {
        &self.conflicts
    }

    #[must_use]
    pub fn units(&self) -> &[UnitInfo] {
        &self.units
    }

    #[must_use]
    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DebugEntry> {
        self.entries.values()
    }
}

// ============================================================================
// DWARF reading
// ============================================================================

fn attr_string(dwarf: &Dwarf<'_>, unit: &Unit<'_>, value: AttributeValue<Slice<'_>>) -> Option<String> {
    dwarf.attr_string(unit, value).ok().map(|s| s.to_string_lossy().into_owned())
}

fn read_unit_info(dwarf: &Dwarf<'_>, unit: &Unit<'_>) -> UnitInfo {
    let name = unit.name.map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
    let comp_dir = unit.comp_dir.map(|dir| dir.to_string_lossy().into_owned());

    let mut files = HashMap::new();
    if let Some(program) = &unit.line_program {
        let header = program.header();
        // DWARF 5 numbers files from 0, earlier versions from 1
        let base = if header.version() >= 5 { 0 } else { 1 };
        for (index, file) in (base..).zip(header.file_names()) {
            let Some(file_name) = attr_string(dwarf, unit, file.path_name()) else {
                continue;
            };

            let mut path = PathBuf::new();
            if file.directory_index() != 0 {
                if let Some(comp_dir) = comp_dir.as_deref().filter(|dir| !dir.is_empty()) {
                    path.push(comp_dir);
                }
            }
            if let Some(dir) =
                file.directory(header).and_then(|dir| attr_string(dwarf, unit, dir)).filter(|dir| !dir.is_empty())
            {
                path.push(dir);
            }
            path.push(file_name);
            files.insert(index, path.to_string_lossy().into_owned());
        }
    }

    UnitInfo { name, comp_dir, files }
}

#[derive(Default)]
struct SubprogramAttrs {
    linkage_name: Option<String>,
    name: Option<String>,
    decl_file: Option<u64>,
    decl_line: Option<u64>,
    artificial: bool,
}

impl SubprogramAttrs {
    /// Fill in whatever is still missing from `entry`. Returns the entry it
    /// refers to through `DW_AT_specification`/`DW_AT_abstract_origin`.
    fn absorb(&mut self, dwarf: &Dwarf<'_>, unit: &Unit<'_>, entry: &Entry<'_, '_, '_>) -> gimli::Result<Option<UnitOffset>> {
        let mut origin = None;
        let mut attrs = entry.attrs();
        while let Some(attr) = attrs.next()? {
            match attr.name() {
                gimli::DW_AT_linkage_name | gimli::DW_AT_MIPS_linkage_name if self.linkage_name.is_none() => {
                    self.linkage_name = attr_string(dwarf, unit, attr.value());
                }
                gimli::DW_AT_name if self.name.is_none() => {
                    self.name = attr_string(dwarf, unit, attr.value());
                }
                gimli::DW_AT_decl_file if self.decl_file.is_none() => {
                    self.decl_file = match attr.value() {
                        AttributeValue::FileIndex(index) => Some(index),
                        other => other.udata_value(),
                    };
                }
                gimli::DW_AT_decl_line if self.decl_line.is_none() => {
                    self.decl_line = attr.udata_value();
                }
                gimli::DW_AT_artificial => {
                    self.artificial |= matches!(attr.value(), AttributeValue::Flag(true));
                }
                gimli::DW_AT_specification | gimli::DW_AT_abstract_origin => {
                    if let AttributeValue::UnitRef(offset) = attr.value() {
                        origin = Some(offset);
                    }
                }
                _ => {}
            }
        }
        Ok(origin)
    }
}

/// Owned [`DebugEntry`] for a subprogram with a non-zero low_pc
fn read_subprogram(
    dwarf: &Dwarf<'_>,
    unit: &Unit<'_>,
    entry: &Entry<'_, '_, '_>,
    unit_id: usize,
) -> gimli::Result<Option<DebugEntry>> {
    let Some(low_pc) = entry.attr_value(gimli::DW_AT_low_pc)? else {
        return Ok(None);
    };
    let address = match dwarf.attr_address(unit, low_pc)? {
        Some(address) if address != 0 => address,
        _ => return Ok(None),
    };

    let mut attrs = SubprogramAttrs::default();
    let mut origin = attrs.absorb(dwarf, unit, entry)?;
    for _ in 0..MAX_ORIGIN_DEPTH {
        let Some(offset) = origin else { break };
        let referenced = unit.entry(offset)?;
        origin = attrs.absorb(dwarf, unit, &referenced)?;
    }

    let raw_name = attrs.linkage_name.or(attrs.name).unwrap_or_default();
    Ok(Some(DebugEntry {
        address,
        name: demangle(&raw_name),
        decl_file: attrs.decl_file,
        decl_line: attrs.decl_line,
        artificial: attrs.artificial,
        unit: unit_id,
    }))
}
