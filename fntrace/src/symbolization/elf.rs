//! # ELF Loader
//!
//! Memory-maps a target image read-only and answers the questions the rest of
//! symbolization needs: architecture, GNU build id, load bias and function
//! symbols.
//!
//! The map is the only thing held; `object::File` borrows from it and is
//! re-parsed per query (header parsing is cheap, no section data is copied).
//! Only opening the file is a hard failure. Everything after that degrades
//! to empty results on malformed input.

use log::{debug, error, warn};
use memmap2::Mmap;
use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol, SectionKind};
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::domain::ImageError;

/// Section carrying the GNU build id note
pub const BUILD_ID_SECTION: &str = ".note.gnu.build-id";

/// `NT_GNU_BUILD_ID`
const NT_GNU_BUILD_ID: u32 = 3;

/// Size of an ELF note header (`namesz`, `descsz`, `type`)
const NOTE_HEADER_SIZE: usize = 12;

/// Architectures the symbolizer distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageArch {
    #[serde(rename = "arm32")]
    Arm32,
    #[serde(rename = "arm64")]
    Arm64,
    #[serde(rename = "x86")]
    X86,
    #[serde(rename = "x86-64")]
    X86_64,
    #[serde(rename = "unknown")]
    Unknown,
}

impl From<object::Architecture> for ImageArch {
    fn from(arch: object::Architecture) -> Self {
        match arch {
            object::Architecture::Arm => ImageArch::Arm32,
            object::Architecture::Aarch64 => ImageArch::Arm64,
            object::Architecture::I386 => ImageArch::X86,
            object::Architecture::X86_64 => ImageArch::X86_64,
            _ => ImageArch::Unknown,
        }
    }
}

impl fmt::Display for ImageArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImageArch::Arm32 => "arm32",
            ImageArch::Arm64 => "arm64",
            ImageArch::X86 => "x86",
            ImageArch::X86_64 => "x86-64",
            ImageArch::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// One `STT_FUNC` entry of the static or dynamic symbol table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionSymbol {
    pub name: String,
    pub address: u64,
    pub size: u64,
}

/// Summary returned by the `info` query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub architecture: ImageArch,
    /// Lowercase hex, empty when the image has no build id
    pub build_id: String,
    pub load_bias: Option<u64>,
}

/// A memory-mapped ELF image
pub struct ElfImage {
    path: PathBuf,
    data: Mmap,
    arch: ImageArch,
    little_endian: bool,
}

impl ElfImage {
    /// Map `path` read-only and parse its file header.
    ///
    /// # Errors
    /// - [`ImageError::Io`] if the file cannot be opened or mapped
    /// - [`ImageError::Malformed`] if the header is not a parseable ELF header
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let path = path.as_ref().to_path_buf();

        let file = File::open(&path).map_err(|source| {
            error!("Failed to open {}: {source}", path.display());
            ImageError::Io { path: path.clone(), source }
        })?;

        // SAFETY: the map is read-only; the image must not be truncated while
        // it is open, which is the usual contract for inspecting binaries.
        #[allow(unsafe_code)]
        let data = unsafe { Mmap::map(&file) }.map_err(|source| {
            error!("Failed to map {}: {source}", path.display());
            ImageError::Io { path: path.clone(), source }
        })?;

        let (arch, little_endian) = match object::File::parse(&*data) {
            Ok(obj) => (ImageArch::from(obj.architecture()), obj.is_little_endian()),
            Err(e) => {
                return Err(ImageError::Malformed { path, reason: e.to_string() });
            }
        };
        debug!("Opened {} ({arch})", path.display());

        Ok(Self { path, data, arch, little_endian })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn arch(&self) -> ImageArch {
        self.arch
    }

    /// Raw image bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Parsed view of the image. `None` only if the mapping changed
    /// underneath us since `open`.
    #[must_use]
    pub fn object(&self) -> Option<object::File<'_>> {
        match object::File::parse(self.data()) {
            Ok(obj) => Some(obj),
            Err(e) => {
                warn!("{} no longer parses: {e}", self.path.display());
                None
            }
        }
    }

    /// Descriptor bytes of the GNU build id note, empty when absent
    #[must_use]
    pub fn build_id(&self) -> Vec<u8> {
        let Some(obj) = self.object() else {
            return Vec::new();
        };
        let Some(section) = obj.section_by_name(BUILD_ID_SECTION) else {
            return Vec::new();
        };
        if section.kind() != SectionKind::Note {
            warn!("{BUILD_ID_SECTION} in {} is not a note section", self.path.display());
            return Vec::new();
        }
        match section.data() {
            Ok(bytes) => parse_build_id_note(bytes, self.little_endian).unwrap_or_default(),
            Err(e) => {
                warn!("Failed to read {BUILD_ID_SECTION}: {e}");
                Vec::new()
            }
        }
    }

    /// Build id as lowercase hex, empty when absent
    #[must_use]
    pub fn build_id_hex(&self) -> String {
        hex_encode(&self.build_id())
    }

    /// Virtual address of the first loadable, executable segment
    #[must_use]
    pub fn load_bias(&self) -> Option<u64> {
        let obj = self.object()?;
        // `segments()` only yields PT_LOAD entries for ELF
        obj.segments()
            .find(|segment| match segment.flags() {
                object::SegmentFlags::Elf { p_flags } => p_flags & object::elf::PF_X != 0,
                _ => false,
            })
            .map(|segment| segment.address())
    }

    /// `STT_FUNC` symbols from `.symtab`, or from `.dynsym` when the static
    /// table yields none. Not deduplicated.
    #[must_use]
    pub fn function_symbols(&self) -> Vec<FunctionSymbol> {
        let Some(obj) = self.object() else {
            return Vec::new();
        };

        let symbols = collect_functions(obj.symbols());
        if !symbols.is_empty() {
            return symbols;
        }
        debug!("{}: no static function symbols, using .dynsym", self.path.display());
        collect_functions(obj.dynamic_symbols())
    }

    #[must_use]
    pub fn info(&self) -> ImageInfo {
        ImageInfo {
            architecture: self.arch,
            build_id: self.build_id_hex(),
            load_bias: self.load_bias(),
        }
    }
}

fn collect_functions<'data, S>(symbols: impl Iterator<Item = S>) -> Vec<FunctionSymbol>
where
    S: ObjectSymbol<'data>,
{
    symbols
        .filter(|symbol| match symbol.flags() {
            object::SymbolFlags::Elf { st_info, .. } => st_info & 0xf == object::elf::STT_FUNC,
            _ => false,
        })
        .filter_map(|symbol| {
            let name = symbol.name().ok()?;
            Some(FunctionSymbol { name: name.to_string(), address: symbol.address(), size: symbol.size() })
        })
        .collect()
}

fn read_u32(bytes: &[u8], offset: usize, little_endian: bool) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(offset..offset + 4)?.try_into().ok()?;
    Some(if little_endian { u32::from_le_bytes(raw) } else { u32::from_be_bytes(raw) })
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Parse the first note of a build-id section.
///
/// Returns `None` unless the note is `NT_GNU_BUILD_ID` owned by `"GNU"`.
fn parse_build_id_note(bytes: &[u8], little_endian: bool) -> Option<Vec<u8>> {
    let namesz = read_u32(bytes, 0, little_endian)? as usize;
    let descsz = read_u32(bytes, 4, little_endian)? as usize;
    let note_type = read_u32(bytes, 8, little_endian)?;

    let name = bytes.get(NOTE_HEADER_SIZE..NOTE_HEADER_SIZE + namesz)?;
    if note_type != NT_GNU_BUILD_ID || name.strip_suffix(&[0]).unwrap_or(name) != b"GNU" {
        warn!("Unsupported build id note (type {note_type}, owner {:?})", String::from_utf8_lossy(name));
        return None;
    }

    let desc_start = NOTE_HEADER_SIZE + align4(namesz);
    bytes.get(desc_start..desc_start + descsz).map(<[u8]>::to_vec)
}

/// Lowercase hex encoding
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}
