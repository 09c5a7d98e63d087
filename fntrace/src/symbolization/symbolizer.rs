//! Symbolication facade over one ELF image
//!
//! Owns the [`ElfImage`] and builds the symbol table and debug-info index on
//! first use. Building happens once, on whichever thread asks first; after
//! that every query is a plain read and the symbolizer can be shared across
//! threads freely.

use fntrace_common::MAX_FUNCTIONS;
use log::{debug, warn};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use super::debug_info::{DebugEntry, DebugInfoIndex, IndexState, SourceLocation};
use super::demangle::demangle;
use super::elf::{ElfImage, FunctionSymbol, ImageInfo};
use super::frames::LineTableResolver;
use super::symtab::SymbolTable;
use crate::capture::FunctionTable;
use crate::domain::{CaptureError, ImageError};

const STATE_EMPTY: u8 = 0;
const STATE_BUILDING: u8 = 1;
const STATE_READY: u8 = 2;

/// Answer to an address query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Address the entry was found under (the query, or the query - 1)
    pub address: u64,
    pub name: String,
    pub location: SourceLocation,
}

/// A function symbol with a known declaration site
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFunction {
    /// Raw symbol-table name
    pub symbol: String,
    /// Demangled debug-info name
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub file: String,
    pub line: i64,
}

pub struct Symbolizer {
    image: ElfImage,
    symbols: OnceLock<SymbolTable>,
    debug_info: OnceLock<DebugInfoIndex>,
    state: AtomicU8,
}

impl Symbolizer {
    /// Open and map `path`
    ///
    /// # Errors
    /// See [`ElfImage::open`]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        ElfImage::open(path).map(Self::new)
    }

    #[must_use]
    pub fn new(image: ElfImage) -> Self {
        Self {
            image,
            symbols: OnceLock::new(),
            debug_info: OnceLock::new(),
            state: AtomicU8::new(STATE_EMPTY),
        }
    }

    #[must_use]
    pub fn image(&self) -> &ElfImage {
        &self.image
    }

    /// Architecture, hex build id and load bias
    #[must_use]
    pub fn info(&self) -> ImageInfo {
        self.image.info()
    }

    /// Check that this is the build the running module was loaded from.
    ///
    /// `expected` is hex, compared case-insensitively.
    ///
    /// # Errors
    /// Returns [`ImageError::BuildIdMismatch`] when the ids differ, including
    /// when the image has no build id at all
    pub fn verify_build_id(&self, expected: &str) -> Result<(), ImageError> {
        let actual = self.image.build_id_hex();
        if actual.eq_ignore_ascii_case(expected.trim()) {
            return Ok(());
        }
        debug!("build id {actual:?} does not match expected {expected}");
        Err(ImageError::BuildIdMismatch {
            path: self.image.path().to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }

    /// Function symbols in symbol-table order, aliases included
    #[must_use]
    pub fn function_symbols(&self) -> Vec<FunctionSymbol> {
        self.image.function_symbols()
    }

    /// Symbol table index, built on first call
    pub fn symbol_table(&self) -> &SymbolTable {
        self.symbols.get_or_init(|| SymbolTable::new(self.image.function_symbols()))
    }

    /// Debug-info index, built on first call
    pub fn debug_info(&self) -> &DebugInfoIndex {
        self.debug_info.get_or_init(|| {
            let symbols = self.symbol_table();
            self.state.store(STATE_BUILDING, Ordering::Release);
            let index = DebugInfoIndex::build(&self.image, symbols);
            self.state.store(STATE_READY, Ordering::Release);
            index
        })
    }

    #[must_use]
    pub fn index_state(&self) -> IndexState {
        match self.state.load(Ordering::Acquire) {
            STATE_EMPTY => IndexState::Empty,
            STATE_BUILDING => IndexState::Building,
            _ => IndexState::Ready,
        }
    }

    /// Exact-match entry lookup
    pub fn die(&self, address: u64) -> Option<&DebugEntry> {
        self.debug_info().die(address)
    }

    /// Resolve a captured address.
    ///
    /// Tries `address`, then `address - 1` for return addresses. `None`
    /// means the address is not indexed; a found entry without source
    /// information carries [`SourceLocation::Unknown`].
    pub fn resolve(&self, address: u64) -> Option<Resolved> {
        let index = self.debug_info();
        let (found_at, entry) = index
            .die(address)
            .map(|entry| (address, entry))
            .or_else(|| {
                let before = address.checked_sub(1)?;
                index.die(before).map(|entry| (before, entry))
            })?;

        Some(Resolved { address: found_at, name: entry.name.clone(), location: index.resolve(entry) })
    }

    /// Every sized function symbol that has a declared source file
    ///
    /// Functions without debug information are skipped. At most
    /// [`MAX_FUNCTIONS`] are returned, since each becomes a traced id.
    pub fn traced_functions(&self) -> Vec<SourceFunction> {
        let index = self.debug_info();
        let mut functions = Vec::new();

        for symbol in self.symbol_table().iter() {
            if symbol.address == 0 || symbol.size == 0 {
                continue;
            }
            let Some(entry) = index.die(symbol.address) else {
                debug!("{} has no debug info, skipping", symbol.name);
                continue;
            };
            let SourceLocation::Known { file, line } = index.resolve(entry) else {
                debug!("{} has no source file, skipping", symbol.name);
                continue;
            };
            if functions.len() == MAX_FUNCTIONS {
                warn!("More than {MAX_FUNCTIONS} functions with source, truncating");
                break;
            }
            functions.push(SourceFunction {
                symbol: symbol.name.clone(),
                name: if entry.name.is_empty() { demangle(&symbol.name) } else { entry.name.clone() },
                address: symbol.address,
                size: symbol.size,
                file,
                line,
            });
        }
        functions
    }

    /// Function table for [`traced_functions`](Self::traced_functions),
    /// keyed by image address and named after the raw symbol.
    ///
    /// Ids follow `traced_functions` order, so an agent that registers the
    /// functions in that order records ids this table names.
    ///
    /// # Errors
    /// Returns [`CaptureError::TooManyFunctions`] if the id space overflows
    pub fn function_table(&self) -> Result<FunctionTable, CaptureError> {
        let module = self.image.path().file_name().map(|name| name.to_string_lossy().into_owned());
        let mut table = FunctionTable::new();
        for function in self.traced_functions() {
            let id = table.register(function.address, function.symbol, module.clone())?;
            table.set_source(id, function.file, function.line);
        }
        Ok(table)
    }

    /// Line-table resolver over the same image
    ///
    /// # Errors
    /// Returns [`ImageError::Malformed`] if the debug sections cannot be
    /// loaded
    pub fn line_resolver(&self) -> Result<LineTableResolver, ImageError> {
        LineTableResolver::new(&self.image)
    }
}

/// Where an image sits in a running process
///
/// `slide` is what gets added to an image address to obtain the runtime
/// address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleLayout {
    slide: u64,
}

impl ModuleLayout {
    /// From a loader-reported base that already excludes the load bias
    /// (`dl_iterate_phdr`'s `dlpi_addr`)
    #[must_use]
    pub fn from_slide(slide: u64) -> Self {
        Self { slide }
    }

    /// From the start address of the image's first executable mapping.
    ///
    /// Android reports module bases this way; the load bias has to be
    /// subtracted first.
    #[must_use]
    pub fn from_mapping_base(base: u64, load_bias: Option<u64>) -> Self {
        Self { slide: base.wrapping_sub(load_bias.unwrap_or(0)) }
    }

    #[must_use]
    pub fn slide(&self) -> u64 {
        self.slide
    }

    #[must_use]
    pub fn to_runtime(&self, image_address: u64) -> u64 {
        image_address.wrapping_add(self.slide)
    }

    /// `None` when `runtime` lies below the image
    #[must_use]
    pub fn to_image(&self, runtime: u64) -> Option<u64> {
        runtime.checked_sub(self.slide)
    }
}
