//! # Symbolication
//!
//! Turns addresses recorded by the capture engine back into function names
//! and source locations, by parsing the target's ELF image and DWARF debug
//! information.
//!
//! ## Pipeline
//!
//! ```text
//! ElfImage::open ──► function_symbols ──► SymbolTable
//!        │                                     │ (ARM32 Thumb fixup)
//!        └──────────► DWARF units ──────► DebugInfoIndex ──► resolve ──► file:line
//! ```
//!
//! Both indexes are built lazily by [`Symbolizer`], once, then shared
//! read-only.
//!
//! ## Addresses
//!
//! All queries take **image addresses** (as linked, before relocation).
//! Runtime addresses from a live process are converted with
//! [`ModuleLayout`]:
//!
//! ```text
//! image address = runtime address - slide
//! slide         = module base - load bias   (Android, mapping-based base)
//! slide         = dlpi_addr                 (glibc)
//! ```
//!
//! Return addresses point just past the call instruction, so
//! [`Symbolizer::resolve`] also probes `address - 1`. The raw
//! [`DebugInfoIndex::die`] lookup never does.
//!
//! ## Module Structure
//!
//! - **`elf`**: memory-mapped image, build id, load bias, function symbols
//! - **`symtab`**: address-ordered function symbol index
//! - **`demangle`**: C++ and Rust name demangling
//! - **`debug_info`**: subprogram index and declared source locations
//! - **`frames`**: line-table resolution of individual instructions
//! - **`symbolizer`**: facade tying the above together
//!
//! ## Example
//!
//! ```rust,ignore
//! let symbolizer = Symbolizer::open("/data/app/lib/arm/libgame.so")?;
//! println!("build id {}", symbolizer.info().build_id);
//!
//! let layout = ModuleLayout::from_mapping_base(module_base, symbolizer.info().load_bias);
//! if let Some(image_addr) = layout.to_image(runtime_addr) {
//!     match symbolizer.resolve(image_addr) {
//!         Some(resolved) => println!("{} {:?}", resolved.name, resolved.location),
//!         None => println!("not indexed"),
//!     }
//! }
//! ```

pub mod debug_info;
pub mod demangle;
pub mod elf;
pub mod frames;
pub mod symbolizer;
pub mod symtab;

pub use debug_info::{DebugEntry, DebugInfoIndex, IndexState, IndexStats, SourceLocation};
pub use demangle::{demangle, try_demangle};
pub use elf::{ElfImage, FunctionSymbol, ImageArch, ImageInfo};
pub use frames::{LineTableResolver, ResolvedFrame};
pub use symbolizer::{ModuleLayout, Resolved, SourceFunction, Symbolizer};
pub use symtab::SymbolTable;
