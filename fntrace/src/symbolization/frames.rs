//! Instruction-precise resolution through the line tables
//!
//! The debug-info index answers "where was this function declared". This
//! resolver answers "which line does this instruction belong to", including
//! inlined callers, using `addr2line` over the same image.

use addr2line::Context;
use gimli::{EndianRcSlice, RunTimeEndian};
use object::{Object, ObjectSection};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::demangle::demangle;
use super::elf::ElfImage;
use crate::domain::ImageError;

/// Line-table resolver with a per-address cache
///
/// Not `Sync`; create one per thread that needs it.
pub struct LineTableResolver {
    ctx: Context<EndianRcSlice<RunTimeEndian>>,
    cache: RefCell<HashMap<u64, ResolvedFrame>>,
}

impl LineTableResolver {
    /// Load the line tables of an opened image
    ///
    /// # Errors
    /// Returns [`ImageError::Malformed`] if the DWARF sections cannot be
    /// loaded
    pub fn new(image: &ElfImage) -> Result<Self, ImageError> {
        let malformed =
            |reason: String| ImageError::Malformed { path: image.path().to_path_buf(), reason };

        let obj = object::File::parse(image.data()).map_err(|e| malformed(e.to_string()))?;
        let endian = if obj.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

        let load_section =
            |id: gimli::SectionId| -> Result<EndianRcSlice<RunTimeEndian>, gimli::Error> {
                let data = obj
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
                Ok(EndianRcSlice::new(Rc::from(&*data), endian))
            };

        let dwarf = gimli::Dwarf::load(&load_section).map_err(|e| malformed(e.to_string()))?;
        let ctx = Context::from_dwarf(dwarf).map_err(|e| malformed(e.to_string()))?;

        Ok(Self { ctx, cache: RefCell::new(HashMap::new()) })
    }

    /// Frames covering the instruction at `addr`, innermost first
    pub fn resolve(&self, addr: u64) -> ResolvedFrame {
        if let Some(cached) = self.cache.borrow().get(&addr) {
            return cached.clone();
        }

        let mut frames = Vec::new();
        if let Ok(mut frame_iter) = self.ctx.find_frames(addr).skip_all_loads() {
            while let Ok(Some(frame)) = frame_iter.next() {
                let function = frame
                    .function
                    .and_then(|f| f.raw_name().ok().map(|name| demangle(&name)))
                    .unwrap_or_else(|| "<unknown>".to_string());

                let location = frame.location.map(|loc| LineLocation {
                    file: loc.file.map(std::string::ToString::to_string),
                    line: loc.line,
                    column: loc.column,
                });

                frames.push(InlinedFrame { function, location });
            }
        }

        let resolved = ResolvedFrame { addr, frames };
        self.cache.borrow_mut().insert(addr, resolved.clone());
        resolved
    }
}

/// Resolution of one address (several frames when calls were inlined)
#[derive(Debug, Clone)]
pub struct ResolvedFrame {
    pub addr: u64,
    pub frames: Vec<InlinedFrame>,
}

#[derive(Debug, Clone)]
pub struct InlinedFrame {
    pub function: String,
    pub location: Option<LineLocation>,
}

#[derive(Debug, Clone)]
pub struct LineLocation {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl ResolvedFrame {
    /// Innermost line, if the line table covers the address
    #[must_use]
    pub fn line(&self) -> Option<u32> {
        self.frames.first()?.location.as_ref()?.line
    }
}

/// Innermost frame on the first line, each inlining caller below it:
///
/// ```text
/// 0x0000000000001000 helper
///         at util.c:7
///     inlined into main
/// ```
impl fmt::Display for ResolvedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x} ", self.addr)?;
        let Some((innermost, callers)) = self.frames.split_first() else {
            return f.write_str("<unknown>");
        };

        f.write_str(&innermost.function)?;
        write_location(f, innermost.location.as_ref())?;
        for caller in callers {
            write!(f, "\n    inlined into {}", caller.function)?;
            write_location(f, caller.location.as_ref())?;
        }
        Ok(())
    }
}

fn write_location(f: &mut fmt::Formatter<'_>, location: Option<&LineLocation>) -> fmt::Result {
    let Some(location) = location else {
        return Ok(());
    };
    let Some(file) = &location.file else {
        return Ok(());
    };
    write!(f, "\n        at {file}")?;
    match location.line {
        Some(line) => write!(f, ":{line}"),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_unresolved() {
        let frame = ResolvedFrame { addr: 0x1234, frames: Vec::new() };
        assert_eq!(frame.to_string(), "0x0000000000001234 <unknown>");
        assert_eq!(frame.line(), None);
    }

    #[test]
    fn test_format_inlined() {
        let frame = ResolvedFrame {
            addr: 0x1000,
            frames: vec![
                InlinedFrame {
                    function: "helper".into(),
                    location: Some(LineLocation { file: Some("util.c".into()), line: Some(7), column: None }),
                },
                InlinedFrame { function: "main".into(), location: None },
            ],
        };
        let text = frame.to_string();
        assert!(text.starts_with("0x0000000000001000 helper\n        at util.c:7"));
        assert!(text.ends_with("inlined into main"));
        assert_eq!(frame.line(), Some(7));
    }
}
