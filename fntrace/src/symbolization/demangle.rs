//! Symbol name demangling
//!
//! Itanium C++ names (`_Z...`) go through `cpp_demangle`, Rust names (v0
//! `_R...` and hashed legacy `_ZN...17h<hash>E`) through `rustc-demangle`.
//! Anything that does not parse as a mangled name comes back unchanged.

use cpp_demangle::{BorrowedSymbol, DemangleOptions, ParseOptions};
use log::error;

use crate::domain::DemangleError;

/// Deeply nested template names blow the default recursion budget
const RECURSION_LIMIT: u32 = 1024;

/// Demangle `name`.
///
/// Returns the input when it is not a mangled name, and an empty string when
/// the demangler itself fails on a name it parsed (logged).
#[must_use]
pub fn demangle(name: &str) -> String {
    match try_demangle(name) {
        Ok(Some(demangled)) => demangled,
        Ok(None) => name.to_string(),
        Err(e) => {
            error!("{e}");
            String::new()
        }
    }
}

/// Demangle `name`, telling "not mangled" (`Ok(None)`) apart from a
/// demangler failure.
///
/// # Errors
/// Returns [`DemangleError::Format`] when `name` parsed as a C++ symbol but
/// could not be rendered
pub fn try_demangle(name: &str) -> Result<Option<String>, DemangleError> {
    if is_rust_symbol(name) {
        if let Ok(demangled) = rustc_demangle::try_demangle(name) {
            return Ok(Some(format!("{demangled:#}")));
        }
    }

    // Mach-O prefixes every symbol with an extra underscore
    let itanium = if name.starts_with("__Z") { &name[1..] } else { name };
    if !itanium.starts_with("_Z") {
        return Ok(None);
    }

    let parse_options = ParseOptions::default().recursion_limit(RECURSION_LIMIT);
    let Ok(symbol) = BorrowedSymbol::new_with_options(itanium.as_bytes(), &parse_options) else {
        return Ok(None);
    };
    let options = DemangleOptions::default().recursion_limit(RECURSION_LIMIT);
    symbol.demangle(&options).map(Some).map_err(|_| DemangleError::Format(name.to_string()))
}

/// v0 names, or legacy names ending in the `17h<16 hex digits>E` hash
fn is_rust_symbol(name: &str) -> bool {
    if name.starts_with("_R") {
        return true;
    }
    if !name.starts_with("_ZN") {
        return false;
    }
    let Some(body) = name.as_bytes().strip_suffix(b"E") else {
        return false;
    };
    let Some(split) = body.len().checked_sub(19).filter(|&split| split > 3) else {
        return false;
    };
    let hash = &body[split..];
    hash.starts_with(b"17h") && hash[3..].iter().all(u8::is_ascii_hexdigit)
}
