//! Structured error types for fntrace
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Only resource acquisition failures surface here; malformed debug data is
//! degraded to partial results inside the symbolization modules instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Failed to open {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not a readable ELF image: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("{} build id mismatch: expected {expected}, image has {}", path.display(), or_none(actual))]
    BuildIdMismatch { path: PathBuf, expected: String, actual: String },
}

fn or_none(build_id: &str) -> &str {
    if build_id.is_empty() {
        "none"
    } else {
        build_id
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Too many functions to trace: at most {limit} fit the 16-bit id space")]
    TooManyFunctions { limit: usize },
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Truncated record at offset {offset}: expected {expected} bytes, found {found}")]
    TruncatedRecord { offset: u64, expected: usize, found: usize },

    #[error("Event payload of {len} bytes is not a whole number of events")]
    TruncatedEvents { len: usize },

    #[error("Invalid payload tag 0 at offset {offset}")]
    InvalidTag { offset: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum DemangleError {
    #[error("Demangler failed while formatting {0}")]
    Format(String),
}
