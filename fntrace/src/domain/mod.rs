//! Domain model for fntrace
//!
//! Newtypes that keep thread ids, function ids and timestamps apart, plus
//! the structured errors of every module.

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{FunctionId, Tid, Timestamp};

pub use errors::{CaptureError, DecodeError, DemangleError, ExportError, ImageError};
