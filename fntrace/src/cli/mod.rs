//! Command-line interface of the `fntrace` binary

pub mod args;

pub use args::{Args, Command};
