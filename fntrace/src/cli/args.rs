//! CLI argument definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "fntrace",
    version,
    about = "Inspect traced images and turn function-call recordings into timelines",
    after_help = "\
EXAMPLES:
    fntrace info libgame.so                           Architecture, build id, load bias
    fntrace functions libgame.so --with-source        Functions with a declaration site
    fntrace functions libgame.so --table fn.json      Function table for decode
    fntrace resolve libgame.so 0x1a2b0 0x1a310        Name and file:line per address
    fntrace resolve libgame.so --build-id 3f2a.. ADDR Refuse a different build
    fntrace demangle _Z3fooi                          C++/Rust demangling
    fntrace decode --functions fn.json --recording trace.rec --output trace.json"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print architecture, build id and load bias of an image
    Info {
        image: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List function symbols
    Functions {
        image: PathBuf,

        /// Only functions with debug info, annotated with file:line
        #[arg(long)]
        with_source: bool,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,

        /// Write the function table `decode --functions` reads
        #[arg(long, value_name = "FILE", conflicts_with_all = ["with_source", "json"])]
        table: Option<PathBuf>,

        /// Fail unless the image has this build id (hex)
        #[arg(long, value_name = "HEX")]
        build_id: Option<String>,
    },

    /// Resolve image addresses to function names and source locations
    Resolve {
        image: PathBuf,

        /// Addresses (hex with 0x prefix, or decimal)
        #[arg(required = true, value_parser = parse_address)]
        addresses: Vec<u64>,

        /// Treat addresses as runtime addresses of a module loaded here
        #[arg(long, value_name = "ADDR", value_parser = parse_address)]
        base: Option<u64>,

        /// The base is the mapping start (Android): subtract the load bias
        #[arg(long, requires = "base")]
        mapping_base: bool,

        /// Also show the line-table location of the exact instruction
        #[arg(long)]
        precise: bool,

        /// Fail unless the image has this build id (hex)
        #[arg(long, value_name = "HEX")]
        build_id: Option<String>,
    },

    /// Demangle C++ or Rust symbol names
    Demangle {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Convert a recording into a Chrome trace
    Decode {
        /// Function table saved by the capture side
        #[arg(long, value_name = "FILE")]
        functions: PathBuf,

        /// Framed sink records
        #[arg(long, value_name = "FILE")]
        recording: PathBuf,

        /// Chrome trace JSON to write
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Process id written into the trace
        #[arg(long, default_value = "0")]
        pid: u32,
    },
}

/// Parse `0x`-prefixed hex or decimal
///
/// # Errors
/// Returns a message clap reports as a usage error
pub fn parse_address(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address {s:?}: {e}"))
}
