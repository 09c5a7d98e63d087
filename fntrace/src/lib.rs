//! # fntrace - Function Call Tracing and Symbolication
//!
//! fntrace records every call and return of instrumented functions in a
//! running native process with minimal overhead, and resolves the recorded
//! functions back to names and source locations offline, from the target's
//! ELF image and DWARF debug information.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Traced Process                               │
//! │   instrumentation engine ──► on_enter / on_leave                │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ 6-byte packed events
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  capture: per-thread EventBuffer ──full/exit/flush_all──► Sink  │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ framed records (tag, bytes)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  trace_data: RecordReader ──► TraceBuilder ──► CallSpans        │
//! │                                                  │              │
//! │  symbolization: ElfImage ──► SymbolTable         ▼              │
//! │                      └─────► DebugInfoIndex   export: Chrome    │
//! │                                                  trace.json     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`capture`]: the in-process half
//!   - `engine`: attach/detach, instrumentation hooks, per-thread recorders
//!   - `buffer` / `registry`: fixed-capacity event buffers and the live set
//!   - `sink`: transport sinks (closures, channels, record files)
//!   - `functions`: the engine-owned function identifier space
//!
//! - [`symbolization`]: ELF loading, symbol tables, demangling and the
//!   DWARF debug-info index
//!
//! - [`trace_data`]: decoding recorded payloads into per-thread calls
//!
//! - [`export`]: Chrome Trace Event Format output
//!
//! - [`cli`]: command-line argument parsing for the `fntrace` binary
//!
//! - [`domain`]: core domain types (`Tid`, `FunctionId`, `Timestamp`) and
//!   errors
//!
//! ## Wire Format
//!
//! Events are defined in `fntrace-common` so producer and decoder agree on
//! the layout: `{function_id: u16, timestamp: i32}`, 6 bytes, host byte
//! order. The timestamp is microseconds since attach, negated on exit.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Inspect an image before tracing it
//! fntrace info libgame.so
//! fntrace functions libgame.so --with-source
//!
//! # Function table naming the ids, from the capture side or from the image
//! fntrace functions libgame.so --build-id 3f2a9c.. --table fn.json
//!
//! # Turn a recording into a timeline for chrome://tracing or Perfetto
//! fntrace decode --functions fn.json --recording trace.rec --output trace.json
//! ```

pub mod capture;
pub mod cli;
pub mod domain;
pub mod export;
pub mod symbolization;
pub mod trace_data;
