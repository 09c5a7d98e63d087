use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::io::Write;

use crate::capture::FunctionTable;
use crate::domain::{ExportError, FunctionId};
use crate::symbolization::demangle;
use crate::trace_data::TraceData;

/// Chrome Trace Event format
/// Spec: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU/preview
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChromeTraceEvent {
    /// Event name (demangled function name)
    name: String,
    /// Category for filtering/coloring (the function's module)
    cat: String,
    /// Phase: "X" = complete, "B" = begin, "M" = metadata
    ph: String,
    /// Timestamp in microseconds since attach
    ts: u64,
    /// Duration in microseconds, complete events only
    #[serde(skip_serializing_if = "Option::is_none")]
    dur: Option<u64>,
    pid: u32,
    tid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<HashMap<String, JsonValue>>,
}

/// Chrome Trace Format container
#[derive(Debug, Serialize)]
struct ChromeTrace {
    #[serde(rename = "traceEvents")]
    trace_events: Vec<ChromeTraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: String,
}

/// Chrome trace exporter for timeline visualization
///
/// Names function ids through a [`FunctionTable`]; complete calls become
/// `X` events, calls that never returned `B` events, and every named thread
/// a `thread_name` metadata event.
pub struct ChromeTraceExporter<'a> {
    functions: &'a FunctionTable,
    pid: u32,
    events: Vec<ChromeTraceEvent>,
    thread_names: Vec<(u32, String)>,
    /// Demangled name per function id
    names: HashMap<FunctionId, String>,
}

impl<'a> ChromeTraceExporter<'a> {
    #[must_use]
    pub fn new(functions: &'a FunctionTable, pid: u32) -> Self {
        Self { functions, pid, events: Vec::new(), thread_names: Vec::new(), names: HashMap::new() }
    }

    fn name_of(&mut self, id: FunctionId) -> String {
        if let Some(name) = self.names.get(&id) {
            return name.clone();
        }
        let name = match self.functions.get(id) {
            Some(function) => demangle(&function.name),
            None => {
                warn!("No function registered for {id}");
                id.to_string()
            }
        };
        self.names.insert(id, name.clone());
        name
    }

    fn source_args(&self, id: FunctionId) -> Option<HashMap<String, JsonValue>> {
        let function = self.functions.get(id)?;
        let file = function.file.as_ref()?;
        let mut args = HashMap::new();
        args.insert("file".to_string(), serde_json::json!(file));
        if let Some(line) = function.line {
            args.insert("line".to_string(), serde_json::json!(line));
        }
        Some(args)
    }

    fn category_of(&self, id: FunctionId) -> String {
        self.functions.get(id).and_then(|function| function.module.clone()).unwrap_or_default()
    }

    /// Add every call and thread name of a decoded recording
    pub fn add_trace(&mut self, trace: &TraceData) {
        for span in &trace.spans {
            let event = ChromeTraceEvent {
                name: self.name_of(span.function),
                cat: self.category_of(span.function),
                ph: "X".to_string(),
                ts: span.start.0,
                dur: Some(span.duration),
                pid: self.pid,
                tid: span.tid.0,
                args: self.source_args(span.function),
            };
            self.events.push(event);
        }

        for call in &trace.unfinished {
            let event = ChromeTraceEvent {
                name: self.name_of(call.function),
                cat: self.category_of(call.function),
                ph: "B".to_string(),
                ts: call.start.0,
                dur: None,
                pid: self.pid,
                tid: call.tid.0,
                args: self.source_args(call.function),
            };
            self.events.push(event);
        }

        for (tid, name) in &trace.thread_names {
            self.thread_names.push((tid.0, name.clone()));
        }
    }

    /// Export the trace to any writer (file, stdout, buffer, etc.)
    ///
    /// Events are sorted by timestamp, longer calls first on ties so
    /// parents precede the children they start with. Thread names come last.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails
    pub fn export<W: Write>(&self, writer: W) -> Result<(), ExportError> {
        let mut all_events = self.events.clone();
        all_events.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| b.dur.cmp(&a.dur)));

        for (tid, name) in &self.thread_names {
            let mut args = HashMap::new();
            args.insert("name".to_string(), serde_json::json!(format!("{name}/{tid}")));

            all_events.push(ChromeTraceEvent {
                name: "thread_name".to_string(),
                cat: String::new(),
                ph: "M".to_string(),
                ts: 0,
                dur: None,
                pid: self.pid,
                tid: *tid,
                args: Some(args),
            });
        }

        let trace = ChromeTrace { trace_events: all_events, display_time_unit: "ms".to_string() };
        serde_json::to_writer_pretty(writer, &trace)?;
        Ok(())
    }

    /// Get the number of call events collected
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}
