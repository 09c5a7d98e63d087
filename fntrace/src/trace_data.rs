//! Decoding of recorded sink payloads
//!
//! A recording is the sequence of framed records written by
//! [`RecordFileSink`](crate::capture::RecordFileSink). Decoding replays each
//! thread's events against a call stack:
//!
//! ```text
//! enter f @ t0   → push (f, t0)
//! exit  f @ t1   → pop  (f, t0)  → CallSpan { f, start: t0, duration: t1 - t0 }
//! exit, empty    → orphan exit (logged, counted)
//! end of input   → whatever is still on a stack is an unfinished call
//! ```
//!
//! Events of different threads never interact; only the shared baseline
//! relates their timestamps.

use fntrace_common::{Event, PayloadTag, Phase, EVENT_SIZE};
use log::{debug, error, info};
use std::collections::{BTreeMap, HashMap};
use std::io::Read;

use crate::capture::sink::{Payload, RECORD_HEADER_SIZE};
use crate::domain::{DecodeError, FunctionId, Tid, Timestamp};

// ============================================================================
// Record framing
// ============================================================================

/// Reads `tag: i32, len: u32, bytes[len]` records (host-native order)
pub struct RecordReader<R> {
    reader: R,
    offset: u64,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, offset: 0 }
    }

    /// Next record, `None` at a clean end of input
    ///
    /// # Errors
    /// - [`DecodeError::TruncatedRecord`] if input ends inside a record
    /// - [`DecodeError::InvalidTag`] for tag `0`
    /// - [`DecodeError::Io`] if reading fails
    pub fn next_record(&mut self) -> Result<Option<Payload>, DecodeError> {
        let mut header = [0u8; RECORD_HEADER_SIZE];
        let found = read_full(&mut self.reader, &mut header)?;
        if found == 0 {
            return Ok(None);
        }
        if found < RECORD_HEADER_SIZE {
            return Err(DecodeError::TruncatedRecord { offset: self.offset, expected: RECORD_HEADER_SIZE, found });
        }

        let tag = i32::from_ne_bytes([header[0], header[1], header[2], header[3]]);
        let len = u32::from_ne_bytes([header[4], header[5], header[6], header[7]]) as usize;
        if tag == 0 {
            return Err(DecodeError::InvalidTag { offset: self.offset });
        }

        // the header length is untrusted; grow with the data actually present
        let mut bytes = Vec::new();
        let found = (&mut self.reader).take(len as u64).read_to_end(&mut bytes)?;
        if found < len {
            return Err(DecodeError::TruncatedRecord {
                offset: self.offset + RECORD_HEADER_SIZE as u64,
                expected: len,
                found,
            });
        }

        self.offset += (RECORD_HEADER_SIZE + len) as u64;
        Ok(Some(Payload { tag, bytes }))
    }

    /// Bytes consumed so far
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Payload, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Fill `buf` unless input ends first; returns bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ============================================================================
// Call reconstruction
// ============================================================================

/// One completed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSpan {
    pub tid: Tid,
    pub function: FunctionId,
    pub start: Timestamp,
    /// Microseconds
    pub duration: u64,
}

/// A call whose exit was never recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenCall {
    pub tid: Tid,
    pub function: FunctionId,
    pub start: Timestamp,
}

/// Everything recovered from a recording
#[derive(Debug, Default)]
pub struct TraceData {
    pub spans: Vec<CallSpan>,
    pub unfinished: Vec<OpenCall>,
    pub thread_names: BTreeMap<Tid, String>,
    /// Exits that had no matching enter on their thread
    pub orphan_exits: usize,
}

impl TraceData {
    /// Decode a whole recording
    ///
    /// # Errors
    /// Returns the first framing or payload error encountered
    pub fn from_records<R: Read>(reader: R) -> Result<Self, DecodeError> {
        let mut builder = TraceBuilder::new();
        for record in RecordReader::new(reader) {
            let record = record?;
            builder.push_payload(record.tag, &record.bytes)?;
        }
        Ok(builder.finish())
    }

    /// Threads seen in events or names, ascending
    #[must_use]
    pub fn threads(&self) -> Vec<Tid> {
        let mut threads: Vec<Tid> = self
            .spans
            .iter()
            .map(|span| span.tid)
            .chain(self.unfinished.iter().map(|call| call.tid))
            .chain(self.thread_names.keys().copied())
            .collect();
        threads.sort_unstable();
        threads.dedup();
        threads
    }
}

/// Incremental decoder fed one payload at a time
#[derive(Debug, Default)]
pub struct TraceBuilder {
    stacks: HashMap<Tid, Vec<OpenCall>>,
    spans: Vec<CallSpan>,
    thread_names: BTreeMap<Tid, String>,
    orphan_exits: usize,
}

impl TraceBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sink payload
    ///
    /// # Errors
    /// - [`DecodeError::InvalidTag`] for tag `0`
    /// - [`DecodeError::TruncatedEvents`] if an event batch is not a whole
    ///   number of events
    pub fn push_payload(&mut self, tag: i32, bytes: &[u8]) -> Result<(), DecodeError> {
        match PayloadTag::from_raw(tag) {
            Some(PayloadTag::Events(tid)) => {
                if bytes.len() % EVENT_SIZE != 0 {
                    return Err(DecodeError::TruncatedEvents { len: bytes.len() });
                }
                self.push_events(Tid(tid), Event::iter_packed(bytes));
                Ok(())
            }
            Some(PayloadTag::ThreadName(tid)) => {
                let name = String::from_utf8_lossy(bytes).trim().to_string();
                self.set_thread_name(Tid(tid), name);
                Ok(())
            }
            None => Err(DecodeError::InvalidTag { offset: 0 }),
        }
    }

    pub fn push_events(&mut self, tid: Tid, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.push_event(tid, event);
        }
    }

    pub fn push_event(&mut self, tid: Tid, event: Event) {
        let function = FunctionId(event.function_id());
        let at = Timestamp(u64::from(event.magnitude()));
        let stack = self.stacks.entry(tid).or_default();

        match event.phase() {
            Phase::Enter => stack.push(OpenCall { tid, function, start: at }),
            Phase::Exit => match stack.pop() {
                Some(open) => self.spans.push(CallSpan {
                    tid,
                    function: open.function,
                    start: open.start,
                    duration: at.since(open.start),
                }),
                None => {
                    error!("{tid}: exit of {function} at {at} without a matching enter");
                    self.orphan_exits += 1;
                }
            },
        }
    }

    pub fn set_thread_name(&mut self, tid: Tid, name: String) {
        debug!("{tid} is {name}");
        self.thread_names.insert(tid, name);
    }

    /// Close out all stacks
    #[must_use]
    pub fn finish(self) -> TraceData {
        let mut unfinished: Vec<OpenCall> = self.stacks.into_values().flatten().collect();
        unfinished.sort_by_key(|call| (call.tid, call.start));
        if !unfinished.is_empty() {
            error!("{} calls never returned", unfinished.len());
        }
        info!(
            "Decoded {} calls on {} threads ({} unfinished, {} orphan exits)",
            self.spans.len(),
            self.thread_names.len(),
            unfinished.len(),
            self.orphan_exits
        );

        TraceData {
            spans: self.spans,
            unfinished,
            thread_names: self.thread_names,
            orphan_exits: self.orphan_exits,
        }
    }
}
