//! Transport sinks
//!
//! A sink receives raw byte payloads plus the signed tag described by
//! [`PayloadTag`]. The embedding host owns it; the capture engine only calls
//! it. Sinks never report failure back to the capture path: a sink that
//! cannot deliver logs and drops the payload.

use crossbeam_channel::{Receiver, Sender};
use fntrace_common::PayloadTag;
use log::warn;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Destination for flushed event batches and thread-name payloads
///
/// Called synchronously on the flushing thread. Implementations must not
/// call back into [`CaptureEngine::flush_all`](super::CaptureEngine::flush_all).
pub trait Sink: Send + Sync {
    fn send(&self, payload: &[u8], tag: i32);
}

impl<F> Sink for F
where
    F: Fn(&[u8], i32) + Send + Sync,
{
    fn send(&self, payload: &[u8], tag: i32) {
        self(payload, tag);
    }
}

/// Owned copy of one sink call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub tag: i32,
    pub bytes: Vec<u8>,
}

impl Payload {
    /// Decoded tag, `None` for the invalid tag `0`
    #[must_use]
    pub fn kind(&self) -> Option<PayloadTag> {
        PayloadTag::from_raw(self.tag)
    }
}

/// Sink forwarding owned payloads over a channel
///
/// Useful when the consumer lives on another thread (or in tests).
pub struct ChannelSink {
    tx: Sender<Payload>,
}

impl ChannelSink {
    /// Create an unbounded sink and the receiving end of its channel
    #[must_use]
    pub fn unbounded() -> (Self, Receiver<Payload>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn send(&self, payload: &[u8], tag: i32) {
        // Receiver gone: nobody is listening anymore, drop silently
        let _ = self.tx.send(Payload { tag, bytes: payload.to_vec() });
    }
}

/// Size of the framing header written before every record
pub const RECORD_HEADER_SIZE: usize = 8;

/// Sink appending framed records to a file
///
/// Each record is `tag: i32`, `len: u32` (host-native order) followed by
/// `len` payload bytes. [`crate::trace_data::RecordReader`] reads them back.
pub struct RecordFileSink {
    writer: Mutex<BufWriter<File>>,
}

impl RecordFileSink {
    /// Create (truncate) the recording file
    ///
    /// # Errors
    /// Returns an error if the file cannot be created
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self { writer: Mutex::new(BufWriter::new(file)) })
    }

    /// Flush buffered records to disk
    ///
    /// # Errors
    /// Returns an error if the underlying write fails
    pub fn sync(&self) -> std::io::Result<()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner).flush()
    }
}

/// Frame one payload into `writer`
///
/// # Errors
/// Returns an error if the payload is larger than `u32::MAX` bytes or the
/// write fails
pub fn write_record<W: Write>(writer: &mut W, tag: i32, payload: &[u8]) -> std::io::Result<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "payload too large"))?;
    writer.write_all(&tag.to_ne_bytes())?;
    writer.write_all(&len.to_ne_bytes())?;
    writer.write_all(payload)
}

impl Sink for RecordFileSink {
    fn send(&self, payload: &[u8], tag: i32) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = write_record(&mut *writer, tag, payload) {
            warn!("Dropping {} byte payload (tag {tag}): {e}", payload.len());
        }
    }
}

impl Drop for RecordFileSink {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            warn!("Failed to flush recording: {e}");
        }
    }
}
