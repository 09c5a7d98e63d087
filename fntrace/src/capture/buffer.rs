//! Per-thread event buffer
//!
//! Fixed-capacity storage for packed events, kept directly in wire format so
//! a flush hands the sink one contiguous slice. The buffer never grows: when
//! the cursor reaches capacity it is flushed and reset.

use fntrace_common::{Event, PayloadTag, EVENT_SIZE};
use log::debug;

use super::sink::Sink;
use crate::domain::Tid;

/// Packed event storage owned by exactly one thread
pub struct EventBuffer {
    /// `capacity * EVENT_SIZE` bytes, allocated once
    bytes: Box<[u8]>,
    /// Number of events written since the last flush
    cursor: usize,
    capacity: usize,
    tid: Tid,
    /// Number of flushes that handed a non-empty batch to a sink
    batches_sent: u64,
}

impl EventBuffer {
    /// Allocate a buffer for `capacity` events.
    ///
    /// Allocation failure aborts the process; there is no recovery path.
    #[must_use]
    pub fn new(tid: Tid, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            bytes: vec![0u8; capacity * EVENT_SIZE].into_boxed_slice(),
            cursor: 0,
            capacity,
            tid,
            batches_sent: 0,
        }
    }

    /// Append one event. Returns `true` when the buffer is now full and must
    /// be flushed before the next write.
    pub fn push(&mut self, event: Event) -> bool {
        let offset = self.cursor * EVENT_SIZE;
        if let Some(slot) = self.bytes.get_mut(offset..offset + EVENT_SIZE) {
            slot.copy_from_slice(&event.to_ne_bytes());
            self.cursor += 1;
        }
        self.cursor >= self.capacity
    }

    /// Hand all buffered events to `sink` as one batch and reset the cursor.
    ///
    /// With no sink registered the events are dropped. An empty buffer sends
    /// nothing.
    pub fn flush(&mut self, sink: Option<&dyn Sink>) {
        debug!("{} flushing {} events", self.tid, self.cursor);
        if let Some(sink) = sink {
            if self.cursor > 0 {
                let batch = &self.bytes[..self.cursor * EVENT_SIZE];
                sink.send(batch, PayloadTag::Events(self.tid.0).to_raw());
                self.batches_sent += 1;
            }
        }
        self.cursor = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    #[must_use]
    pub fn batches_sent(&self) -> u64 {
        self.batches_sent
    }
}
