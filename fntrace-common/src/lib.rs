//! # Shared Wire Format (capture engine ↔ decoder)
//!
//! Defines the records exchanged between the in-process capture engine and
//! whatever consumes the Transport Sink (a live host, or the offline decoder
//! reading a recording). Everything here is plain data with a fixed layout so
//! both sides agree byte-for-byte.
//!
//! ## Key Types
//!
//! - [`Event`] - One packed call/return record (6 bytes, no padding)
//! - [`Phase`] - Enter/exit, carried in the sign of the timestamp
//! - [`PayloadTag`] - The `tag` argument handed to the sink with each payload

#![cfg_attr(not(test), no_std)]

// ============================================================================
// Constants
// ============================================================================

/// Size of one [`Event`] on the wire, in bytes.
///
/// `function_id: u16` followed by `timestamp: i32`, host-native byte order,
/// no padding. Decoders must match this layout exactly.
pub const EVENT_SIZE: usize = 6;

/// Number of distinct function identifiers representable by an [`Event`].
///
/// Identifiers are `u16`, so a single trace session can instrument at most
/// this many functions.
pub const MAX_FUNCTIONS: usize = 1 << 16;

const _: () = assert!(core::mem::size_of::<Event>() == EVENT_SIZE);

// ============================================================================
// Event
// ============================================================================

/// Which side of a call an [`Event`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Function entry (positive timestamp)
    Enter,
    /// Function return (negative timestamp)
    Exit,
}

impl Phase {
    /// Sign applied to the timestamp magnitude for this phase.
    #[must_use]
    pub const fn sign(self) -> i32 {
        match self {
            Phase::Enter => 1,
            Phase::Exit => -1,
        }
    }
}

/// Packed call/return record written to the per-thread event buffers.
///
/// **Memory Layout**: `#[repr(C, packed)]`, exactly [`EVENT_SIZE`] bytes.
/// Fields must be copied out before use; never take references to them.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Event {
    /// Identifier assigned by the capture engine's function table
    pub function_id: u16,

    /// Signed time since the session baseline
    ///
    /// **Value**:
    /// - Positive: function entry, magnitude = elapsed time
    /// - Negative: function exit, magnitude = elapsed time
    ///
    /// 32 bits wrap after roughly 35 minutes at microsecond resolution.
    pub timestamp: i32,
}

impl Event {
    /// Build an event from an unsigned magnitude and a phase.
    #[must_use]
    pub const fn new(function_id: u16, magnitude: i32, phase: Phase) -> Self {
        Self { function_id, timestamp: magnitude.wrapping_mul(phase.sign()) }
    }

    /// Function identifier (copied out of the packed struct)
    #[must_use]
    pub const fn function_id(&self) -> u16 {
        self.function_id
    }

    /// Raw signed timestamp (copied out of the packed struct)
    #[must_use]
    pub const fn timestamp(&self) -> i32 {
        self.timestamp
    }

    /// Phase encoded in the timestamp sign. Zero decodes as an exit.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        if self.timestamp > 0 {
            Phase::Enter
        } else {
            Phase::Exit
        }
    }

    /// Elapsed time since the baseline, without the phase sign.
    #[must_use]
    pub const fn magnitude(&self) -> u32 {
        self.timestamp.unsigned_abs()
    }

    /// Serialize in host-native byte order.
    #[must_use]
    pub fn to_ne_bytes(&self) -> [u8; EVENT_SIZE] {
        let id = self.function_id().to_ne_bytes();
        let ts = self.timestamp().to_ne_bytes();
        [id[0], id[1], ts[0], ts[1], ts[2], ts[3]]
    }

    /// Deserialize from host-native byte order.
    #[must_use]
    pub fn from_ne_bytes(bytes: [u8; EVENT_SIZE]) -> Self {
        Self {
            function_id: u16::from_ne_bytes([bytes[0], bytes[1]]),
            timestamp: i32::from_ne_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]),
        }
    }

    /// Iterate over the whole events contained in an event-batch payload.
    ///
    /// Trailing bytes that do not form a full event are ignored; callers that
    /// care can check `bytes.len() % EVENT_SIZE`.
    pub fn iter_packed(bytes: &[u8]) -> impl Iterator<Item = Event> + '_ {
        bytes.chunks_exact(EVENT_SIZE).map(|chunk| {
            let mut raw = [0u8; EVENT_SIZE];
            raw.copy_from_slice(chunk);
            Event::from_ne_bytes(raw)
        })
    }
}

impl core::fmt::Debug for Event {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Event")
            .field("function_id", &self.function_id())
            .field("timestamp", &self.timestamp())
            .finish()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.function_id() == other.function_id() && self.timestamp() == other.timestamp()
    }
}

impl Eq for Event {}

// ============================================================================
// Sink payload tags
// ============================================================================

/// Meaning of the `tag` passed to the Transport Sink alongside a payload.
///
/// **Value on the wire**:
/// - `tag > 0`: payload is a batch of packed [`Event`]s for thread `tag`
/// - `tag < 0`: payload is the UTF-8 name of thread `-tag`
/// - `0`: never emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadTag {
    /// Packed events recorded by the thread with this id
    Events(u32),
    /// Human-readable name of the thread with this id
    ThreadName(u32),
}

impl PayloadTag {
    /// Encode as the signed sink tag.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn to_raw(self) -> i32 {
        match self {
            PayloadTag::Events(tid) => tid as i32,
            PayloadTag::ThreadName(tid) => (tid as i32).wrapping_neg(),
        }
    }

    /// Decode a signed sink tag. Returns `None` for `0`.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        if raw > 0 {
            Some(PayloadTag::Events(raw.unsigned_abs()))
        } else if raw < 0 {
            Some(PayloadTag::ThreadName(raw.unsigned_abs()))
        } else {
            None
        }
    }

    /// Thread id carried by the tag
    #[must_use]
    pub const fn tid(self) -> u32 {
        match self {
            PayloadTag::Events(tid) | PayloadTag::ThreadName(tid) => tid,
        }
    }
}
