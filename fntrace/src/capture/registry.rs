//! Process-wide set of live event buffers
//!
//! Only touched when a thread's buffer is created or torn down and on an
//! explicit global flush. The per-event path never takes the registry lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::buffer::EventBuffer;
use super::sink::Sink;

/// Shared handle to one thread's buffer
///
/// The owning thread is the only writer. The mutex exists so a coordinated
/// [`BufferRegistry::flush_all`] driven from another thread can drain the
/// buffer soundly; outside of that it is never contended.
pub type SharedBuffer = Arc<Mutex<EventBuffer>>;

/// Registry key for a live buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

#[derive(Default)]
pub struct BufferRegistry {
    buffers: Mutex<HashMap<BufferId, SharedBuffer>>,
    next_id: AtomicU64,
}

impl BufferRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly created buffer
    pub fn insert(&self, buffer: SharedBuffer) -> BufferId {
        let id = BufferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner).insert(id, buffer);
        id
    }

    /// Stop tracking a buffer (thread teardown)
    pub fn remove(&self, id: BufferId) -> Option<SharedBuffer> {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner).remove(&id)
    }

    /// Flush every live buffer in turn while holding the registry lock.
    ///
    /// Returns the number of buffers visited.
    pub fn flush_all(&self, sink: Option<&dyn Sink>) -> usize {
        let buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        for buffer in buffers.values() {
            buffer.lock().unwrap_or_else(PoisonError::into_inner).flush(sink);
        }
        buffers.len()
    }

    /// Number of live buffers
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
