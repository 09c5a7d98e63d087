//! # Event Capture Engine
//!
//! Entry points invoked by the instrumentation engine on every traced call
//! and return. Each call appends one packed [`Event`] to the calling
//! thread's buffer; nothing on that path allocates (after the thread's first
//! event), touches the registry, or can panic.
//!
//! ## Lifecycle
//!
//! ```text
//! attach ──► CaptureEngine (baseline captured)
//!               │
//!               ├── on_enter/on_leave ──► thread-local ThreadRecorder ──► EventBuffer
//!               │                          (created on first event)         │ full
//!               │                                                           ▼
//!               ├── flush_all ──► BufferRegistry ──► every EventBuffer ──► Sink
//!               │
//! thread exit ──► ThreadRecorder::drop ──► flush + thread-name payload ──► Sink
//! ```

use fntrace_common::{Event, PayloadTag, Phase};
use log::{debug, info};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use super::buffer::EventBuffer;
use super::functions::FunctionTable;
use super::registry::{BufferId, BufferRegistry, SharedBuffer};
use super::sink::Sink;
use super::thread_info::{current_tid, thread_name};
use crate::domain::{CaptureError, FunctionId, Tid};

/// Default per-thread buffer capacity, in events
pub const DEFAULT_BUFFER_CAPACITY: usize = 128 * 1024;

/// Capture engine configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Events held per thread before a synchronous flush
    pub buffer_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { buffer_capacity: DEFAULT_BUFFER_CAPACITY }
    }
}

impl CaptureConfig {
    /// Set the per-thread buffer capacity (clamped to at least one event)
    #[must_use]
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }
}

/// What the instrumentation engine hands to `on_enter`/`on_leave`
///
/// Only the identity of the intercepted function is exposed.
pub trait InvocationContext {
    fn function_id(&self) -> FunctionId;
}

impl InvocationContext for FunctionId {
    fn function_id(&self) -> FunctionId {
        *self
    }
}

struct EngineShared {
    baseline: Instant,
    config: CaptureConfig,
    sink: RwLock<Option<Arc<dyn Sink>>>,
    registry: BufferRegistry,
    functions: Mutex<FunctionTable>,
}

impl EngineShared {
    fn sink(&self) -> Option<Arc<dyn Sink>> {
        self.sink.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Microseconds since attach, truncated to the 32-bit wire field.
    ///
    /// Wraps silently after ~35 minutes. Zero is bumped to one because the
    /// phase lives in the sign.
    #[allow(clippy::cast_possible_truncation)]
    fn elapsed_micros(&self) -> i32 {
        let truncated = self.baseline.elapsed().as_micros() as i32;
        if truncated == 0 {
            1
        } else {
            truncated
        }
    }

    fn event(&self, function: FunctionId, phase: Phase) -> Event {
        Event::new(function.0, self.elapsed_micros(), phase)
    }
}

/// Engine context created at attach and shared by every traced thread
///
/// Cloning is cheap and yields another handle to the same engine.
#[derive(Clone)]
pub struct CaptureEngine {
    shared: Arc<EngineShared>,
}

thread_local! {
    static CURRENT: RefCell<Option<ThreadRecorder>> = const { RefCell::new(None) };
}

impl CaptureEngine {
    /// Start a capture session. The timestamp baseline is taken here.
    #[must_use]
    pub fn attach(config: CaptureConfig) -> Self {
        info!("attach: buffer capacity {} events", config.buffer_capacity);
        Self {
            shared: Arc::new(EngineShared {
                baseline: Instant::now(),
                config,
                sink: RwLock::new(None),
                registry: BufferRegistry::new(),
                functions: Mutex::new(FunctionTable::new()),
            }),
        }
    }

    /// Register the transport sink. Until one is set, flushed events are
    /// dropped.
    pub fn set_sink<S: Sink + 'static>(&self, sink: S) {
        self.set_shared_sink(Arc::new(sink));
    }

    /// Register a sink the caller keeps its own handle to
    pub fn set_shared_sink(&self, sink: Arc<dyn Sink>) {
        *self.shared.sink.write().unwrap_or_else(PoisonError::into_inner) = Some(sink);
    }

    /// Unregister the sink; subsequent flushes drop their events
    pub fn clear_sink(&self) {
        *self.shared.sink.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Assign an event identifier to an instrumented function.
    ///
    /// `key` is whatever the instrumentation side uses to tell functions
    /// apart. It is stored, never dereferenced.
    ///
    /// # Errors
    /// Returns [`CaptureError::TooManyFunctions`] past 65536 functions
    pub fn register_function(
        &self,
        key: u64,
        name: impl Into<String>,
        module: Option<String>,
    ) -> Result<FunctionId, CaptureError> {
        self.shared
            .functions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(key, name, module)
    }

    /// Snapshot of the function table, for saving next to a recording
    #[must_use]
    pub fn function_table(&self) -> FunctionTable {
        self.shared.functions.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Create an explicit recorder for the calling thread.
    ///
    /// The recorder is released (flushed, named, unregistered) when dropped.
    /// Do not mix an explicit recorder with the `on_enter`/`on_leave` entry
    /// points on the same thread, or the thread ends up with two buffers.
    #[must_use]
    pub fn register_thread(&self) -> ThreadRecorder {
        ThreadRecorder::register(&self.shared)
    }

    /// Instrumentation hook: function entry
    pub fn on_enter<C: InvocationContext + ?Sized>(&self, ctx: &C) {
        self.record_event(ctx.function_id(), Phase::Enter);
    }

    /// Instrumentation hook: function return
    pub fn on_leave<C: InvocationContext + ?Sized>(&self, ctx: &C) {
        self.record_event(ctx.function_id(), Phase::Exit);
    }

    /// Append one event to the calling thread's buffer, creating the buffer
    /// on the thread's first event.
    pub fn record_event(&self, function: FunctionId, phase: Phase) {
        // Fails only while the thread's locals are being destroyed
        let _ = CURRENT.try_with(|slot| {
            // Re-entered from inside a sink on this thread: drop the event
            let Ok(mut slot) = slot.try_borrow_mut() else {
                return;
            };
            if !slot.as_ref().is_some_and(|recorder| recorder.belongs_to(&self.shared)) {
                *slot = Some(ThreadRecorder::register(&self.shared));
            }
            if let Some(recorder) = slot.as_mut() {
                recorder.record(function, phase);
            }
        });
    }

    /// Flush every live buffer from the calling thread.
    ///
    /// Returns the number of buffers visited.
    pub fn flush_all(&self) -> usize {
        let sink = self.shared.sink();
        self.shared.registry.flush_all(sink.as_deref())
    }

    /// Number of threads that currently own a buffer
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.shared.registry.len()
    }

    /// Instant all event timestamps are relative to
    #[must_use]
    pub fn baseline(&self) -> Instant {
        self.shared.baseline
    }

    /// End the session: release the calling thread's recorder and drain
    /// whatever other threads still hold.
    ///
    /// Threads that already exited flushed on their own teardown.
    pub fn detach(self) {
        let _ = CURRENT.try_with(|slot| {
            if let Ok(mut slot) = slot.try_borrow_mut() {
                if slot.as_ref().is_some_and(|recorder| recorder.belongs_to(&self.shared)) {
                    *slot = None;
                }
            }
        });
        let remaining = self.flush_all();
        info!("detach: flushed {remaining} live buffers");
    }
}

/// Per-thread capture handle
///
/// Owns the thread's [`EventBuffer`] registration. Dropping it (explicitly,
/// or at thread exit for the lazily created one) unregisters the buffer,
/// flushes what is left and emits the thread's name under a negative tag.
/// Not `Send`: a recorder stays on the thread that created it.
pub struct ThreadRecorder {
    shared: Arc<EngineShared>,
    buffer: SharedBuffer,
    id: BufferId,
    tid: Tid,
    _not_send: PhantomData<*const ()>,
}

impl ThreadRecorder {
    fn register(shared: &Arc<EngineShared>) -> Self {
        let tid = current_tid();
        let buffer = Arc::new(Mutex::new(EventBuffer::new(tid, shared.config.buffer_capacity)));
        let id = shared.registry.insert(Arc::clone(&buffer));
        debug!("{tid} registered event buffer");
        Self { shared: Arc::clone(shared), buffer, id, tid, _not_send: PhantomData }
    }

    fn belongs_to(&self, shared: &Arc<EngineShared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    pub fn on_enter<C: InvocationContext + ?Sized>(&mut self, ctx: &C) {
        self.record(ctx.function_id(), Phase::Enter);
    }

    pub fn on_leave<C: InvocationContext + ?Sized>(&mut self, ctx: &C) {
        self.record(ctx.function_id(), Phase::Exit);
    }

    /// Append one event; a full buffer is flushed on this thread before
    /// returning.
    pub fn record(&mut self, function: FunctionId, phase: Phase) {
        let event = self.shared.event(function, phase);
        // Only flush_all locks this buffer from another thread; outside a
        // flush the lock is uncontended and no registry lock is taken.
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.push(event) {
            let sink = self.shared.sink();
            buffer.flush(sink.as_deref());
        }
    }

    #[must_use]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Events buffered since the last flush
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for ThreadRecorder {
    fn drop(&mut self) {
        self.shared.registry.remove(self.id);

        let sink = self.shared.sink();
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).flush(sink.as_deref());

        if let Some(sink) = sink {
            let name = thread_name(self.tid);
            sink.send(name.as_bytes(), PayloadTag::ThreadName(self.tid.0).to_raw());
        }
        debug!("{} released event buffer", self.tid);
    }
}
