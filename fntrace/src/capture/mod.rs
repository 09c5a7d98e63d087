//! In-process call/return capture
//!
//! The instrumentation engine calls [`CaptureEngine::on_enter`] and
//! [`CaptureEngine::on_leave`] around every traced function. Events go into a
//! per-thread [`EventBuffer`] and reach the host through a [`Sink`] in
//! batches: when a buffer fills, when its thread exits, or on
//! [`CaptureEngine::flush_all`].
//!
//! ```rust,ignore
//! let engine = CaptureEngine::attach(CaptureConfig::default());
//! engine.set_sink(RecordFileSink::create("trace.rec")?);
//! let id = engine.register_function(key, "_Z3fooi", Some("libfoo.so".into()))?;
//!
//! engine.on_enter(&id);
//! // ... traced call ...
//! engine.on_leave(&id);
//!
//! engine.detach();
//! ```

pub mod buffer;
pub mod engine;
pub mod functions;
pub mod registry;
pub mod sink;
pub mod thread_info;

pub use buffer::EventBuffer;
pub use engine::{CaptureConfig, CaptureEngine, InvocationContext, ThreadRecorder, DEFAULT_BUFFER_CAPACITY};
pub use functions::{FunctionTable, TracedFunction};
pub use registry::BufferRegistry;
pub use sink::{write_record, ChannelSink, Payload, RecordFileSink, Sink, RECORD_HEADER_SIZE};
