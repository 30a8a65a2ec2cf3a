//! Core types for logtrail
//!
//! This crate provides:
//! - File identity keys (native and content-signature)
//! - BLAKE3 digests for content signatures
//! - Line records and sinks with backpressure
//! - The buffered line reader
//! - The coalescing change notification queue
//! - Reader positions and the offset store contract
//! - Configuration

pub mod config;
pub mod error;
pub mod hash;
pub mod key;
pub mod line;
pub mod position;
pub mod queue;
pub mod reader;

// Re-exports
pub use config::TailConfig;
pub use error::{Error, Result};
pub use hash::Blake3Hash;
pub use key::{ContentSignature, FileKey, NativeId, SignatureMatch};
pub use line::{BoundedSink, Drain, Line, LineSink, LineSource};
pub use position::{MemoryOffsetStore, OffsetStore, ReaderPosition};
pub use queue::{ChangeQueue, Signal};
pub use reader::LineReader;
