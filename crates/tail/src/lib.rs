//! Line tailing for logtrail
//!
//! This crate provides:
//! - Single-file tail streams (blocking, timed and bulk reads)
//! - Aggregating streams over a directory or an explicit set of files
//! - Folder membership that follows renames, rotations and deletions
//! - Lifecycle metadata of tracked files
//! - The [`Tailer`] entry point

pub mod aggregate;
pub mod folder;
pub mod instance;
pub mod stream;
pub mod tailer;

// Re-exports
pub use aggregate::{AggregateLines, AggregateTailStream, SourceId};
pub use folder::FolderTail;
pub use instance::ContentInfo;
pub use stream::{FileTailStream, Lines, StreamOptions};
pub use tailer::Tailer;
