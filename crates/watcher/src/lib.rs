//! File system watching for logtrail
//!
//! This crate turns raw `notify` events into logical file events:
//! - Identity resolution (native device/inode or content signature)
//! - Per-batch correlation of name-level events into renames, rotations,
//!   creates, deletes and modifies
//! - One watch group per directory with a monitor registry and tick counters
//! - Overflow recovery by rescanning the directory
//! - Path filtering for folder membership

pub mod correlate;
pub mod event;
pub mod filter;
pub mod group;
pub mod identity;
pub mod monitor;
pub mod scan;
pub mod service;

pub use correlate::FolderCorrelator;
pub use event::{LogicalEvent, LogicalKind, RawKind, WatchEvent};
pub use filter::{PathFilter, PathPredicate};
pub use group::{GroupOptions, WatchGroup};
pub use identity::{
    IdentityResolver, IdentityStrategy, NativeStrategy, Resolution, SignatureStrategy, Snapshot,
};
pub use monitor::{EventListener, MonitorHandle, MonitorId, MonitorMode};
pub use service::WatchService;
