//! Raw and logical file events
//!
//! Raw events ([`WatchEvent`]) only say "something happened to this name".
//! Logical events ([`LogicalEvent`]) say what happened to which file, and are
//! produced by the correlator from raw events plus identity resolution.

use logtrail_core::FileKey;
use notify::event::{ModifyKind, RenameMode};
use smallvec::SmallVec;
use std::path::PathBuf;

/// Name-level change reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawKind {
    Create,
    Modify,
    Delete,
}

/// File system event normalised from the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchEvent {
    /// Path that changed
    pub path: PathBuf,
    /// Type of change
    pub kind: RawKind,
}

impl WatchEvent {
    pub fn new(path: impl Into<PathBuf>, kind: RawKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Split a `notify` event into name-level raw events.
///
/// Rename pairs become a Delete of the old name and a Create of the new one;
/// the correlator recovers the rename from identity. Renames without a
/// direction (poll / FSEvents) are decided by whether the path still exists.
pub fn normalize(event: &notify::Event) -> SmallVec<[WatchEvent; 2]> {
    use notify::EventKind;

    let mut out = SmallVec::new();
    match event.kind {
        EventKind::Access(_) => {}
        EventKind::Create(_) => {
            for path in &event.paths {
                out.push(WatchEvent::new(path.clone(), RawKind::Create));
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                out.push(WatchEvent::new(path.clone(), RawKind::Delete));
            }
        }
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From => {
                for path in &event.paths {
                    out.push(WatchEvent::new(path.clone(), RawKind::Delete));
                }
            }
            RenameMode::To => {
                for path in &event.paths {
                    out.push(WatchEvent::new(path.clone(), RawKind::Create));
                }
            }
            RenameMode::Both if event.paths.len() >= 2 => {
                out.push(WatchEvent::new(event.paths[0].clone(), RawKind::Delete));
                out.push(WatchEvent::new(event.paths[1].clone(), RawKind::Create));
            }
            _ => {
                for path in &event.paths {
                    let kind = if path.exists() {
                        RawKind::Create
                    } else {
                        RawKind::Delete
                    };
                    out.push(WatchEvent::new(path.clone(), kind));
                }
            }
        },
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => {
            for path in &event.paths {
                out.push(WatchEvent::new(path.clone(), RawKind::Modify));
            }
        }
    }
    out
}

/// What happened to a logical file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogicalKind {
    Deleted,
    RenamedFrom,
    RenamedTo,
    Created,
    Modified,
}

impl LogicalKind {
    /// Dispatch priority within one batch: Delete < RenameFrom < RenameTo < Create < Modify
    pub fn priority(self) -> u8 {
        match self {
            LogicalKind::Deleted => 0,
            LogicalKind::RenamedFrom => 1,
            LogicalKind::RenamedTo => 2,
            LogicalKind::Created => 3,
            LogicalKind::Modified => 4,
        }
    }

    /// Whether the file left the path (its stream should stop)
    pub fn is_departure(self) -> bool {
        matches!(self, LogicalKind::Deleted | LogicalKind::RenamedFrom)
    }

    /// Whether the file arrived at the path
    pub fn is_arrival(self) -> bool {
        matches!(self, LogicalKind::Created | LogicalKind::RenamedTo)
    }
}

/// Correlated event tied to a file identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalEvent {
    pub kind: LogicalKind,
    /// Identity the event is about: the departing file for Deleted /
    /// RenamedFrom, the arriving or present file otherwise
    pub key: FileKey,
    /// Path the event happened at (the old name for RenamedFrom, the new
    /// name for RenamedTo)
    pub path: PathBuf,
    /// Raw event this was derived from
    pub raw: WatchEvent,
}

impl LogicalEvent {
    pub fn new(kind: LogicalKind, key: FileKey, path: PathBuf, raw: &WatchEvent) -> Self {
        Self {
            kind,
            key,
            path,
            raw: raw.clone(),
        }
    }
}
