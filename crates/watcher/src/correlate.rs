//! Folder event correlation
//!
//! Turns one batch of name-level raw events into logical events about file
//! identities. Backends only promise "something happened to this name"; a
//! rename can arrive as a bare delete plus a bare create, and a fast
//! rotate-and-recreate can collapse into a single modify. Identity before the
//! batch (history) and after it (current) is what recovers the causality.
//!
//! Output of one pass is sorted Delete < RenameFrom < RenameTo < Create <
//! Modify so that downstream bookkeeping sees every departure of a key before
//! its arrival elsewhere, and content changes last.

use crate::event::{LogicalEvent, LogicalKind, RawKind, WatchEvent};
use crate::identity::Resolution;
use ahash::{AHashMap, AHashSet};
use logtrail_core::FileKey;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Per-folder correlation state
#[derive(Debug, Default)]
pub struct FolderCorrelator {
    /// Keys that left a path in the previous batch, and where from. Lets a
    /// rename split across two batches come out as RenamedTo instead of
    /// Created.
    departed: AHashMap<FileKey, PathBuf>,
}

impl FolderCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Correlate one batch
    pub fn correlate(
        &mut self,
        batch: &[WatchEvent],
        resolution: &mut Resolution<'_>,
    ) -> Vec<LogicalEvent> {
        // Resolve every touched name up front so the result does not depend
        // on the order the backend delivered events in
        for raw in batch {
            resolution.resolve(&raw.path);
        }

        let mut pass = Pass {
            out: Vec::with_capacity(batch.len()),
            departed: &self.departed,
            deleted: batch
                .iter()
                .filter(|raw| raw.kind == RawKind::Delete)
                .map(|raw| raw.path.as_path())
                .collect(),
        };

        for raw in batch {
            let current = resolution.resolve(&raw.path);
            let history = resolution.history(&raw.path);
            trace!(path = %raw.path.display(), kind = ?raw.kind, ?history, ?current, "Correlating");

            match raw.kind {
                RawKind::Delete => pass.on_delete(raw, history, current, resolution),
                RawKind::Modify => pass.on_modify(raw, history, current, resolution),
                RawKind::Create => pass.on_create(raw, history, current, resolution),
            }
        }

        let mut events = pass.out;
        events.sort_by_key(|e| e.kind.priority());
        dedup(&mut events);

        self.departed = events
            .iter()
            .filter(|e| e.kind.is_departure())
            .map(|e| (e.key, e.path.clone()))
            .collect();
        events
    }
}

struct Pass<'b> {
    out: Vec<LogicalEvent>,
    departed: &'b AHashMap<FileKey, PathBuf>,
    /// Names with a delete anywhere in the batch
    deleted: AHashSet<&'b Path>,
}

impl Pass<'_> {
    fn emit(&mut self, kind: LogicalKind, key: FileKey, raw: &WatchEvent) {
        self.out
            .push(LogicalEvent::new(kind, key, raw.path.clone(), raw));
    }

    fn on_delete(
        &mut self,
        raw: &WatchEvent,
        history: Option<FileKey>,
        current: Option<FileKey>,
        resolution: &mut Resolution<'_>,
    ) {
        let Some(history) = history else {
            // Untracked name; a create in the same batch covers whatever is there now
            return;
        };
        match current {
            None => self.departure(history, raw, resolution),
            // Removed and recreated under the same name with a reused identity
            Some(current) if current == history => {
                self.emit(LogicalKind::Deleted, history, raw);
                self.emit(LogicalKind::Created, current, raw);
            }
            Some(current) => {
                self.departure(history, raw, resolution);
                self.arrival(current, raw, resolution);
            }
        }
    }

    fn on_modify(
        &mut self,
        raw: &WatchEvent,
        history: Option<FileKey>,
        current: Option<FileKey>,
        resolution: &mut Resolution<'_>,
    ) {
        match (history, current) {
            (None, None) => {}
            // Gone already; the delete may only show up in a later batch
            (Some(history), None) => self.departure(history, raw, resolution),
            (Some(history), Some(current)) if history == current => {
                self.emit(LogicalKind::Modified, current, raw);
            }
            (history, Some(current)) => {
                if let Some(history) = history {
                    self.departure(history, raw, resolution);
                }
                self.arrival(current, raw, resolution);
                self.emit(LogicalKind::Modified, current, raw);
            }
        }
    }

    fn on_create(
        &mut self,
        raw: &WatchEvent,
        history: Option<FileKey>,
        current: Option<FileKey>,
        resolution: &mut Resolution<'_>,
    ) {
        let Some(current) = current else {
            trace!(path = %raw.path.display(), "Created path vanished before resolution");
            return;
        };
        match history {
            Some(history) if history == current => {
                // Without a delete of this name nothing arrived; treat as a change
                if !self.deleted.contains(raw.path.as_path()) {
                    self.emit(LogicalKind::Modified, current, raw);
                }
            }
            Some(history) => {
                self.departure(history, raw, resolution);
                self.arrival(current, raw, resolution);
            }
            None => self.arrival(current, raw, resolution),
        }
    }

    /// `key` left `raw.path`: renamed if it still exists under another name
    fn departure(&mut self, key: FileKey, raw: &WatchEvent, resolution: &mut Resolution<'_>) {
        if resolution.holder_of(&key, &raw.path).is_some() {
            self.emit(LogicalKind::RenamedFrom, key, raw);
        } else {
            self.emit(LogicalKind::Deleted, key, raw);
        }
    }

    /// `key` arrived at `raw.path`: renamed if it was known under another name
    fn arrival(&mut self, key: FileKey, raw: &WatchEvent, resolution: &mut Resolution<'_>) {
        let moved_here = resolution.previous_holder_of(&key, &raw.path).is_some()
            || self.departed_elsewhere(&key, &raw.path);
        if moved_here {
            self.emit(LogicalKind::RenamedTo, key, raw);
        } else {
            self.emit(LogicalKind::Created, key, raw);
        }
    }

    fn departed_elsewhere(&self, key: &FileKey, path: &Path) -> bool {
        self.departed
            .get(key)
            .map_or(false, |from| from.as_path() != path)
    }
}

/// Drop repeated (kind, key, path) triples, keeping the first
fn dedup(events: &mut Vec<LogicalEvent>) {
    let mut seen = AHashSet::with_capacity(events.len());
    events.retain(|e| seen.insert((e.kind, e.key, e.path.clone())));
}
