//! Directory listing and rescan
//!
//! Listing seeds a watch group's first snapshot. Rescan recovers from a
//! backend overflow: the directory is listed again and diffed against the
//! last snapshot, and the differences come back as synthetic raw events
//! that go through the correlator like any other batch.

use crate::event::{RawKind, WatchEvent};
use crate::identity::Snapshot;
use ahash::AHashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Regular files under `dir` (direct children unless `recursive`)
pub fn list_files(dir: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(dir).follow_links(false).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // Vanished entries and unreadable subdirectories are skipped
                warn!(dir = %dir.display(), error = %e, "Directory listing error");
                continue;
            }
        };
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    files
}

/// Raw events reconciling `snapshot` with what is on disk now.
///
/// Paths missing from disk become Delete, new paths Create, and paths present
/// in both Modify (the correlator turns those into renames or true modifies
/// depending on identity).
pub fn rescan_events(dir: &Path, recursive: bool, snapshot: &Snapshot) -> Vec<WatchEvent> {
    let on_disk = list_files(dir, recursive);
    let present: AHashSet<&Path> = on_disk.iter().map(PathBuf::as_path).collect();

    let mut events: Vec<WatchEvent> = snapshot
        .iter()
        .filter(|(path, _)| !present.contains(path))
        .map(|(path, _)| WatchEvent::new(path, RawKind::Delete))
        .collect();

    for path in &on_disk {
        let kind = if snapshot.get(path).is_some() {
            RawKind::Modify
        } else {
            RawKind::Create
        };
        events.push(WatchEvent::new(path.clone(), kind));
    }

    debug!(
        dir = %dir.display(),
        files = on_disk.len(),
        events = events.len(),
        "Rescanned directory"
    );
    events
}
