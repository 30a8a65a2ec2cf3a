//! Tracked file instances and their lifecycle metadata

use crate::stream::FileTailStream;
use chrono::{DateTime, Utc};
use logtrail_core::FileKey;
use logtrail_watcher::MonitorHandle;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use ulid::Ulid;

/// Snapshot of one tracked file, as reported by `list_content_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentInfo {
    /// Stable id of the logical file, unchanged across renames
    pub logical_id: Ulid,
    /// Path the file had when it was first tracked
    pub original_path: PathBuf,
    pub current_path: PathBuf,
    pub last_modified: Option<DateTime<Utc>>,
    /// File length in bytes
    pub length: u64,
    /// Offset after the last delivered line
    pub byte_offset: u64,
}

/// One logical file followed by a folder tail
pub(crate) struct FileInstance {
    pub logical_id: Ulid,
    pub key: FileKey,
    pub original_path: PathBuf,
    pub current_path: PathBuf,
    pub stream: Arc<FileTailStream>,
    /// Keeps events for `key` routed to the folder tail
    pub monitor: Option<MonitorHandle>,
    last_modified: Option<DateTime<Utc>>,
    length: u64,
}

impl FileInstance {
    pub fn new(
        logical_id: Ulid,
        key: FileKey,
        path: PathBuf,
        stream: Arc<FileTailStream>,
        monitor: Option<MonitorHandle>,
    ) -> Self {
        let mut instance = Self {
            logical_id,
            key,
            original_path: path.clone(),
            current_path: path,
            stream,
            monitor,
            last_modified: None,
            length: 0,
        };
        instance.refresh();
        instance
    }

    /// Re-stat the current path. Keeps the cached values if it is gone.
    pub fn refresh(&mut self) {
        if let Ok(metadata) = std::fs::metadata(&self.current_path) {
            self.length = metadata.len();
            self.last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);
        }
    }

    /// The file now lives at `path` and is read by `stream`
    pub fn moved(&mut self, path: &Path, stream: Arc<FileTailStream>) {
        self.current_path = path.to_path_buf();
        self.stream = stream;
        self.refresh();
    }

    pub fn info(&self) -> ContentInfo {
        ContentInfo {
            logical_id: self.logical_id,
            original_path: self.original_path.clone(),
            current_path: self.current_path.clone(),
            last_modified: self.last_modified,
            length: self.length,
            byte_offset: self.stream.position().offset,
        }
    }

    /// Stop following the file
    pub fn close(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.close();
        }
        self.stream.close();
    }
}
