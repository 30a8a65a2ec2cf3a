//! Reader positions and where they are persisted

use crate::error::Result;
use crate::key::FileKey;
use ahash::AHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Resumption point of a line reader
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderPosition {
    /// Byte offset immediately after the last delivered line
    pub offset: u64,
    /// Number of the last delivered line (0 = none yet)
    pub line_number: u64,
}

impl ReaderPosition {
    pub const fn new(offset: u64, line_number: u64) -> Self {
        Self {
            offset,
            line_number,
        }
    }
}

/// Side-channel association of logical file identity to reader position.
///
/// Read when a stream opens, written when a file is renamed away, cleared when
/// a file is deleted.
pub trait OffsetStore: Send + Sync {
    fn load(&self, key: &FileKey) -> Result<Option<ReaderPosition>>;

    fn save(&self, key: &FileKey, position: ReaderPosition) -> Result<()>;

    fn remove(&self, key: &FileKey) -> Result<()>;
}

/// Process-local offset store
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    positions: Mutex<AHashMap<String, ReaderPosition>>,
}

impl MemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.lock().is_empty()
    }
}

impl OffsetStore for MemoryOffsetStore {
    fn load(&self, key: &FileKey) -> Result<Option<ReaderPosition>> {
        Ok(self.positions.lock().get(&key.storage_key()).copied())
    }

    fn save(&self, key: &FileKey, position: ReaderPosition) -> Result<()> {
        self.positions.lock().insert(key.storage_key(), position);
        Ok(())
    }

    fn remove(&self, key: &FileKey) -> Result<()> {
        self.positions.lock().remove(&key.storage_key());
        Ok(())
    }
}
