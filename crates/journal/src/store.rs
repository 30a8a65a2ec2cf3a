//! Persistent reader positions using sled

use ahash::AHashMap;
use chrono::{DateTime, TimeZone, Utc};
use logtrail_core::{Error, FileKey, OffsetStore, ReaderPosition, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use tracing::{debug, warn};

/// What is stored per identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPosition {
    pub position: ReaderPosition,
    /// Unix milliseconds of the last save
    pub saved_at_ms: i64,
}

impl StoredPosition {
    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.saved_at_ms).single()
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Store(e.to_string()))
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Store(e.to_string()))
    }
}

/// Offset store backed by an embedded sled database.
///
/// Native identities survive restarts and are written through to disk.
/// Content-signature identities are serials local to one process, so their
/// positions are kept in memory only.
pub struct SledOffsetStore {
    db: Db,
    /// In-memory mirror of the database: storage key -> position
    index: RwLock<AHashMap<String, StoredPosition>>,
    volatile: Mutex<AHashMap<String, ReaderPosition>>,
}

impl SledOffsetStore {
    /// Open or create the store in `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db = sled::open(dir.join("offsets.db")).map_err(store_error)?;

        let mut index = AHashMap::new();
        for item in db.iter() {
            let (key, value) = item.map_err(store_error)?;
            let key = String::from_utf8_lossy(&key).into_owned();
            match StoredPosition::deserialize(&value) {
                Ok(stored) => {
                    index.insert(key, stored);
                }
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable offset record"),
            }
        }
        debug!(dir = %dir.display(), entries = index.len(), "Opened offset store");

        Ok(Self {
            db,
            index: RwLock::new(index),
            volatile: Mutex::new(AHashMap::new()),
        })
    }

    /// Persisted entries, sorted by storage key
    pub fn entries(&self) -> Vec<(String, StoredPosition)> {
        let mut entries: Vec<_> = self
            .index
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Number of persisted entries
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry, persisted and volatile
    pub fn clear(&self) -> Result<()> {
        self.db.clear().map_err(store_error)?;
        self.db.flush().map_err(store_error)?;
        self.index.write().clear();
        self.volatile.lock().clear();
        Ok(())
    }
}

impl OffsetStore for SledOffsetStore {
    fn load(&self, key: &FileKey) -> Result<Option<ReaderPosition>> {
        let storage_key = key.storage_key();
        if !key.is_persistent() {
            return Ok(self.volatile.lock().get(&storage_key).copied());
        }
        Ok(self.index.read().get(&storage_key).map(|s| s.position))
    }

    fn save(&self, key: &FileKey, position: ReaderPosition) -> Result<()> {
        let storage_key = key.storage_key();
        if !key.is_persistent() {
            self.volatile.lock().insert(storage_key, position);
            return Ok(());
        }

        let stored = StoredPosition {
            position,
            saved_at_ms: Utc::now().timestamp_millis(),
        };
        self.db
            .insert(storage_key.as_bytes(), stored.serialize()?)
            .map_err(store_error)?;
        // Flush so a crash right after a rotation does not lose the position
        self.db.flush().map_err(store_error)?;
        self.index.write().insert(storage_key, stored);
        Ok(())
    }

    fn remove(&self, key: &FileKey) -> Result<()> {
        let storage_key = key.storage_key();
        if !key.is_persistent() {
            self.volatile.lock().remove(&storage_key);
            return Ok(());
        }
        if self.index.write().remove(&storage_key).is_none() {
            return Ok(()); // Nothing stored
        }
        self.db.remove(storage_key.as_bytes()).map_err(store_error)?;
        self.db.flush().map_err(store_error)?;
        Ok(())
    }
}

fn store_error(e: sled::Error) -> Error {
    Error::Store(e.to_string())
}
