//! Persistent reader positions for logtrail
//!
//! This crate provides:
//! - A sled-backed [`OffsetStore`](logtrail_core::OffsetStore)
//! - Opening the configured store (persistent or in-memory)

pub mod store;

// Re-exports
pub use store::{SledOffsetStore, StoredPosition};

use logtrail_core::config::OffsetsConfig;
use logtrail_core::{MemoryOffsetStore, OffsetStore, Result};
use std::sync::Arc;

/// Store selected by config: sled when a path is set, memory otherwise
pub fn open_store(config: &OffsetsConfig) -> Result<Arc<dyn OffsetStore>> {
    match &config.path {
        Some(path) => Ok(Arc::new(SledOffsetStore::open(path)?)),
        None => Ok(Arc::new(MemoryOffsetStore::new())),
    }
}
