//! Registration entry point
//!
//! Shares one [`WatchGroup`] per canonical directory between all monitors on
//! it; the group is started by the first registration and released when its
//! last monitor closes.

use crate::group::{GroupOptions, WatchGroup};
use crate::monitor::{EventListener, MonitorHandle, MonitorMode};
use dashmap::DashMap;
use logtrail_core::{Error, Result, TailConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub(crate) struct ServiceInner {
    groups: DashMap<PathBuf, Arc<WatchGroup>>,
    options: GroupOptions,
}

impl ServiceInner {
    fn group_for(&self, dir: &Path) -> Result<Arc<WatchGroup>> {
        if let Some(group) = self.groups.get(dir) {
            return Ok(Arc::clone(group.value()));
        }
        let entry = self
            .groups
            .entry(dir.to_path_buf())
            .or_try_insert_with(|| WatchGroup::start(dir.to_path_buf(), &self.options))?;
        Ok(Arc::clone(entry.value()))
    }

    /// Drop `group` from the table if it is still idle
    pub(crate) fn release(&self, group: &Arc<WatchGroup>) {
        let removed = self
            .groups
            .remove_if(group.dir(), |_, g| Arc::ptr_eq(g, group) && g.close_if_idle());
        // Shut down outside the table lock
        if let Some((dir, group)) = removed {
            debug!(dir = %dir.display(), "Releasing idle watch group");
            group.shutdown();
        }
    }
}

/// Hands out monitors on files and folders
#[derive(Clone)]
pub struct WatchService {
    inner: Arc<ServiceInner>,
}

impl WatchService {
    pub fn new(config: &TailConfig) -> Self {
        Self::with_options(GroupOptions::from_config(config))
    }

    pub fn with_options(options: GroupOptions) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                groups: DashMap::new(),
                options,
            }),
        }
    }

    pub fn options(&self) -> &GroupOptions {
        &self.inner.options
    }

    /// Monitor one regular file. Events follow the file's identity across
    /// renames within its directory.
    pub fn register_file(
        &self,
        path: &Path,
        mode: MonitorMode,
        listener: Arc<dyn EventListener>,
    ) -> Result<MonitorHandle> {
        let path = canonical(path)?;
        let metadata = std::fs::metadata(&path)?;
        if !metadata.is_file() {
            return Err(Error::invalid_registration(&path, "not a regular file"));
        }
        let dir = path
            .parent()
            .ok_or_else(|| Error::invalid_registration(&path, "file has no parent directory"))?
            .to_path_buf();
        self.register(dir, Some(path), mode, listener)
    }

    /// Monitor a whole directory
    pub fn register_folder(
        &self,
        path: &Path,
        mode: MonitorMode,
        listener: Arc<dyn EventListener>,
    ) -> Result<MonitorHandle> {
        let dir = canonical(path)?;
        if !dir.is_dir() {
            return Err(Error::invalid_registration(&dir, "not a directory"));
        }
        self.register(dir, None, mode, listener)
    }

    fn register(
        &self,
        dir: PathBuf,
        file: Option<PathBuf>,
        mode: MonitorMode,
        listener: Arc<dyn EventListener>,
    ) -> Result<MonitorHandle> {
        // A group found in the table may be closing; retry once on a fresh one
        for _ in 0..2 {
            let group = self.inner.group_for(&dir)?;
            match group.register(file.as_deref(), mode, Arc::clone(&listener)) {
                Ok((id, key)) => {
                    return Ok(MonitorHandle::new(
                        id,
                        file,
                        key,
                        mode,
                        group,
                        Arc::downgrade(&self.inner),
                    ))
                }
                Err(Error::Closed) => {
                    self.inner
                        .groups
                        .remove_if(&dir, |_, g| Arc::ptr_eq(g, &group));
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Closed)
    }

    /// The group watching `dir`, if any
    pub fn group(&self, dir: &Path) -> Option<Arc<WatchGroup>> {
        let dir = dir.canonicalize().ok()?;
        self.inner.groups.get(&dir).map(|g| Arc::clone(g.value()))
    }

    pub fn group_count(&self) -> usize {
        self.inner.groups.len()
    }

    /// Close every group; outstanding handles become inert
    pub fn close(&self) {
        let groups: Vec<Arc<WatchGroup>> = self
            .inner
            .groups
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.inner.groups.clear();
        for group in groups {
            group.shutdown();
        }
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::invalid_registration(path, "path does not exist"),
        _ => Error::Io(e),
    })
}
