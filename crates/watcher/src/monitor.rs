//! Monitor registrations
//!
//! A monitor is a (path-or-folder, mode, listener) registration on a watch
//! group. File monitors receive events for the identity the file had when it
//! was registered, and keep receiving them across renames. Folder monitors
//! receive events for every identity no file monitor claims.

use crate::event::{LogicalEvent, LogicalKind};
use crate::group::WatchGroup;
use crate::service::ServiceInner;
use logtrail_core::FileKey;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// Which logical events a monitor wants
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorMode(u8);

impl MonitorMode {
    pub const CREATE: MonitorMode = MonitorMode(1);
    pub const MODIFY: MonitorMode = MonitorMode(1 << 1);
    pub const DELETE: MonitorMode = MonitorMode(1 << 2);
    pub const RENAME: MonitorMode = MonitorMode(1 << 3);
    /// Everything a tail stream needs
    pub const TAIL: MonitorMode = MonitorMode(0b1111);

    pub fn contains(self, other: MonitorMode) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether an event of `kind` is delivered under this mode
    pub fn admits(self, kind: LogicalKind) -> bool {
        let needed = match kind {
            LogicalKind::Created => MonitorMode::CREATE,
            LogicalKind::Modified => MonitorMode::MODIFY,
            LogicalKind::Deleted => MonitorMode::DELETE,
            LogicalKind::RenamedFrom | LogicalKind::RenamedTo => MonitorMode::RENAME,
        };
        self.contains(needed)
    }
}

impl BitOr for MonitorMode {
    type Output = MonitorMode;

    fn bitor(self, rhs: MonitorMode) -> MonitorMode {
        MonitorMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for MonitorMode {
    fn bitor_assign(&mut self, rhs: MonitorMode) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for MonitorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == MonitorMode::TAIL {
            return f.write_str("TAIL");
        }
        let names = [
            (MonitorMode::CREATE, "CREATE"),
            (MonitorMode::MODIFY, "MODIFY"),
            (MonitorMode::DELETE, "DELETE"),
            (MonitorMode::RENAME, "RENAME"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(mode, _)| self.contains(*mode))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", set.join("|"))
    }
}

/// Receives logical events on the group's worker thread.
///
/// Called without any watch group lock held, so implementations may register
/// or close monitors. `tick` is the registration's counter for the event's
/// key after the increment.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &LogicalEvent, tick: u64);

    /// The group stopped watching; no further events will arrive
    fn on_closed(&self) {}
}

impl<F> EventListener for F
where
    F: Fn(&LogicalEvent, u64) + Send + Sync,
{
    fn on_event(&self, event: &LogicalEvent, tick: u64) {
        self(event, tick)
    }
}

/// Registration id, unique within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorId(pub(crate) u64);

/// Live registration; unregisters on [`MonitorHandle::close`] or drop
pub struct MonitorHandle {
    id: MonitorId,
    path: Option<PathBuf>,
    key: Option<FileKey>,
    mode: MonitorMode,
    group: Arc<WatchGroup>,
    service: Weak<ServiceInner>,
    closed: AtomicBool,
}

impl MonitorHandle {
    pub(crate) fn new(
        id: MonitorId,
        path: Option<PathBuf>,
        key: Option<FileKey>,
        mode: MonitorMode,
        group: Arc<WatchGroup>,
        service: Weak<ServiceInner>,
    ) -> Self {
        Self {
            id,
            path,
            key,
            mode,
            group,
            service,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> MonitorId {
        self.id
    }

    /// Registered file, `None` for a folder monitor
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Identity of the registered file at registration time
    pub fn key(&self) -> Option<FileKey> {
        self.key
    }

    pub fn mode(&self) -> MonitorMode {
        self.mode
    }

    /// Watched directory
    pub fn dir(&self) -> &Path {
        self.group.dir()
    }

    pub fn group(&self) -> &Arc<WatchGroup> {
        &self.group
    }

    /// Events delivered to this registration for `key` so far
    pub fn tick(&self, key: &FileKey) -> u64 {
        self.group.tick(self.id, key)
    }

    /// Block until the tick for `key` exceeds `past`. `None` on timeout or
    /// once the registration is gone.
    pub fn wait_for_tick(&self, key: &FileKey, past: u64, timeout: Duration) -> Option<u64> {
        self.group.wait_for_tick(self.id, key, past, timeout)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Unregister. Idempotent; releases the directory watch when this was
    /// the last monitor on it.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(id = self.id.0, dir = %self.group.dir().display(), "Closing monitor");
        if self.group.unregister(self.id) {
            if let Some(service) = self.service.upgrade() {
                service.release(&self.group);
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("id", &self.id)
            .field("dir", &self.group.dir())
            .field("path", &self.path)
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}
