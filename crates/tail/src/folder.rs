//! Tailing every file in a directory
//!
//! A folder tail keeps one [`FileInstance`] per tracked identity and feeds
//! their streams into an [`AggregateTailStream`]. Membership follows the
//! logical events of the directory's watch group:
//!
//! - Created: new instance read from the beginning
//! - RenamedFrom: the stream saves its position and ends
//! - RenamedTo: a new stream on the new path resumes from the old one, under
//!   the same logical id
//! - Deleted: the stream drains what is left and ends; the instance is kept
//!   aside briefly in case the file turns up again under another name
//! - Modified: the stream is woken
//!
//! A folder with no tracked files reports end of stream until a file appears.
//!
//! Lock order: folder state, then aggregate, then stream.

use crate::aggregate::{AggregateLines, AggregateTailStream};
use crate::instance::{ContentInfo, FileInstance};
use crate::stream::{start_position, FileTailStream, StreamOptions};
use ahash::AHashMap;
use logtrail_core::config::StartPosition;
use logtrail_core::{
    Drain, Error, FileKey, Line, LineSink, OffsetStore, ReaderPosition, Result, TailConfig,
};
use logtrail_watcher::{
    EventListener, LogicalEvent, LogicalKind, MonitorHandle, MonitorMode, PathFilter,
    PathPredicate, WatchService,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Deleted instances remembered for a late RenamedTo
const DEPARTED_CAPACITY: usize = 64;

/// An instance whose file was deleted from the directory
struct Departed {
    key: FileKey,
    logical_id: Ulid,
    original_path: PathBuf,
    stream: Arc<FileTailStream>,
}

struct FolderState {
    instances: AHashMap<FileKey, FileInstance>,
    departed: VecDeque<Departed>,
    closed: bool,
}

struct FolderShared {
    dir: PathBuf,
    service: WatchService,
    store: Arc<dyn OffsetStore>,
    filter: PathFilter,
    options: StreamOptions,
    aggregate: AggregateTailStream,
    state: Mutex<FolderState>,
}

/// Routes folder and per-file monitor events to the folder tail
struct FolderListener(Weak<FolderShared>);

impl EventListener for FolderListener {
    fn on_event(&self, event: &LogicalEvent, _tick: u64) {
        if let Some(shared) = self.0.upgrade() {
            shared.handle(event, &self.listener());
        }
    }

    fn on_closed(&self) {
        if let Some(shared) = self.0.upgrade() {
            shared.watch_closed();
        }
    }
}

impl FolderListener {
    fn listener(&self) -> Arc<dyn EventListener> {
        Arc::new(FolderListener(Weak::clone(&self.0)))
    }
}

impl FolderShared {
    fn handle(&self, event: &LogicalEvent, listener: &Arc<dyn EventListener>) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        let state = &mut *state;
        debug!(dir = %self.dir.display(), kind = ?event.kind, path = %event.path.display(), key = %event.key, "Folder event");

        match event.kind {
            LogicalKind::Modified | LogicalKind::Created => {
                if let Some(instance) = state.instances.get_mut(&event.key) {
                    instance.refresh();
                    instance.stream.apply(LogicalKind::Modified);
                    return;
                }
                self.track(state, event.key, &event.path, ReaderPosition::default(), listener);
            }
            LogicalKind::RenamedFrom => {
                if let Some(instance) = state.instances.get(&event.key) {
                    instance.stream.apply(LogicalKind::RenamedFrom);
                }
            }
            LogicalKind::RenamedTo => self.renamed_to(state, event, listener),
            LogicalKind::Deleted => {
                let Some(mut instance) = state.instances.remove(&event.key) else {
                    return;
                };
                instance.stream.apply(LogicalKind::Deleted);
                if let Some(monitor) = instance.monitor.take() {
                    monitor.close();
                }
                if state.departed.len() >= DEPARTED_CAPACITY {
                    state.departed.pop_front();
                }
                state.departed.push_back(Departed {
                    key: instance.key,
                    logical_id: instance.logical_id,
                    original_path: instance.original_path,
                    stream: instance.stream,
                });
                self.aggregate.membership_changed();
            }
        }
    }

    /// The directory is no longer watched. Every stream ends, which empties
    /// the aggregate and makes readers see end of stream.
    fn watch_closed(&self) {
        let state = self.state.lock();
        if state.closed {
            return;
        }
        for instance in state.instances.values() {
            instance.stream.end_now();
        }
        for departed in &state.departed {
            departed.stream.end_now();
        }
        debug!(dir = %self.dir.display(), files = state.instances.len(), "Watch closed, folder streams ended");
    }

    fn renamed_to(
        &self,
        state: &mut FolderState,
        event: &LogicalEvent,
        listener: &Arc<dyn EventListener>,
    ) {
        let key = event.key;
        let path = event.path.as_path();

        if let Some(instance) = state.instances.get_mut(&key) {
            let position = instance.stream.end_now();
            if !self.filter.accepts(path) {
                debug!(path = %path.display(), "Renamed to an excluded name, untracking");
                let id = instance.logical_id;
                if let Some(mut instance) = state.instances.remove(&key) {
                    instance.close();
                }
                self.aggregate.remove(id);
                return;
            }
            let stream = self.stream(key, path, position);
            instance.moved(path, Arc::clone(&stream));
            self.aggregate.add(instance.logical_id, stream);
            debug!(path = %path.display(), offset = position.offset, "Followed rename");
            return;
        }

        if let Some(index) = state.departed.iter().position(|d| d.key == key) {
            if let Some(departed) = state.departed.remove(index) {
                let position = departed.stream.end_now();
                if !self.filter.accepts(path) {
                    return;
                }
                let stream = self.stream(key, path, position);
                let mut instance = FileInstance::new(
                    departed.logical_id,
                    key,
                    path.to_path_buf(),
                    Arc::clone(&stream),
                    self.file_monitor(path, key, listener),
                );
                instance.original_path = departed.original_path;
                self.aggregate.add(instance.logical_id, stream);
                state.instances.insert(key, instance);
                self.aggregate.membership_changed();
                return;
            }
        }

        let position = match self.store.load(&key) {
            Ok(Some(position)) => position,
            Ok(None) => ReaderPosition::default(),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to load position");
                ReaderPosition::default()
            }
        };
        self.track(state, key, path, position, listener);
    }

    /// Start following a file not tracked so far
    fn track(
        &self,
        state: &mut FolderState,
        key: FileKey,
        path: &Path,
        position: ReaderPosition,
        listener: &Arc<dyn EventListener>,
    ) {
        if !self.filter.accepts(path) {
            return;
        }
        let stream = self.stream(key, path, position);
        let instance = FileInstance::new(
            Ulid::new(),
            key,
            path.to_path_buf(),
            Arc::clone(&stream),
            self.file_monitor(path, key, listener),
        );
        debug!(path = %path.display(), id = %instance.logical_id, offset = position.offset, "Tracking file");
        self.aggregate.add(instance.logical_id, stream);
        state.instances.insert(key, instance);
        self.aggregate.membership_changed();
    }

    fn stream(&self, key: FileKey, path: &Path, position: ReaderPosition) -> Arc<FileTailStream> {
        Arc::new(FileTailStream::managed(
            key,
            path.to_path_buf(),
            position,
            Arc::clone(&self.store),
            self.options,
        ))
    }

    /// Per-file monitor so events for `key` keep reaching this folder tail
    /// when another tail follows the same file
    fn file_monitor(
        &self,
        path: &Path,
        key: FileKey,
        listener: &Arc<dyn EventListener>,
    ) -> Option<MonitorHandle> {
        // Files in subdirectories would get a watch group of their own
        if path.parent() != Some(self.dir.as_path()) {
            return None;
        }
        match self
            .service
            .register_file(path, MonitorMode::TAIL, Arc::clone(listener))
        {
            Ok(monitor) if monitor.key() == Some(key) => Some(monitor),
            Ok(monitor) => {
                debug!(path = %path.display(), "File changed identity while registering");
                monitor.close();
                None
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Cannot monitor file");
                None
            }
        }
    }
}

/// Line stream over every accepted file of a directory
pub struct FolderTail {
    shared: Arc<FolderShared>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl FolderTail {
    pub(crate) fn start(
        service: &WatchService,
        dir: &Path,
        store: Arc<dyn OffsetStore>,
        config: &TailConfig,
        predicate: Option<PathPredicate>,
    ) -> Result<Self> {
        let dir = dir.canonicalize().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::invalid_registration(dir, "path does not exist"),
            _ => Error::Io(e),
        })?;
        let mut filter = PathFilter::from_config(&dir, &config.filter)?;
        if let Some(predicate) = predicate {
            filter = filter.with_predicate(move |path: &Path| predicate(path));
        }

        let shared = Arc::new(FolderShared {
            dir: dir.clone(),
            service: service.clone(),
            store,
            filter,
            options: StreamOptions::new(&config.reader, config.tail.open),
            aggregate: AggregateTailStream::for_folder(),
            state: Mutex::new(FolderState {
                instances: AHashMap::new(),
                departed: VecDeque::new(),
                closed: false,
            }),
        });
        let listener: Arc<dyn EventListener> = Arc::new(FolderListener(Arc::downgrade(&shared)));
        let monitor = service.register_folder(&dir, MonitorMode::TAIL, Arc::clone(&listener))?;

        let tail = Self {
            shared,
            monitor: Mutex::new(Some(monitor)),
        };
        tail.populate(config.reader.start, &listener)?;
        Ok(tail)
    }

    /// Track the files already present
    fn populate(&self, start: StartPosition, listener: &Arc<dyn EventListener>) -> Result<()> {
        let snapshot = {
            let monitor = self.monitor.lock();
            match monitor.as_ref() {
                Some(monitor) => monitor.group().snapshot(),
                None => return Err(Error::Closed),
            }
        };
        let shared = &self.shared;
        let mut state = shared.state.lock();
        let mut files: Vec<(&Path, &FileKey)> = snapshot.iter().collect();
        files.sort();

        for (path, key) in files {
            if state.instances.contains_key(key) || !shared.filter.accepts(path) {
                continue;
            }
            let position = match shared.store.load(key)? {
                Some(saved) => saved,
                None => match start_position(path, start) {
                    Ok(position) => position,
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "File vanished during listing");
                        continue;
                    }
                },
            };
            shared.track(&mut state, *key, path, position, listener);
        }
        info!(
            dir = %shared.dir.display(),
            files = state.instances.len(),
            filters = shared.filter.active_sources(),
            "Folder tail started"
        );
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.shared.dir
    }

    /// Number of tracked files
    pub fn len(&self) -> usize {
        self.shared.state.lock().instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lifecycle metadata of every tracked file, ordered by current path.
    ///
    /// With `realtime` each file is stat'ed now; otherwise the values cached
    /// at the last event are returned.
    pub fn list_content_info(&self, realtime: bool) -> Vec<ContentInfo> {
        let mut state = self.shared.state.lock();
        let mut infos: Vec<ContentInfo> = state
            .instances
            .values_mut()
            .map(|instance| {
                if realtime {
                    instance.refresh();
                }
                instance.info()
            })
            .collect();
        infos.sort_by(|a, b| a.current_path.cmp(&b.current_path));
        infos
    }

    pub fn take(&self) -> Result<Line> {
        self.shared.aggregate.take()
    }

    pub fn poll(&self, timeout: Duration) -> Result<Option<Line>> {
        self.shared.aggregate.poll(timeout)
    }

    pub fn try_poll(&self) -> Result<Option<Line>> {
        self.shared.aggregate.try_poll()
    }

    pub fn drain_to<S: LineSink + ?Sized>(&self, sink: &mut S, max: usize) -> Result<Drain> {
        self.shared.aggregate.drain_to(sink, max)
    }

    pub fn lines(&self) -> AggregateLines<'_> {
        self.shared.aggregate.lines()
    }

    /// Stop tailing. Blocked readers fail with [`Error::Closed`]. Idempotent.
    pub fn close(&self) {
        let (instances, departed) = {
            let mut state = self.shared.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            (
                std::mem::take(&mut state.instances),
                std::mem::take(&mut state.departed),
            )
        };
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.close();
        }
        for (_, mut instance) in instances {
            instance.close();
        }
        for departed in departed {
            departed.stream.close();
        }
        self.shared.aggregate.close();
        debug!(dir = %self.shared.dir.display(), "Folder tail closed");
    }
}

impl Drop for FolderTail {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FolderTail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FolderTail")
            .field("dir", &self.shared.dir)
            .field("files", &self.len())
            .field("aggregate", &self.shared.aggregate)
            .finish()
    }
}
