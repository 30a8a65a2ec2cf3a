//! Watch groups
//!
//! One group per watched directory: it owns the native watch handle, the
//! identity resolver, the correlator and the monitor table for that
//! directory, all behind a single lock. A dedicated worker thread collects
//! raw events into batches and runs them through [`WatchGroup::process`].
//!
//! Listeners are invoked after the lock is released, so a listener may
//! register or close monitors on the same group.

use crate::correlate::FolderCorrelator;
use crate::event::{normalize, LogicalEvent, LogicalKind, WatchEvent};
use crate::identity::{strategy_for, IdentityResolver, Snapshot};
use crate::monitor::{EventListener, MonitorId, MonitorMode};
use crate::scan;
use ahash::AHashMap;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use logtrail_core::config::{IdentityConfig, WatchBackend, WatchConfig};
use logtrail_core::{Error, FileKey, Result, TailConfig};
use notify::{PollWatcher, RecursiveMode, Watcher};
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Settings every group of a service is started with
#[derive(Debug, Clone, Default)]
pub struct GroupOptions {
    pub watch: WatchConfig,
    pub identity: IdentityConfig,
    pub recursive: bool,
}

impl GroupOptions {
    pub fn from_config(config: &TailConfig) -> Self {
        Self {
            watch: config.watch.clone(),
            identity: config.identity.clone(),
            recursive: config.tail.recursive,
        }
    }
}

struct Registration {
    key: Option<FileKey>,
    mode: MonitorMode,
    listener: Arc<dyn EventListener>,
    ticks: AHashMap<FileKey, u64>,
}

struct GroupState {
    registrations: AHashMap<MonitorId, Registration>,
    /// File monitors by the identity they follow
    by_key: AHashMap<FileKey, SmallVec<[MonitorId; 2]>>,
    folders: SmallVec<[MonitorId; 4]>,
    resolver: IdentityResolver,
    correlator: FolderCorrelator,
    closed: bool,
}

struct Delivery {
    listener: Arc<dyn EventListener>,
    event: LogicalEvent,
    tick: u64,
}

type BoxedWatcher = Box<dyn Watcher + Send>;

/// Everything attached to one watched directory
pub struct WatchGroup {
    dir: PathBuf,
    recursive: bool,
    state: Mutex<GroupState>,
    ticked: Condvar,
    next_id: AtomicU64,
    watcher: Mutex<Option<BoxedWatcher>>,
}

impl WatchGroup {
    /// Start watching `dir` (already canonical) and spawn the worker
    pub fn start(dir: PathBuf, options: &GroupOptions) -> Result<Arc<Self>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handler = move |res: notify::Result<notify::Event>| {
            // Receiver gone means the group is shutting down
            let _ = tx.send(res);
        };

        let mut watcher: BoxedWatcher = match options.watch.backend {
            WatchBackend::Native => {
                Box::new(notify::recommended_watcher(handler).map_err(watch_error)?)
            }
            WatchBackend::Poll => {
                let config = notify::Config::default()
                    .with_poll_interval(options.watch.poll_interval());
                Box::new(PollWatcher::new(handler, config).map_err(watch_error)?)
            }
        };
        let mode = if options.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher.watch(&dir, mode).map_err(watch_error)?;

        // Listing after the watch starts: a file created in between shows up
        // in both and correlates to a plain modify
        let group = Arc::new(Self::new(dir, options, Some(watcher)));

        let worker = Worker {
            group: Arc::downgrade(&group),
            rx,
            batch_size: options.watch.batch_size.max(1),
            batch_window: options.watch.batch_window(),
        };
        let name = format!(
            "lt-watch-{}",
            group.dir.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        );
        thread::Builder::new().name(name).spawn(move || worker.run())?;

        info!(
            dir = %group.dir.display(),
            files = group.snapshot().len(),
            backend = ?options.watch.backend,
            strategy = group.state.lock().resolver.strategy_name(),
            "Watch group started"
        );
        Ok(group)
    }

    fn new(dir: PathBuf, options: &GroupOptions, watcher: Option<BoxedWatcher>) -> Self {
        let mut resolver = IdentityResolver::new(strategy_for(&options.identity));
        resolver.seed(scan::list_files(&dir, options.recursive));

        Self {
            dir,
            recursive: options.recursive,
            state: Mutex::new(GroupState {
                registrations: AHashMap::new(),
                by_key: AHashMap::new(),
                folders: SmallVec::new(),
                resolver,
                correlator: FolderCorrelator::new(),
                closed: false,
            }),
            ticked: Condvar::new(),
            next_id: AtomicU64::new(1),
            watcher: Mutex::new(watcher),
        }
    }

    /// Group with no backend attached; batches only arrive through
    /// [`WatchGroup::process`]
    #[cfg(test)]
    pub(crate) fn unwatched(dir: PathBuf, options: &GroupOptions) -> Arc<Self> {
        Arc::new(Self::new(dir, options, None))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    /// Path -> identity of every file known after the last batch
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state.lock().resolver.snapshot()
    }

    /// Identity of `path`, adopting it into the snapshot if it is new
    pub fn identify(&self, path: &Path) -> Option<FileKey> {
        self.state.lock().resolver.lookup_or_adopt(path)
    }

    pub(crate) fn register(
        &self,
        path: Option<&Path>,
        mode: MonitorMode,
        listener: Arc<dyn EventListener>,
    ) -> Result<(MonitorId, Option<FileKey>)> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Closed);
        }

        let key = match path {
            Some(path) => Some(
                state
                    .resolver
                    .lookup_or_adopt(path)
                    .ok_or_else(|| Error::invalid_registration(path, "file is not readable"))?,
            ),
            None => None,
        };

        let id = MonitorId(self.next_id.fetch_add(1, Ordering::Relaxed));
        match key {
            Some(key) => state.by_key.entry(key).or_default().push(id),
            None => state.folders.push(id),
        }
        state.registrations.insert(
            id,
            Registration {
                key,
                mode,
                listener,
                ticks: AHashMap::new(),
            },
        );
        debug!(id = id.0, dir = %self.dir.display(), ?key, ?mode, "Registered monitor");
        Ok((id, key))
    }

    /// Remove a registration. Returns true when no registrations remain.
    pub(crate) fn unregister(&self, id: MonitorId) -> bool {
        let mut state = self.state.lock();
        if let Some(registration) = state.registrations.remove(&id) {
            match registration.key {
                Some(key) => {
                    if let Some(ids) = state.by_key.get_mut(&key) {
                        ids.retain(|i| *i != id);
                        if ids.is_empty() {
                            state.by_key.remove(&key);
                        }
                    }
                }
                None => state.folders.retain(|i| *i != id),
            }
        }
        let idle = state.registrations.is_empty();
        drop(state);
        // Wake tick waiters of the removed registration
        self.ticked.notify_all();
        idle
    }

    pub(crate) fn tick(&self, id: MonitorId, key: &FileKey) -> u64 {
        let state = self.state.lock();
        state
            .registrations
            .get(&id)
            .and_then(|r| r.ticks.get(key).copied())
            .unwrap_or(0)
    }

    pub(crate) fn wait_for_tick(
        &self,
        id: MonitorId,
        key: &FileKey,
        past: u64,
        timeout: Duration,
    ) -> Option<u64> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let registration = state.registrations.get(&id)?;
            let tick = registration.ticks.get(key).copied().unwrap_or(0);
            if tick > past {
                return Some(tick);
            }
            if state.closed {
                return None;
            }
            if self.ticked.wait_until(&mut state, deadline).timed_out() {
                let tick = state.registrations.get(&id)?.ticks.get(key).copied()?;
                return (tick > past).then_some(tick);
            }
        }
    }

    pub fn monitor_count(&self) -> usize {
        self.state.lock().registrations.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Mark closed if nothing is registered; later registrations fail with
    /// [`Error::Closed`].
    pub(crate) fn close_if_idle(&self) -> bool {
        let mut state = self.state.lock();
        if state.registrations.is_empty() && !state.closed {
            state.closed = true;
            true
        } else {
            false
        }
    }

    /// Close and release the native watch handle. The worker exits once the
    /// backend drops its end of the channel.
    ///
    /// Listeners still registered are told through
    /// [`EventListener::on_closed`].
    pub(crate) fn shutdown(&self) {
        let listeners: Vec<Arc<dyn EventListener>> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.by_key.clear();
            state.folders.clear();
            state
                .registrations
                .drain()
                .map(|(_, registration)| registration.listener)
                .collect()
        };
        self.ticked.notify_all();
        if self.watcher.lock().take().is_some() {
            info!(dir = %self.dir.display(), listeners = listeners.len(), "Watch group closed");
        }

        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener.on_closed())).is_err() {
                error!(dir = %self.dir.display(), "Listener panicked while closing");
            }
        }
    }

    /// Correlate one batch of raw events and deliver the results
    pub fn process(&self, mut raw: Vec<WatchEvent>, rescan: bool) {
        let deliveries = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            let state = &mut *state;

            if rescan {
                warn!(dir = %self.dir.display(), "Event queue overflow, rescanning");
                let snapshot = state.resolver.snapshot();
                raw.extend(scan::rescan_events(&self.dir, self.recursive, &snapshot));
            }
            if raw.is_empty() {
                return;
            }

            let mut resolution = state.resolver.begin();
            let events = state.correlator.correlate(&raw, &mut resolution);
            let snapshot = resolution.into_snapshot();
            state.resolver.install(snapshot);
            let snapshot = state.resolver.snapshot();

            debug!(
                dir = %self.dir.display(),
                raw = raw.len(),
                logical = events.len(),
                generation = snapshot.generation(),
                "Processed batch"
            );

            let deliveries = collect_deliveries(state, &events);

            // Identities gone for good: a reused identity must not reach
            // monitors of the file that held it before
            for event in &events {
                if event.kind == LogicalKind::Deleted && !snapshot.contains_key(&event.key) {
                    state.resolver.forget(&event.key);
                    if let Some(ids) = state.by_key.remove(&event.key) {
                        for id in ids {
                            if let Some(registration) = state.registrations.get_mut(&id) {
                                registration.key = None;
                            }
                        }
                    }
                }
            }
            deliveries
        };

        if deliveries.is_empty() {
            return;
        }
        self.ticked.notify_all();

        for delivery in deliveries {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                delivery.listener.on_event(&delivery.event, delivery.tick)
            }));
            if outcome.is_err() {
                error!(
                    dir = %self.dir.display(),
                    path = %delivery.event.path.display(),
                    kind = ?delivery.event.kind,
                    "Listener panicked, event skipped"
                );
            }
        }
    }
}

/// Route events to monitors and bump their ticks. Events for an identity no
/// file monitor follows go to every folder monitor.
fn collect_deliveries(state: &mut GroupState, events: &[LogicalEvent]) -> Vec<Delivery> {
    let mut deliveries = Vec::new();
    for event in events {
        let targets: SmallVec<[MonitorId; 4]> = match state.by_key.get(&event.key) {
            Some(ids) if !ids.is_empty() => ids.iter().copied().collect(),
            _ => state.folders.iter().copied().collect(),
        };
        for id in targets {
            let Some(registration) = state.registrations.get_mut(&id) else {
                continue;
            };
            if !registration.mode.admits(event.kind) {
                continue;
            }
            let tick = registration.ticks.entry(event.key).or_insert(0);
            *tick += 1;
            trace!(id = id.0, kind = ?event.kind, key = %event.key, tick = *tick, "Deliver");
            deliveries.push(Delivery {
                listener: Arc::clone(&registration.listener),
                event: event.clone(),
                tick: *tick,
            });
        }
    }
    deliveries
}

fn watch_error(e: notify::Error) -> Error {
    Error::Watch(e.to_string())
}

/// Drains the backend channel into batches
struct Worker {
    group: Weak<WatchGroup>,
    rx: Receiver<notify::Result<notify::Event>>,
    batch_size: usize,
    batch_window: Duration,
}

impl Worker {
    fn run(self) {
        loop {
            let Ok(first) = self.rx.recv() else {
                break;
            };
            let mut batch = Vec::new();
            let mut rescan = false;
            let mut disconnected = false;

            self.collect(first, &mut batch, &mut rescan);
            let deadline = Instant::now() + self.batch_window;
            while batch.len() < self.batch_size {
                match self.rx.recv_deadline(deadline) {
                    Ok(next) => self.collect(next, &mut batch, &mut rescan),
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => {
                        disconnected = true;
                        break;
                    }
                }
            }

            let Some(group) = self.group.upgrade() else {
                break;
            };
            group.process(batch, rescan);
            drop(group);
            if disconnected {
                break;
            }
        }
        trace!("Watch worker exiting");
    }

    fn collect(
        &self,
        received: notify::Result<notify::Event>,
        batch: &mut Vec<WatchEvent>,
        rescan: &mut bool,
    ) {
        let event = match received {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Watch backend error, event skipped");
                return;
            }
        };
        if event.need_rescan() {
            *rescan = true;
        }
        let Some(group) = self.group.upgrade() else {
            return;
        };
        for raw in normalize(&event) {
            if group.in_scope(&raw.path) {
                trace!(path = %raw.path.display(), kind = ?raw.kind, "Raw event");
                batch.push(raw);
            }
        }
    }
}

impl WatchGroup {
    /// Events for the directory itself or (when flat) for nested entries are
    /// not tracked
    fn in_scope(&self, path: &Path) -> bool {
        if self.recursive {
            path.starts_with(&self.dir) && path != self.dir
        } else {
            path.parent() == Some(self.dir.as_path())
        }
    }
}
