//! Single-file tail stream
//!
//! Wraps one [`LineReader`] and, for monitored files, one change
//! subscription. Blocking and timed reads wait on a coalescing queue and
//! always re-check the reader after a wakeup.
//!
//! Lifecycle:
//! - Modified / Created / RenamedTo wake readers
//! - RenamedFrom saves the position under the file's identity and ends the
//!   stream at once; a stream opened for the renamed file resumes from it
//! - Deleted drains what is still readable through the open handle, then ends
//!
//! `drain_to` and `take`/`poll` on the same stream must not be called
//! concurrently.

use logtrail_core::config::{OpenPolicy, ReaderConfig, StartPosition};
use logtrail_core::{
    ChangeQueue, Drain, Error, FileKey, Line, LineReader, LineSink, LineSource, OffsetStore,
    ReaderPosition, Result, Signal,
};
use logtrail_watcher::{
    EventListener, LogicalEvent, LogicalKind, MonitorHandle, MonitorMode, WatchService,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// How a stream opens its reader
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub chunk_size: usize,
    pub open: OpenPolicy,
}

impl StreamOptions {
    pub fn new(reader: &ReaderConfig, open: OpenPolicy) -> Self {
        Self {
            chunk_size: reader.buffer_size,
            open,
        }
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            open: OpenPolicy::Lazy,
        }
    }
}

/// Whether the stream can wait for more data
enum Capability {
    Monitored(ChangeQueue<()>),
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Live,
    /// Deliver what is left, then end
    Draining,
    Ended,
    Closed,
}

enum ReaderSlot {
    Unopened(ReaderPosition),
    Open(LineReader),
}

struct ReaderState {
    slot: ReaderSlot,
    phase: Phase,
}

type ChangeHook = Box<dyn Fn() + Send + Sync>;

/// State shared with the watch worker
pub(crate) struct StreamShared {
    path: PathBuf,
    key: OnceLock<FileKey>,
    capability: Capability,
    state: Mutex<ReaderState>,
    chunk_size: usize,
    store: Option<Arc<dyn OffsetStore>>,
    hooks: Mutex<Vec<ChangeHook>>,
}

impl StreamShared {
    fn new(
        path: PathBuf,
        key: Option<FileKey>,
        capability: Capability,
        phase: Phase,
        position: ReaderPosition,
        chunk_size: usize,
        store: Option<Arc<dyn OffsetStore>>,
    ) -> Self {
        let key_cell = OnceLock::new();
        if let Some(key) = key {
            let _ = key_cell.set(key);
        }
        Self {
            path,
            key: key_cell,
            capability,
            state: Mutex::new(ReaderState {
                slot: ReaderSlot::Unopened(position),
                phase,
            }),
            chunk_size: chunk_size.max(1),
            store,
            hooks: Mutex::new(Vec::new()),
        }
    }

    fn source(&self) -> LineSource {
        LineSource::new(self.key.get().copied(), self.path.as_path())
    }

    /// Open the reader if needed. `None` when the file cannot be opened or
    /// the path now names a different file than the stream's identity.
    fn reader<'s>(&self, state: &'s mut ReaderState) -> Option<&'s mut LineReader> {
        if let ReaderSlot::Unopened(position) = state.slot {
            match LineReader::open(&self.path, self.source(), position, self.chunk_size) {
                Ok(reader) if self.is_same_file(&reader) => state.slot = ReaderSlot::Open(reader),
                Ok(_) => {
                    debug!(path = %self.path.display(), "Path holds a different file, not opening");
                    return None;
                }
                Err(e) => {
                    debug!(path = %self.path.display(), error = %e, "Cannot open file yet");
                    return None;
                }
            }
        }
        match &mut state.slot {
            ReaderSlot::Open(reader) => Some(reader),
            ReaderSlot::Unopened(_) => None,
        }
    }

    /// Next line, `Ok(None)` when nothing is available yet
    fn next_line(&self, state: &mut ReaderState) -> Result<Option<Line>> {
        let finishing = match state.phase {
            Phase::Closed => return Err(Error::Closed),
            Phase::Ended => return Err(Error::EndOfStream),
            Phase::Draining => true,
            Phase::Live => false,
        };

        let read = match self.reader(state) {
            Some(reader) if finishing => reader.read_line_or_remainder(),
            Some(reader) => reader.read_line(),
            None => Ok(None),
        };
        match read {
            Ok(Some(line)) => Ok(Some(line)),
            Ok(None) if finishing => {
                state.phase = Phase::Ended;
                Err(Error::EndOfStream)
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Read failed");
                if finishing {
                    state.phase = Phase::Ended;
                    Err(Error::EndOfStream)
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn is_same_file(&self, reader: &LineReader) -> bool {
        match self.key.get() {
            Some(FileKey::Native(id)) => reader.native_id() == Some(*id),
            _ => true,
        }
    }

    fn position_of(state: &ReaderState) -> ReaderPosition {
        match &state.slot {
            ReaderSlot::Unopened(position) => *position,
            ReaderSlot::Open(reader) => reader.position(),
        }
    }

    fn wake(&self) {
        if let Capability::Monitored(queue) = &self.capability {
            queue.notify(());
        }
        for hook in self.hooks.lock().iter() {
            hook();
        }
    }

    /// React to a lifecycle event for this stream's file
    pub(crate) fn apply(&self, kind: LogicalKind) {
        match kind {
            LogicalKind::Modified | LogicalKind::Created | LogicalKind::RenamedTo => {}
            LogicalKind::RenamedFrom => {
                let mut state = self.state.lock();
                if matches!(state.phase, Phase::Live | Phase::Draining) {
                    let position = Self::position_of(&state);
                    state.phase = Phase::Ended;
                    drop(state);
                    self.save_position(position);
                    debug!(path = %self.path.display(), offset = position.offset, "Renamed away, stream ended");
                }
            }
            LogicalKind::Deleted => {
                let mut state = self.state.lock();
                if state.phase == Phase::Live {
                    // Without an open handle there is nothing left to drain
                    state.phase = match state.slot {
                        ReaderSlot::Open(_) => Phase::Draining,
                        ReaderSlot::Unopened(_) => Phase::Ended,
                    };
                }
                drop(state);
                if let (Some(store), Some(key)) = (&self.store, self.key.get()) {
                    if let Err(e) = store.remove(key) {
                        warn!(key = %key, error = %e, "Failed to clear stored position");
                    }
                }
                debug!(path = %self.path.display(), "Deleted, draining");
            }
        }
        self.wake();
    }

    /// End the stream now and return where it stopped
    pub(crate) fn end(&self) -> ReaderPosition {
        let mut state = self.state.lock();
        if matches!(state.phase, Phase::Live | Phase::Draining) {
            state.phase = Phase::Ended;
        }
        let position = Self::position_of(&state);
        drop(state);
        self.wake();
        position
    }

    fn save_position(&self, position: ReaderPosition) {
        if let (Some(store), Some(key)) = (&self.store, self.key.get()) {
            if let Err(e) = store.save(key, position) {
                warn!(key = %key, error = %e, "Failed to save position");
            }
        }
    }
}

impl EventListener for StreamShared {
    fn on_event(&self, event: &LogicalEvent, tick: u64) {
        trace!(path = %self.path.display(), kind = ?event.kind, tick, "Stream event");
        self.apply(event.kind);
    }

    fn on_closed(&self) {
        debug!(path = %self.path.display(), "No longer monitored, stream ended");
        self.end();
    }
}

/// Line stream over one file
pub struct FileTailStream {
    shared: Arc<StreamShared>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl FileTailStream {
    /// Read an unmonitored file to its end. The final line is delivered even
    /// without a trailing newline; after it the stream reports end of stream.
    pub fn open_static(path: &Path, chunk_size: usize) -> Result<Self> {
        let stream = Self::from_shared(StreamShared::new(
            path.to_path_buf(),
            None,
            Capability::Static,
            Phase::Draining,
            ReaderPosition::default(),
            chunk_size,
            None,
        ));
        // Fail now rather than report an empty stream for a missing file
        {
            let mut state = stream.shared.state.lock();
            let reader = LineReader::open(path, stream.shared.source(), ReaderPosition::default(), chunk_size)?;
            state.slot = ReaderSlot::Open(reader);
        }
        Ok(stream)
    }

    /// Tail a file through the watch service.
    ///
    /// Resumes from the position stored for the file's identity if there is
    /// one, otherwise starts where `start` says.
    pub fn monitored(
        service: &WatchService,
        path: &Path,
        store: Arc<dyn OffsetStore>,
        start: StartPosition,
        options: StreamOptions,
    ) -> Result<Self> {
        let path = path.canonicalize().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::invalid_registration(path, "path does not exist")
            }
            _ => Error::Io(e),
        })?;
        let shared = Arc::new(StreamShared::new(
            path.clone(),
            None,
            Capability::Monitored(ChangeQueue::new()),
            Phase::Live,
            ReaderPosition::default(),
            options.chunk_size,
            Some(Arc::clone(&store)),
        ));
        let listener: Arc<dyn EventListener> = shared.clone();
        let monitor = service.register_file(&path, MonitorMode::TAIL, listener)?;

        if let Some(key) = monitor.key() {
            let _ = shared.key.set(key);
            let position = match store.load(&key)? {
                Some(saved) => {
                    debug!(path = %path.display(), offset = saved.offset, "Resuming saved position");
                    saved
                }
                None => start_position(&path, start)?,
            };
            let mut state = shared.state.lock();
            state.slot = ReaderSlot::Unopened(position);
        }

        let stream = Self {
            shared,
            monitor: Mutex::new(Some(monitor)),
        };
        if options.open == OpenPolicy::Eager {
            stream.open_now();
        }
        Ok(stream)
    }

    /// Stream whose events are routed in by a folder tail
    pub(crate) fn managed(
        key: FileKey,
        path: PathBuf,
        position: ReaderPosition,
        store: Arc<dyn OffsetStore>,
        options: StreamOptions,
    ) -> Self {
        let stream = Self::from_shared(StreamShared::new(
            path,
            Some(key),
            Capability::Monitored(ChangeQueue::new()),
            Phase::Live,
            position,
            options.chunk_size,
            Some(store),
        ));
        if options.open == OpenPolicy::Eager {
            stream.open_now();
        }
        stream
    }

    fn from_shared(shared: StreamShared) -> Self {
        Self {
            shared: Arc::new(shared),
            monitor: Mutex::new(None),
        }
    }

    fn open_now(&self) {
        let mut state = self.shared.state.lock();
        self.shared.reader(&mut state);
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn key(&self) -> Option<FileKey> {
        self.shared.key.get().copied()
    }

    pub fn is_monitored(&self) -> bool {
        matches!(self.shared.capability, Capability::Monitored(_))
    }

    /// Resumable position: offset after the last delivered line
    pub fn position(&self) -> ReaderPosition {
        StreamShared::position_of(&self.shared.state.lock())
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.shared.state.lock().phase, Phase::Ended | Phase::Closed)
    }

    /// Whether the next read can be answered from memory
    pub fn has_buffered_line(&self) -> bool {
        match &self.shared.state.lock().slot {
            ReaderSlot::Open(reader) => reader.has_buffered_line(),
            ReaderSlot::Unopened(_) => false,
        }
    }

    /// Call `hook` after every change notification
    pub fn on_change<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.hooks.lock().push(Box::new(hook));
    }

    pub(crate) fn apply(&self, kind: LogicalKind) {
        self.shared.apply(kind);
    }

    /// End the stream now and return where it stopped
    pub(crate) fn end_now(&self) -> ReaderPosition {
        self.shared.end()
    }

    pub(crate) fn push_back(&self, line: Line) {
        if let ReaderSlot::Open(reader) = &mut self.shared.state.lock().slot {
            reader.push_back(line);
        }
    }

    /// Non-blocking read: `Ok(None)` when no complete line is available
    pub fn try_poll(&self) -> Result<Option<Line>> {
        let mut state = self.shared.state.lock();
        self.shared.next_line(&mut state)
    }

    /// Block until a line is available.
    ///
    /// Fails with [`Error::EndOfStream`] once the file is gone or renamed
    /// away (or, for a static stream, fully read), and with
    /// [`Error::Closed`] after [`FileTailStream::close`].
    pub fn take(&self) -> Result<Line> {
        loop {
            if let Some(line) = self.try_poll()? {
                return Ok(line);
            }
            match &self.shared.capability {
                Capability::Static => return Err(Error::EndOfStream),
                Capability::Monitored(queue) => {
                    if let Signal::Closed = queue.take() {
                        return Err(Error::Closed);
                    }
                }
            }
        }
    }

    /// Wait at most `timeout` for a line. `Ok(None)` on timeout, never
    /// before the timeout has elapsed.
    pub fn poll(&self, timeout: Duration) -> Result<Option<Line>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.try_poll()? {
                return Ok(Some(line));
            }
            match &self.shared.capability {
                Capability::Static => return Err(Error::EndOfStream),
                Capability::Monitored(queue) => match queue.poll_until(deadline) {
                    None => return Ok(None),
                    Some(Signal::Closed) => return Err(Error::Closed),
                    Some(_) => {}
                },
            }
        }
    }

    /// Move up to `max` available lines into `sink` without blocking.
    ///
    /// A line the sink refuses is pushed back into the reader and comes out
    /// first on the next call.
    pub fn drain_to<S: LineSink + ?Sized>(&self, sink: &mut S, max: usize) -> Result<Drain> {
        let mut state = self.shared.state.lock();
        let mut moved = 0;
        while moved < max {
            match self.shared.next_line(&mut state) {
                Ok(Some(line)) => {
                    if let Err(line) = sink.offer(line) {
                        if let ReaderSlot::Open(reader) = &mut state.slot {
                            reader.push_back(line);
                        }
                        return Ok(Drain::QueueFull);
                    }
                    moved += 1;
                }
                Ok(None) => break,
                Err(Error::EndOfStream) if moved == 0 => return Ok(Drain::EndOfStream),
                Err(Error::EndOfStream) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(Drain::Moved(moved))
    }

    /// Blocking iterator over lines, ending at end of stream
    pub fn lines(&self) -> Lines<'_> {
        Lines {
            stream: self,
            done: false,
        }
    }

    /// Stop the stream: blocked and future reads fail with
    /// [`Error::Closed`]. Idempotent.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Closed;
        }
        if let Capability::Monitored(queue) = &self.shared.capability {
            queue.close();
        }
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.close();
        }
        for hook in self.shared.hooks.lock().iter() {
            hook();
        }
    }
}

impl Drop for FileTailStream {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.close();
        }
    }
}

impl std::fmt::Debug for FileTailStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTailStream")
            .field("path", &self.shared.path)
            .field("key", &self.key())
            .field("monitored", &self.is_monitored())
            .field("position", &self.position())
            .finish()
    }
}

/// Iterator returned by [`FileTailStream::lines`]
pub struct Lines<'a> {
    stream: &'a FileTailStream,
    done: bool,
}

impl Iterator for Lines<'_> {
    type Item = Result<Line>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.stream.take() {
            Ok(line) => Some(Ok(line)),
            Err(Error::EndOfStream) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Where a file seen for the first time starts
pub(crate) fn start_position(path: &Path, start: StartPosition) -> Result<ReaderPosition> {
    match start {
        StartPosition::Beginning => Ok(ReaderPosition::default()),
        StartPosition::End => {
            let len = std::fs::metadata(path)?.len();
            Ok(ReaderPosition::new(len, 0))
        }
    }
}
