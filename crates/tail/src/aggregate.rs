//! Aggregating tail stream
//!
//! Merges many [`FileTailStream`]s into one consumption surface. Member
//! streams signal "may have data" through one shared [`ChangeQueue`]; the
//! aggregate keeps a deque of members worth reading and tries them in order.
//!
//! Fairness: a member that produced a line stays at the front while it still
//! has lines buffered in memory, otherwise it moves to the back. A member that
//! produced nothing leaves the deque until it is notified again.
//!
//! With no members left, reads report end of stream. For a folder this is not
//! final: the next member added re-arms the aggregate.

use crate::stream::FileTailStream;
use ahash::AHashMap;
use logtrail_core::{ChangeQueue, Drain, Error, Line, LineSink, Result, Signal};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use ulid::Ulid;

/// What a notification on the merged queue is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceId {
    /// Folder membership changed; only triggers a re-check
    Folder,
    File(Ulid),
}

struct Members {
    streams: AHashMap<Ulid, Arc<FileTailStream>>,
    ready: VecDeque<Ulid>,
}

impl Members {
    fn mark_ready(&mut self, id: Ulid) {
        if self.streams.contains_key(&id) && !self.ready.contains(&id) {
            self.ready.push_back(id);
        }
    }
}

/// Line stream over a set of files
pub struct AggregateTailStream {
    queue: Arc<ChangeQueue<SourceId>>,
    members: Mutex<Members>,
}

impl AggregateTailStream {
    /// Aggregate over a directory's changing membership. Starts empty.
    pub fn for_folder() -> Self {
        let aggregate = Self::new();
        aggregate.queue.notify_empty();
        aggregate
    }

    /// Aggregate over a fixed set of streams. Ends when every member has ended.
    pub fn explicit<I>(streams: I) -> Self
    where
        I: IntoIterator<Item = Arc<FileTailStream>>,
    {
        let aggregate = Self::new();
        for stream in streams {
            aggregate.add(Ulid::new(), stream);
        }
        aggregate.check_empty();
        aggregate
    }

    fn new() -> Self {
        Self {
            queue: Arc::new(ChangeQueue::new()),
            members: Mutex::new(Members {
                streams: AHashMap::new(),
                ready: VecDeque::new(),
            }),
        }
    }

    /// Add a member under `id` (replacing any member with the same id).
    /// The member is checked for data on the next read.
    pub fn add(&self, id: Ulid, stream: Arc<FileTailStream>) {
        let queue = Arc::clone(&self.queue);
        stream.on_change(move || {
            queue.notify(SourceId::File(id));
        });
        self.members.lock().streams.insert(id, stream);
        self.queue.clear_empty();
        self.queue.notify(SourceId::File(id));
    }

    /// Stop reading a member. Pending notifications of other members are kept.
    pub fn remove(&self, id: Ulid) -> Option<Arc<FileTailStream>> {
        let removed = {
            let mut members = self.members.lock();
            members.ready.retain(|r| *r != id);
            members.streams.remove(&id)
        };
        self.queue.forget(&SourceId::File(id));
        self.check_empty();
        removed
    }

    /// Signal that membership changed
    pub fn membership_changed(&self) {
        self.queue.notify(SourceId::Folder);
    }

    pub fn len(&self) -> usize {
        self.members.lock().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: Ulid) -> bool {
        self.members.lock().streams.contains_key(&id)
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    fn check_empty(&self) {
        if self.is_empty() {
            self.queue.notify_empty();
        }
    }

    fn requeue(&self, source: SourceId) {
        if let SourceId::File(id) = source {
            self.members.lock().mark_ready(id);
        }
    }

    /// Next line from any member, `Ok(None)` when none has one right now
    fn next_line(&self) -> Result<Option<(Ulid, Line)>> {
        let mut members = self.members.lock();

        loop {
            match self.queue.try_poll() {
                Some(Signal::Ready(SourceId::File(id))) => members.mark_ready(id),
                Some(Signal::Ready(SourceId::Folder)) => {}
                Some(Signal::Closed) => return Err(Error::Closed),
                Some(Signal::Empty) | None => break,
            }
        }

        while let Some(id) = members.ready.pop_front() {
            let Some(stream) = members.streams.get(&id).cloned() else {
                continue;
            };
            match stream.try_poll() {
                Ok(Some(line)) => {
                    if stream.has_buffered_line() {
                        members.ready.push_front(id);
                    } else {
                        members.ready.push_back(id);
                    }
                    return Ok(Some((id, line)));
                }
                Ok(None) => {}
                Err(e) if e.is_terminal() => {
                    trace!(%id, path = %stream.path().display(), "Member ended");
                    members.streams.remove(&id);
                }
                Err(e) => return Err(e),
            }
        }

        if members.streams.is_empty() {
            drop(members);
            self.queue.notify_empty();
            return Err(Error::EndOfStream);
        }
        Ok(None)
    }

    /// Non-blocking read
    pub fn try_poll(&self) -> Result<Option<Line>> {
        Ok(self.next_line()?.map(|(_, line)| line))
    }

    /// Block until any member has a line
    pub fn take(&self) -> Result<Line> {
        loop {
            if let Some(line) = self.try_poll()? {
                return Ok(line);
            }
            match self.queue.take() {
                Signal::Ready(source) => self.requeue(source),
                Signal::Empty => return Err(Error::EndOfStream),
                Signal::Closed => return Err(Error::Closed),
            }
        }
    }

    /// Wait at most `timeout` for a line; `Ok(None)` on timeout
    pub fn poll(&self, timeout: Duration) -> Result<Option<Line>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(line) = self.try_poll()? {
                return Ok(Some(line));
            }
            match self.queue.poll_until(deadline) {
                None => return Ok(None),
                Some(Signal::Ready(source)) => self.requeue(source),
                Some(Signal::Empty) => return Err(Error::EndOfStream),
                Some(Signal::Closed) => return Err(Error::Closed),
            }
        }
    }

    /// Move up to `max` available lines into `sink` without blocking.
    ///
    /// A refused line goes back to its member, which is read first next time.
    pub fn drain_to<S: LineSink + ?Sized>(&self, sink: &mut S, max: usize) -> Result<Drain> {
        let mut moved = 0;
        while moved < max {
            match self.next_line() {
                Ok(Some((id, line))) => {
                    if let Err(line) = sink.offer(line) {
                        let mut members = self.members.lock();
                        if let Some(stream) = members.streams.get(&id) {
                            stream.push_back(line);
                            members.ready.retain(|r| *r != id);
                            members.ready.push_front(id);
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
    pub fn lines(&self) -> AggregateLines<'_> {
        AggregateLines {
            aggregate: self,
            done: false,
        }
    }

    /// Close the aggregate and every member. Idempotent.
    pub fn close(&self) {
        if self.queue.is_closed() {
            return;
        }
        self.queue.close();
        let streams: Vec<Arc<FileTailStream>> = {
            let mut members = self.members.lock();
            members.ready.clear();
            members.streams.drain().map(|(_, s)| s).collect()
        };
        debug!(members = streams.len(), "Closing aggregate stream");
        for stream in streams {
            stream.close();
        }
    }
}

impl std::fmt::Debug for AggregateTailStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let members = self.members.lock();
        f.debug_struct("AggregateTailStream")
            .field("members", &members.streams.len())
            .field("ready", &members.ready.len())
            .finish()
    }
}

/// Iterator returned by [`AggregateTailStream::lines`]
pub struct AggregateLines<'a> {
    aggregate: &'a AggregateTailStream,
    done: bool,
}

impl Iterator for AggregateLines<'_> {
    type Item = Result<Line>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.aggregate.take() {
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
