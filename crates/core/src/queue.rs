//! Coalescing change notification queue
//!
//! At most one pending notification per source: a second `notify` before the
//! first is consumed is a no-op. Consumers learn "this source changed since
//! you last looked", never how many times, and must re-check the source for
//! actual data.
//!
//! Besides sources the queue carries two sentinels:
//! - a standing *empty* flag ("no sources remain"), surfaced as
//!   [`Signal::Empty`] whenever nothing is pending, cleared by the next
//!   `notify` or by `clear_empty`
//! - a terminal *closed* flag, surfaced as [`Signal::Closed`] to every blocked
//!   and future caller

use ahash::AHashSet;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// What a consumer observes when it takes from the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal<S> {
    /// This source has changed since it was last taken
    Ready(S),
    /// Nothing is pending and no sources remain
    Empty,
    /// The queue is closed
    Closed,
}

struct State<S> {
    order: VecDeque<S>,
    pending: AHashSet<S>,
    empty: bool,
    closed: bool,
}

impl<S: Clone + Eq + Hash> State<S> {
    fn next(&mut self) -> Option<Signal<S>> {
        if self.closed {
            return Some(Signal::Closed);
        }
        if let Some(source) = self.order.pop_front() {
            self.pending.remove(&source);
            return Some(Signal::Ready(source));
        }
        if self.empty {
            return Some(Signal::Empty);
        }
        None
    }
}

/// Single-writer, many-reader coalescing wakeup queue keyed by source
pub struct ChangeQueue<S> {
    state: Mutex<State<S>>,
    cond: Condvar,
}

impl<S: Clone + Eq + Hash> ChangeQueue<S> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                order: VecDeque::new(),
                pending: AHashSet::new(),
                empty: false,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Mark `source` as changed. Returns `false` if it was already pending
    /// (coalesced) or the queue is closed.
    pub fn notify(&self, source: S) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.empty = false;
        if !state.pending.insert(source.clone()) {
            return false;
        }
        state.order.push_back(source);
        drop(state);
        self.cond.notify_one();
        true
    }

    /// Block until a signal is available
    pub fn take(&self) -> Signal<S> {
        let mut state = self.state.lock();
        loop {
            if let Some(signal) = state.next() {
                return signal;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Block for at most `timeout`; `None` on timeout
    pub fn poll_timeout(&self, timeout: Duration) -> Option<Signal<S>> {
        self.poll_until(Instant::now() + timeout)
    }

    /// Block until `deadline`; `None` if it passes with nothing to report
    pub fn poll_until(&self, deadline: Instant) -> Option<Signal<S>> {
        let mut state = self.state.lock();
        loop {
            if let Some(signal) = state.next() {
                return Some(signal);
            }
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return state.next();
            }
        }
    }

    /// Non-blocking poll
    pub fn try_poll(&self) -> Option<Signal<S>> {
        self.state.lock().next()
    }

    /// Raise the standing "no sources remain" sentinel
    pub fn notify_empty(&self) {
        let mut state = self.state.lock();
        state.empty = true;
        drop(state);
        self.cond.notify_all();
    }

    pub fn clear_empty(&self) {
        self.state.lock().empty = false;
    }

    /// Drop a pending notification for a source that is going away
    pub fn forget(&self, source: &S) {
        let mut state = self.state.lock();
        if state.pending.remove(source) {
            state.order.retain(|s| s != source);
        }
    }

    /// Close the queue; every blocked and future call observes [`Signal::Closed`].
    /// Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_pending(&self, source: &S) -> bool {
        self.state.lock().pending.contains(source)
    }

    /// Number of pending sources
    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: Clone + Eq + Hash> Default for ChangeQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}
