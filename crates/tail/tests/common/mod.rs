//! Common utilities for integration tests

use logtrail_core::config::{IdentityStrategyKind, StartPosition, WatchBackend};
use logtrail_core::{Error, Line, Result, TailConfig};
use logtrail_tail::{AggregateTailStream, FileTailStream, FolderTail};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound for anything that waits on the watcher
pub const WAIT: Duration = Duration::from_secs(5);

/// Native backend, reading existing files from the beginning
pub fn config() -> TailConfig {
    let mut config = TailConfig::default();
    config.reader.start = StartPosition::Beginning;
    config.watch.batch_window_ms = 10;
    config
}

/// Poll backend with a short interval
pub fn poll_config() -> TailConfig {
    let mut config = config();
    config.watch.backend = WatchBackend::Poll;
    config.watch.poll_interval_ms = 50;
    config
}

pub fn signature_config() -> TailConfig {
    let mut config = config();
    config.identity.strategy = IdentityStrategyKind::Signature;
    config.identity.freshness_ms = 0;
    config
}

pub fn append(path: &Path, data: &[u8]) {
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .unwrap();
    file.write_all(data).unwrap();
    file.flush().unwrap();
}

/// Anything lines can be polled from
pub trait Pollable {
    fn poll_for(&self, timeout: Duration) -> Result<Option<Line>>;
}

impl Pollable for FileTailStream {
    fn poll_for(&self, timeout: Duration) -> Result<Option<Line>> {
        self.poll(timeout)
    }
}

/// A folder reports end of stream while it tracks no file, for instance
/// between a rotated file ending and its successor being picked up. Keep
/// waiting until the timeout.
impl Pollable for FolderTail {
    fn poll_for(&self, timeout: Duration) -> Result<Option<Line>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.poll(remaining) {
                Err(Error::EndOfStream) if !remaining.is_zero() => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(Error::EndOfStream) => return Ok(None),
                other => return other,
            }
        }
    }
}

impl Pollable for AggregateTailStream {
    fn poll_for(&self, timeout: Duration) -> Result<Option<Line>> {
        self.poll(timeout)
    }
}

/// Next line, failing the test if none arrives in time
pub fn next_line<P: Pollable>(source: &P) -> Line {
    source
        .poll_for(WAIT)
        .expect("stream failed")
        .expect("timed out waiting for a line")
}

/// Read `count` lines
pub fn collect_lines<P: Pollable>(source: &P, count: usize) -> Vec<Line> {
    (0..count).map(|_| next_line(source)).collect()
}

pub fn texts(lines: &[Line]) -> Vec<String> {
    lines.iter().map(|l| l.text().into_owned()).collect()
}

/// Poll `condition` until it holds or `WAIT` passes
pub fn wait_until<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}
