//! Line records and the sinks bulk drains write into

use crate::key::FileKey;
use bytes::Bytes;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

/// Which file a line came from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineSource {
    /// Logical identity, if the reader was opened for a tracked file
    pub key: Option<FileKey>,
    /// Path the reader was opened on
    pub path: Arc<Path>,
}

impl LineSource {
    pub fn new(key: Option<FileKey>, path: impl Into<Arc<Path>>) -> Self {
        Self {
            key,
            path: path.into(),
        }
    }
}

/// One `\n`-terminated byte run read from a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Raw bytes including the trailing `\n` (absent only for a final
    /// unterminated line of a static file)
    pub bytes: Bytes,
    /// 1-based, monotonic per reader
    pub line_number: u64,
    pub source: LineSource,
    /// Byte offset of the first byte of this line
    pub offset: u64,
}

impl Line {
    /// Offset immediately after this line
    pub fn end_offset(&self) -> u64 {
        self.offset + self.bytes.len() as u64
    }

    pub fn is_terminated(&self) -> bool {
        self.bytes.last() == Some(&b'\n')
    }

    /// Line contents without the `\n` / `\r\n` terminator
    pub fn content(&self) -> &[u8] {
        let mut end = self.bytes.len();
        if end > 0 && self.bytes[end - 1] == b'\n' {
            end -= 1;
            if end > 0 && self.bytes[end - 1] == b'\r' {
                end -= 1;
            }
        }
        &self.bytes[..end]
    }

    /// Lossy UTF-8 view of [`Line::content`]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.content())
    }
}

/// Destination of a bulk drain
///
/// `offer` hands the line back when the sink cannot accept it, which the
/// drain reports as [`Drain::QueueFull`].
pub trait LineSink {
    fn offer(&mut self, line: Line) -> Result<(), Line>;
}

impl LineSink for Vec<Line> {
    fn offer(&mut self, line: Line) -> Result<(), Line> {
        self.push(line);
        Ok(())
    }
}

impl LineSink for VecDeque<Line> {
    fn offer(&mut self, line: Line) -> Result<(), Line> {
        self.push_back(line);
        Ok(())
    }
}

impl LineSink for crossbeam_channel::Sender<Line> {
    fn offer(&mut self, line: Line) -> Result<(), Line> {
        self.try_send(line).map_err(|e| e.into_inner())
    }
}

/// Fixed-capacity sink
#[derive(Debug, Default)]
pub struct BoundedSink {
    lines: Vec<Line>,
    capacity: usize,
}

impl BoundedSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.lines.len() >= self.capacity
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn into_inner(self) -> Vec<Line> {
        self.lines
    }
}

impl LineSink for BoundedSink {
    fn offer(&mut self, line: Line) -> Result<(), Line> {
        if self.is_full() {
            return Err(line);
        }
        self.lines.push(line);
        Ok(())
    }
}

/// Result of a bulk drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// This many lines were moved into the sink (possibly zero)
    Moved(usize),
    /// The stream has ended; nothing more will ever be produced
    EndOfStream,
    /// The sink rejected a line; it was pushed back and will be returned next
    QueueFull,
}

impl Drain {
    pub const EOF: i64 = -1;
    pub const QUEUE_FULL: i64 = -2;

    /// Integer form: count, `-1` for end of stream, `-2` for a full sink
    pub fn code(self) -> i64 {
        match self {
            Drain::Moved(n) => n as i64,
            Drain::EndOfStream => Self::EOF,
            Drain::QueueFull => Self::QUEUE_FULL,
        }
    }
}
