//! Buffered line reader over one file handle
//!
//! Frames complete `\n`-terminated lines, keeps partial trailing data until
//! the rest of the line arrives, supports pushing back an over-read line and
//! tracks the resumable byte offset (the offset right after the last line
//! handed out).

use crate::key::NativeId;
use crate::line::{Line, LineSource};
use crate::position::ReaderPosition;
use bytes::Bytes;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

/// Byte-oriented random-access line reader
pub struct LineReader {
    file: File,
    source: LineSource,
    /// Bytes read from disk; `buf[buf_start..]` is not yet framed
    buf: Vec<u8>,
    buf_start: usize,
    /// File position matching the end of `buf`
    file_pos: u64,
    /// Offset right after the last delivered line
    offset: u64,
    /// Number of the last delivered line
    line_number: u64,
    pushed_back: VecDeque<Line>,
    chunk_size: usize,
}

impl LineReader {
    /// Open `path` and position the reader at `position`.
    ///
    /// A position past the end of the file means the file was truncated or
    /// replaced since the position was saved; the reader then starts at 0.
    pub fn open(
        path: &Path,
        source: LineSource,
        position: ReaderPosition,
        chunk_size: usize,
    ) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        let position = if position.offset > len {
            warn!(
                path = %path.display(),
                saved = position.offset,
                len,
                "Saved offset is past end of file, starting from the beginning"
            );
            ReaderPosition::default()
        } else {
            position
        };
        file.seek(SeekFrom::Start(position.offset))?;

        Ok(Self {
            file,
            source,
            buf: Vec::with_capacity(chunk_size),
            buf_start: 0,
            file_pos: position.offset,
            offset: position.offset,
            line_number: position.line_number,
            pushed_back: VecDeque::new(),
            chunk_size: chunk_size.max(1),
        })
    }

    /// Open `path` positioned at its current end
    pub fn open_at_end(path: &Path, source: LineSource, chunk_size: usize) -> io::Result<Self> {
        let len = std::fs::metadata(path)?.len();
        Self::open(path, source, ReaderPosition::new(len, 0), chunk_size)
    }

    /// Read the next complete line, or `None` if no complete line is available yet.
    pub fn read_line(&mut self) -> io::Result<Option<Line>> {
        if let Some(line) = self.pushed_back.pop_front() {
            self.offset = line.end_offset();
            self.line_number = line.line_number;
            return Ok(Some(line));
        }

        loop {
            if let Some(line) = self.frame_line() {
                return Ok(Some(line));
            }
            if self.fill()? == 0 {
                self.check_truncation()?;
                return Ok(None);
            }
        }
    }

    /// Like [`LineReader::read_line`], but at end of file hands out any
    /// unterminated trailing bytes as a final line. Only meaningful for files
    /// that are no longer being written.
    pub fn read_line_or_remainder(&mut self) -> io::Result<Option<Line>> {
        if let Some(line) = self.read_line()? {
            return Ok(Some(line));
        }
        if self.buf_start == self.buf.len() {
            return Ok(None);
        }

        let start = self.buf_start;
        let bytes = Bytes::copy_from_slice(&self.buf[start..]);
        self.buf_start = self.buf.len();
        Ok(Some(self.emit(bytes, start)))
    }

    /// Return a line to the reader; it is handed out again by the next read.
    ///
    /// Lines must be pushed back newest first so that they come back out in
    /// their original order.
    pub fn push_back(&mut self, line: Line) {
        self.offset = line.offset;
        self.line_number = line.line_number.saturating_sub(1);
        self.pushed_back.push_front(line);
    }

    /// Whether a complete line can be returned without touching the disk
    pub fn has_buffered_line(&self) -> bool {
        !self.pushed_back.is_empty() || self.buf[self.buf_start..].contains(&b'\n')
    }

    /// Bytes read from disk that are not yet part of a delivered line
    pub fn pending_bytes(&self) -> usize {
        self.buf.len() - self.buf_start
    }

    /// Identity of the open handle, which may differ from whatever the path
    /// names by now
    pub fn native_id(&self) -> Option<NativeId> {
        let meta = self.file.metadata().ok()?;
        NativeId::from_metadata(&meta)
    }

    /// Resumable position (offset after the last delivered line)
    pub fn position(&self) -> ReaderPosition {
        ReaderPosition::new(self.offset, self.line_number)
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn line_number(&self) -> u64 {
        self.line_number
    }

    pub fn source(&self) -> &LineSource {
        &self.source
    }

    /// Re-attribute future lines (the file was renamed under an open handle)
    pub fn set_source(&mut self, source: LineSource) {
        self.source = source;
    }

    fn frame_line(&mut self) -> Option<Line> {
        let start = self.buf_start;
        let newline = self.buf[start..].iter().position(|&b| b == b'\n')?;
        let end = start + newline + 1;
        let bytes = Bytes::copy_from_slice(&self.buf[start..end]);
        self.buf_start = end;
        Some(self.emit(bytes, start))
    }

    fn emit(&mut self, bytes: Bytes, buf_index: usize) -> Line {
        let offset = self.file_pos - (self.buf.len() - buf_index) as u64;
        self.line_number += 1;
        self.offset = offset + bytes.len() as u64;
        Line {
            bytes,
            line_number: self.line_number,
            source: self.source.clone(),
            offset,
        }
    }

    fn fill(&mut self) -> io::Result<usize> {
        if self.buf_start > 0 {
            self.buf.drain(..self.buf_start);
            self.buf_start = 0;
        }

        let len = self.buf.len();
        self.buf.resize(len + self.chunk_size, 0);
        loop {
            match self.file.read(&mut self.buf[len..]) {
                Ok(n) => {
                    self.buf.truncate(len + n);
                    self.file_pos += n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(len);
                    return Err(e);
                }
            }
        }
    }

    /// A file shorter than what was already read has been truncated in place.
    fn check_truncation(&mut self) -> io::Result<()> {
        let len = self.file.metadata()?.len();
        if len >= self.file_pos {
            return Ok(());
        }

        warn!(
            path = %self.source.path.display(),
            len,
            read_to = self.file_pos,
            "File truncated, rewinding to start"
        );
        self.file.seek(SeekFrom::Start(0))?;
        self.buf.clear();
        self.buf_start = 0;
        self.file_pos = 0;
        self.offset = 0;
        self.pushed_back.clear();
        debug!(line_number = self.line_number, "Line numbering continues after truncation");
        Ok(())
    }
}

impl std::fmt::Debug for LineReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineReader")
            .field("path", &self.source.path)
            .field("offset", &self.offset)
            .field("line_number", &self.line_number)
            .field("pending", &self.pending_bytes())
            .finish()
    }
}
