//! Buffered input sources (§4.1 "Buffered input").
//!
//! Two content sources coexist behind the [`Content`] trait: a
//! [`ViewedContent`] is a shared byte span (used for in-memory buffers and
//! the bodies of `rept`/`macro` captures), and a [`BufferedContent`] refills
//! lazily from a `Read` source. Both support `peek(n)` and single-byte
//! consumption; `BufferedContent` is a straight growable buffer rather than
//! the original's fixed-size circular buffer - this crate never needs to
//! bound an individual source's memory footprint, so the simpler
//! representation is preferred over reproducing the ring-buffer indexing.

use std::io::Read;
use std::rc::Rc;

pub trait Content {
    /// Returns the byte `n` positions ahead of the cursor without consuming
    /// it, refilling from the underlying source if needed. `n == 0` is the
    /// very next byte.
    fn peek(&mut self, n: usize) -> Option<u8>;

    /// Consumes and returns the next byte.
    fn next_byte(&mut self) -> Option<u8> {
        let b = self.peek(0)?;
        self.advance(1);
        Some(b)
    }

    /// Advances the cursor by `n` bytes without returning them (used after
    /// `peek` decided how much to consume).
    fn advance(&mut self, n: usize);

    fn is_at_eof(&mut self) -> bool {
        self.peek(0).is_none()
    }
}

/// A shared byte span with a cursor - backs in-memory buffers and
/// `rept`/`macro` body captures (which share ownership of their source
/// bytes with the file they were captured from via `Rc`).
#[derive(Debug, Clone)]
pub struct ViewedContent {
    bytes: Rc<[u8]>,
    cursor: usize,
}

impl ViewedContent {
    pub fn new(bytes: impl Into<Rc<[u8]>>) -> ViewedContent {
        ViewedContent { bytes: bytes.into(), cursor: 0 }
    }

    pub fn from_span(bytes: Rc<[u8]>, start: usize, len: usize) -> ViewedContent {
        let end = (start + len).min(bytes.len());
        ViewedContent { bytes: bytes.slice_to_rc(start, end), cursor: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.cursor)
    }
}

/// Helper to slice an `Rc<[u8]>` while keeping shared ownership of the
/// backing allocation (plain `&bytes[a..b]` would drop the `Rc`).
trait RcSlice {
    fn slice_to_rc(&self, start: usize, end: usize) -> Rc<[u8]>;
}

impl RcSlice for Rc<[u8]> {
    fn slice_to_rc(&self, start: usize, end: usize) -> Rc<[u8]> {
        Rc::from(&self[start..end])
    }
}

impl Content for ViewedContent {
    fn peek(&mut self, n: usize) -> Option<u8> {
        self.bytes.get(self.cursor + n).copied()
    }

    fn advance(&mut self, n: usize) {
        self.cursor = (self.cursor + n).min(self.bytes.len());
    }
}

/// Refills lazily from a `Read` source; used for the top-level file and
/// `stdin` (`-`).
pub struct BufferedContent {
    reader: Box<dyn Read>,
    buf: Vec<u8>,
    cursor: usize,
    eof: bool,
}

impl BufferedContent {
    pub fn new(reader: Box<dyn Read>) -> BufferedContent {
        BufferedContent { reader, buf: Vec::new(), cursor: 0, eof: false }
    }

    fn ensure(&mut self, upto: usize) {
        while !self.eof && self.buf.len() <= self.cursor + upto {
            let mut chunk = [0u8; 256];
            match self.reader.read(&mut chunk) {
                Ok(0) | Err(_) => self.eof = true,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            }
        }
    }
}

impl Content for BufferedContent {
    fn peek(&mut self, n: usize) -> Option<u8> {
        self.ensure(n);
        self.buf.get(self.cursor + n).copied()
    }

    fn advance(&mut self, n: usize) {
        self.cursor += n;
    }
}
