//! Crate-wide error type.
//!
//! Mirrors the shape of a binary-parsing library's error enum: a handful of
//! named failure modes plus a catch-all for malformed input, with `From`
//! impls so `?` works against the I/O and byte-cursor layers underneath.

use core::fmt;
use core::result;
use std::io;

/// Something went wrong while assembling, reading an object file, or linking.
#[derive(Debug)]
pub enum Error {
    /// Wraps a `std::io::Error` (file not found, permission denied, ...).
    Io(io::Error),
    /// Wraps a `scroll::Error` that occurred while parsing/writing a byte buffer.
    Scroll(scroll::Error),
    /// The object file's magic number or revision didn't match what we understand.
    BadMagic(Vec<u8>),
    /// The object file (or a linker script, or an RPN buffer) is malformed in some
    /// specific, describable way.
    Malformed(String),
    /// A diagnostic that should abort the process immediately (the assembler/linker's
    /// "fatal" severity, see `diagnostics`).
    Fatal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Scroll(e) => write!(f, "parse error: {e}"),
            Error::BadMagic(magic) => write!(f, "invalid magic number: {magic:02x?}"),
            Error::Malformed(msg) => write!(f, "malformed object: {msg}"),
            Error::Fatal(msg) => write!(f, "fatal: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Scroll(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<scroll::Error> for Error {
    fn from(e: scroll::Error) -> Self {
        Error::Scroll(e)
    }
}

pub type Result<T> = result::Result<T, Error>;
