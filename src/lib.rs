//! An assembler/linker core for Sharp LR35902 (Game Boy) assembly.
//!
//! This crate implements the data model and algorithms shared by an
//! RGBDS-style toolchain's assembler and linker: a lexer with a recursive
//! file/macro/repeat expansion stack (`lexer`, `fstack`), an RPN expression
//! engine with eager constant folding (`rpn`), a symbol/section model
//! (`symbol`, `section`), a versioned object-file format (`object`), and a
//! linker that places sections and resolves patches into a ROM image
//! (`linker`). Opcode encoding, the assembly grammar beyond what this data
//! model requires, and CLI flag parsing are deliberately out of scope - see
//! each module's doc comment for the exact boundary.

pub mod charmap;
pub mod diagnostics;
pub mod error;
pub mod fixedpoint;
pub mod fstack;
pub mod lexer;
pub mod linker;
pub mod object;
pub mod options;
pub mod rpn;
pub mod section;
pub mod statedump;
pub mod symbol;

pub use error::{Error, Result};
