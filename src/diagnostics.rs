//! Structured diagnostics (§7 "Error handling design").
//!
//! Four severities: [`Severity::Warning`] (configurable, may be escalated to
//! error), [`Severity::Error`] (recoverable, increments a counter),
//! [`Severity::ErrorNoTrace`] (same, but the caller supplies its own
//! backtrace), and [`Severity::Fatal`] (aborts immediately). Each warning also
//! has a name and a default enablement level (§7), consulted through
//! [`WarningState`].

use crate::fstack::FileStackNode;
use std::rc::Rc;

/// How severe a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
    ErrorNoTrace,
    Fatal,
}

/// The default enablement tier of a warning, from the `-W` flag grammar (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WarningLevel {
    Default,
    All,
    Extra,
    Everything,
}

/// One of the named warnings from §7, plus the handful the RPN/patch
/// evaluators raise by name in §4.3/§4.8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningId {
    Truncation1,
    Truncation2,
    ShiftAmount,
    Shift,
    Div,
    Purge,
    UnmappedChar,
    Obsolete,
    Assert,
    User,
    LargeConstant,
    EmptyEntry,
    LongStr,
    BuiltinArg,
}

impl WarningId {
    pub fn name(self) -> &'static str {
        match self {
            WarningId::Truncation1 | WarningId::Truncation2 => "truncation",
            WarningId::ShiftAmount => "shift-amount",
            WarningId::Shift => "shift",
            WarningId::Div => "div",
            WarningId::Purge => "purge",
            WarningId::UnmappedChar => "unmapped-char",
            WarningId::Obsolete => "obsolete",
            WarningId::Assert => "assert",
            WarningId::User => "user",
            WarningId::LargeConstant => "large-constant",
            WarningId::EmptyEntry => "empty-entry",
            WarningId::LongStr => "long-str",
            WarningId::BuiltinArg => "builtin-arg",
        }
    }

    pub fn default_level(self) -> WarningLevel {
        match self {
            WarningId::Truncation1 | WarningId::Div | WarningId::Purge | WarningId::Assert => {
                WarningLevel::Default
            }
            WarningId::Truncation2 | WarningId::ShiftAmount | WarningId::Shift => {
                WarningLevel::All
            }
            WarningId::UnmappedChar | WarningId::LargeConstant | WarningId::EmptyEntry => {
                WarningLevel::Extra
            }
            WarningId::Obsolete | WarningId::LongStr | WarningId::BuiltinArg => {
                WarningLevel::Everything
            }
            WarningId::User => WarningLevel::Default,
        }
    }
}

/// What happens when a given warning fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningBehavior {
    Disabled,
    Enabled,
    Error,
}

/// Tracks which warning tier is enabled and any per-warning overrides (the
/// `-W` flag grammar populates this; parsing the flag itself is out of
/// scope, §1).
#[derive(Debug, Clone)]
pub struct WarningState {
    pub enabled_level: WarningLevel,
    /// `-Werror` - every enabled warning becomes an error.
    pub error_all: bool,
    overrides: std::collections::HashMap<WarningId, WarningBehavior>,
}

impl Default for WarningState {
    fn default() -> Self {
        WarningState {
            enabled_level: WarningLevel::Default,
            error_all: false,
            overrides: std::collections::HashMap::new(),
        }
    }
}

impl WarningState {
    pub fn set(&mut self, id: WarningId, behavior: WarningBehavior) {
        self.overrides.insert(id, behavior);
    }

    pub fn behavior(&self, id: WarningId) -> WarningBehavior {
        if let Some(b) = self.overrides.get(&id) {
            return *b;
        }
        if id.default_level() > self.enabled_level {
            WarningBehavior::Disabled
        } else if self.error_all {
            WarningBehavior::Error
        } else {
            WarningBehavior::Enabled
        }
    }
}

/// A fully-formed diagnostic: message, severity, and the backtrace it was
/// raised at.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub backtrace: Vec<String>,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            Severity::Warning => "warning",
            Severity::Error | Severity::ErrorNoTrace => "error",
            Severity::Fatal => "FATAL",
        };
        writeln!(f, "{tag}: {}", self.message)?;
        for line in &self.backtrace {
            writeln!(f, "    at {line}")?;
        }
        Ok(())
    }
}

/// Accumulates diagnostics and enforces the recovery policy (§7): the
/// assembler keeps going after ordinary errors, but aborts immediately on a
/// fatal one, or once the error count reaches `max_errors`.
pub struct DiagnosticSink {
    pub diagnostics: Vec<Diagnostic>,
    pub error_count: u32,
    pub max_errors: u32,
    pub warnings: WarningState,
}

impl DiagnosticSink {
    pub fn new(max_errors: u32) -> Self {
        DiagnosticSink {
            diagnostics: Vec::new(),
            error_count: 0,
            max_errors,
            warnings: WarningState::default(),
        }
    }

    fn backtrace_of(node: Option<&Rc<FileStackNode>>) -> Vec<String> {
        node.map(|n| n.backtrace()).unwrap_or_default()
    }

    /// Emits a warning. Returns whether it was promoted to an error by the
    /// current warning state.
    pub fn warn(&mut self, id: WarningId, message: impl Into<String>, node: Option<&Rc<FileStackNode>>) -> bool {
        match self.warnings.behavior(id) {
            WarningBehavior::Disabled => false,
            WarningBehavior::Enabled => {
                self.diagnostics.push(Diagnostic {
                    severity: Severity::Warning,
                    message: message.into(),
                    backtrace: Self::backtrace_of(node),
                });
                false
            }
            WarningBehavior::Error => {
                self.error(message, node);
                true
            }
        }
    }

    /// Emits a recoverable error: the message plus the current backtrace.
    /// Returns a `Result::Err` is left to the caller - accumulating an error
    /// does not itself stop execution, matching §7's "recovers".
    pub fn error(&mut self, message: impl Into<String>, node: Option<&Rc<FileStackNode>>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            backtrace: Self::backtrace_of(node),
        });
        self.error_count += 1;
    }

    /// Like [`Self::error`], but the caller supplies its own backtrace lines
    /// (used when a diagnostic spans more than the current file-stack
    /// position, e.g. "symbol defined here, also referenced here").
    pub fn error_no_trace(&mut self, message: impl Into<String>, backtrace: Vec<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::ErrorNoTrace,
            message: message.into(),
            backtrace,
        });
        self.error_count += 1;
    }

    /// Whether the error counter has reached the configured maximum and
    /// assembly/linking should abort (§7, §5 "Cancellation").
    pub fn should_abort(&self) -> bool {
        self.max_errors != 0 && self.error_count >= self.max_errors
    }

    /// Builds a [`crate::error::Error::Fatal`] for an unconditional abort,
    /// recording it in the sink first so it shows up alongside any
    /// previously-accumulated diagnostics.
    pub fn fatal(&mut self, message: impl Into<String>, node: Option<&Rc<FileStackNode>>) -> crate::error::Error {
        let message = message.into();
        self.diagnostics.push(Diagnostic {
            severity: Severity::Fatal,
            message: message.clone(),
            backtrace: Self::backtrace_of(node),
        });
        crate::error::Error::Fatal(message)
    }
}
