//! Error kinds and diagnostics.
//!
//! Errors are values, never panics. Scan, parse and eval errors carry the
//! position at which they occurred; errors that bubble out of module loading
//! get wrapped with context but keep the innermost positioned root, so
//! [`format_error`] can render one `file:line:col: message` line per link in
//! the cause chain.

use std::fmt;

use thiserror::Error;

use crate::token::{FileSet, Pos};
use crate::values::Val;

#[derive(Debug, Clone, Error)]
#[error("scan error: {msg} at position {pos}")]
pub struct ScanError {
    pub pos: Pos,
    pub msg: String,
}

impl ScanError {
    pub fn new(pos: Pos, msg: impl Into<String>) -> Self {
        Self {
            pos,
            msg: msg.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("parse error: {msg} at position {pos}")]
pub struct ParseError {
    pub pos: Pos,
    pub msg: String,
}

impl ParseError {
    pub fn new(pos: Pos, msg: impl Into<String>) -> Self {
        Self {
            pos,
            msg: msg.into(),
        }
    }
}

/// The error type commonly returned when evaluation of an expression or a
/// module fails. `cause` chains the error that made this one surface.
#[derive(Debug)]
pub struct EvalError {
    pub pos: Pos,
    pub msg: String,
    pub cause: Option<Box<Error>>,
}

impl EvalError {
    pub fn new(pos: Pos, msg: impl Into<String>) -> Self {
        Self {
            pos,
            msg: msg.into(),
            cause: None,
        }
    }

    pub fn with_cause(pos: Pos, msg: impl Into<String>, cause: Error) -> Self {
        Self {
            pos,
            msg: msg.into(),
            cause: Some(Box::new(cause)),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(
                f,
                "eval error: {} (caused by: {}) at position {}",
                self.msg, cause, self.pos
            ),
            None => write!(f, "eval error: {} at position {}", self.msg, self.pos),
        }
    }
}

/// The most generic error: a message chained over an optional cause. Used
/// where no position is available (module resolution, I/O, call plumbing).
#[derive(Debug)]
pub struct KonfiError {
    pub msg: String,
    pub cause: Option<Box<Error>>,
}

impl fmt::Display for KonfiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}", self.msg, cause),
            None => write!(f, "{}", self.msg),
        }
    }
}

/// A language-level error raised by the `error(v)` builtin. Only `pcall`
/// intercepts these; everywhere else they surface like any other failure.
#[derive(Debug, Clone)]
pub struct UserError {
    pub value: Val,
}

impl fmt::Display for UserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {}", self.value.render())
    }
}

#[derive(Debug)]
pub enum Error {
    Scan(ScanError),
    Parse(ParseError),
    Eval(EvalError),
    Konfi(KonfiError),
    User(UserError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Scan(e) => e.fmt(f),
            Error::Parse(e) => e.fmt(f),
            Error::Eval(e) => e.fmt(f),
            Error::Konfi(e) => e.fmt(f),
            Error::User(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<ScanError> for Error {
    fn from(e: ScanError) -> Self {
        Error::Scan(e)
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

impl From<EvalError> for Error {
    fn from(e: EvalError) -> Self {
        Error::Eval(e)
    }
}

impl From<KonfiError> for Error {
    fn from(e: KonfiError) -> Self {
        Error::Konfi(e)
    }
}

impl From<UserError> for Error {
    fn from(e: UserError) -> Self {
        Error::User(e)
    }
}

impl Error {
    /// A plain, unpositioned error message.
    pub fn msg(msg: impl Into<String>) -> Self {
        Error::Konfi(KonfiError {
            msg: msg.into(),
            cause: None,
        })
    }

    /// The user error in this chain, if any link is one.
    pub fn user_error(&self) -> Option<&UserError> {
        let mut cur = Some(self);
        while let Some(err) = cur {
            match err {
                Error::User(u) => return Some(u),
                Error::Eval(e) => cur = e.cause.as_deref(),
                Error::Konfi(e) => cur = e.cause.as_deref(),
                Error::Scan(_) | Error::Parse(_) => return None,
            }
        }
        None
    }
}

/// Wraps `cause` with a contextual message.
pub fn chain_error(cause: Error, msg: impl Into<String>) -> Error {
    Error::Konfi(KonfiError {
        msg: msg.into(),
        cause: Some(Box::new(cause)),
    })
}

/// Renders the full cause chain of `err`, one line per link, prefixing each
/// positioned link with `file:line:col`.
pub fn format_error(err: &Error, fileset: &FileSet) -> String {
    let pos_prefix = |pos: Pos| match fileset.position_of(pos) {
        Some(p) => p.to_string(),
        None => format!("position {pos}"),
    };
    let mut msgs = Vec::new();
    let mut cur = Some(err);
    while let Some(e) = cur {
        match e {
            Error::Scan(s) => {
                msgs.push(format!("{}: {}", pos_prefix(s.pos), s.msg));
                cur = None;
            }
            Error::Parse(p) => {
                msgs.push(format!("{}: {}", pos_prefix(p.pos), p.msg));
                cur = None;
            }
            Error::Eval(ev) => {
                msgs.push(format!("{}: {}", pos_prefix(ev.pos), ev.msg));
                cur = ev.cause.as_deref();
            }
            Error::Konfi(k) => {
                msgs.push(k.msg.clone());
                cur = k.cause.as_deref();
            }
            Error::User(u) => {
                msgs.push(u.to_string());
                cur = None;
            }
        }
    }
    msgs.join("\n")
}
