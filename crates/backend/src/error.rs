//! Errors surfaced by the backend.
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::location::Location;

pub type Result<T> = std::result::Result<T, BackendError>;

/// Something went wrong declaring or compiling code.
#[derive(Debug, Error)]
pub enum BackendError {
    /// An operation was rejected while building the session, e.g. a type mismatch.
    #[error("{}{message}", prefix(.location))]
    Invalid {
        message: String,
        location: Option<Location>,
    },
    /// The code generator itself failed.
    #[error("code generation failed: {0}")]
    Codegen(String),
    /// An imported function has no definition the backend can bind to.
    #[error("unresolved symbol `{0}`")]
    UnresolvedSymbol(String),
}

/// The compiled code could not be persisted as an executable.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("could not write {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("linker `{linker}` failed: {stderr}")]
    Link { linker: String, stderr: String },
    #[error("the {0} backend cannot produce executables")]
    Unsupported(&'static str),
}

/// Failure while running compiled code.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{}cell index {index} is outside of 0..{len}", prefix(.location))]
    OutOfBounds {
        index: i64,
        len: usize,
        location: Option<Location>,
    },
    #[error("{}division by zero", prefix(.location))]
    DivisionByZero { location: Option<Location> },
    #[error("call depth exceeded {0}")]
    StackOverflow(usize),
    #[error("no function named `{0}`")]
    UnknownFunction(String),
    #[error("`{name}` takes {expected} argument(s) but {given} were given")]
    ArityMismatch {
        name: String,
        expected: usize,
        given: usize,
    },
    #[error("cannot invoke `{0}`: only int parameters and int or void results are supported")]
    UnsupportedSignature(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BackendError {
    pub(crate) fn invalid(message: impl Into<String>, location: Option<&Location>) -> Self {
        BackendError::Invalid {
            message: message.into(),
            location: location.cloned(),
        }
    }
}

fn prefix(location: &Option<Location>) -> String {
    location
        .as_ref()
        .map(|l| format!("{}: ", l))
        .unwrap_or_default()
}
