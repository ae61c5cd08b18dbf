//! All errors that can be _generated_ by the compiler.
use std::io;
use std::path::PathBuf;

use brainjit_backend::{BackendError, EmitError, Location, RuntimeError};
use thiserror::Error;

/// Any error that occurs as a result of compiling (or running) the source code.
#[derive(Debug, Error)]
pub enum CompilationError {
    /// The loops in the source code are not properly nested.
    #[error("{location}: {}", .reason.message())]
    Syntax { reason: Reason, location: Location },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Emit(#[from] EmitError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("could not read {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// A `]` without an open `[`.
    UnmatchedClose,
    /// A `[` that is never closed.
    UnmatchedOpen,
}

impl CompilationError {
    pub fn syntax(reason: Reason, location: Location) -> Self {
        CompilationError::Syntax { reason, location }
    }

    /// Where in the source code the error happened, if it can be pinned down.
    pub fn location(&self) -> Option<&Location> {
        match self {
            CompilationError::Syntax { location, .. } => Some(location),
            _ => None,
        }
    }
}

impl Reason {
    pub fn message(&self) -> &'static str {
        use Reason::*;
        match self {
            UnmatchedClose => "mismatching parens",
            UnmatchedOpen => "mismatching parens: this '[' is never closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_errors_start_with_the_location() {
        let location = Location::new("x.bf".into(), 4, 2);
        let error = CompilationError::syntax(Reason::UnmatchedClose, location);
        assert_eq!(error.to_string(), "x.bf:4:2: mismatching parens");
        assert_eq!(error.location().map(|l| l.line()), Some(4));
    }
}
