//! Source locations attached to generated operations.
use std::fmt;
use std::rc::Rc;

/// A position in a source file: `filename:line:column`.
///
/// Lines are counted from 1, columns from 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    filename: Rc<str>,
    line: u32,
    column: u32,
}

impl Location {
    pub fn new(filename: Rc<str>, line: u32, column: u32) -> Self {
        Location {
            filename,
            line,
            column,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.line, self.column)
    }
}
