//! Turns source text into a stream of bytes, each tagged with where it came from.

use std::rc::Rc;
use std::slice;

use brainjit_backend::Location;

/// A one-pass iterator over `(byte, location)` pairs, in file order.
///
/// The location of a byte is where the byte starts: lines are counted from 1 and columns from
/// 0. A newline moves to the start of the next line.
pub struct Scanner<'a> {
    filename: Rc<str>,
    bytes: slice::Iter<'a, u8>,
    line: u32,
    column: u32,
}

impl<'a> Scanner<'a> {
    pub fn new(filename: &str, source: &'a [u8]) -> Self {
        Scanner {
            filename: Rc::from(filename),
            bytes: source.iter(),
            line: 1,
            column: 0,
        }
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = (u8, Location);

    fn next(&mut self) -> Option<Self::Item> {
        let byte = *self.bytes.next()?;
        let location = Location::new(self.filename.clone(), self.line, self.column);

        if byte == b'\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }

        Some((byte, location))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.bytes.size_hint()
    }
}
