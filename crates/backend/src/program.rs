//! Defines [Backend] and [Executable] that let you compile and run a [Context], regardless of how
//! the code is actually generated.

use std::path::Path;

use crate::context::Context;
use crate::error::{BackendError, EmitError, RuntimeError};

/// Has the same signature as `libc`'s `putchar(3)`.
pub type PutChar = extern "C" fn(i32) -> i32;
/// Has the same signature as `libc`'s `getchar(3)`.
pub type GetChar = extern "C" fn() -> i32;

/// Turns a finished [Context] into something that runs.
pub trait Backend {
    type Program: Executable;

    /// Human readable name, used in diagnostics.
    fn name(&self) -> &'static str;

    /// Compiles every function in the session into code that can run in this process.
    fn compile(&self, context: &Context) -> Result<Self::Program, BackendError>;

    /// Compiles the session into a standalone executable written to `path`. The session must
    /// define `main`.
    fn compile_to_file(&self, context: &Context, path: &Path) -> Result<(), EmitError>;
}

/// Compiled code that is ready to be executed.
pub trait Executable {
    /// Calls the function `name`. Arguments are passed as ints; the result is `None` for void
    /// functions.
    fn invoke(&mut self, name: &str, args: &[i32]) -> Result<Option<i32>, RuntimeError>;
}

impl<E: Executable + ?Sized> Executable for Box<E> {
    fn invoke(&mut self, name: &str, args: &[i32]) -> Result<Option<i32>, RuntimeError> {
        (**self).invoke(name, args)
    }
}
