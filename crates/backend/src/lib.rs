//! A small, typed code generation interface.
//!
//! Build up a [Context] with globals, functions, blocks and statements, then hand it to a
//! [Backend]: the portable [Interpreter], or the Cranelift-based [NativeBackend] that can also
//! write standalone executables.

mod context;
mod dump;
pub mod error;
pub mod interpret;
mod location;
mod program;
pub mod samples;
mod types;

#[cfg(feature = "native")]
pub mod native;

pub use context::{
    BinaryOp, Block, Case, Comparison, Context, Function, FunctionKind, Global, GlobalKind, LValue,
    Local, RValue,
};
pub use error::{BackendError, EmitError, RuntimeError};
pub use interpret::{InterpretedProgram, Interpreter};
pub use location::Location;
pub use program::{Backend, Executable, GetChar, PutChar};
pub use types::Type;

#[cfg(feature = "native")]
pub use native::{NativeBackend, NativeOptions, NativeProgram, OptLevel};
