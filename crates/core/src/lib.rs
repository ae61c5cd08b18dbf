//! Brainjit internals.
//!
//! A bf program is compiled in a single pass, with no syntax tree in between:
//!
//!  - the [scanner] turns source bytes into bytes tagged with their [Location];
//!  - the [builder] translates each byte straight into basic blocks of a backend
//!    [Context](brainjit_backend::Context), keeping a stack of the loops that are still open;
//!  - the [driver] runs both over a whole file, and gives the resulting [Artifact] to a backend,
//!    either to run it in this process or to write an executable.

pub mod builder;
pub mod driver;
pub mod errors;
pub mod scanner;

pub use brainjit_backend::Location;

pub use crate::builder::ControlFlowBuilder;
pub use crate::driver::{
    Artifact, CompiledProgram, Compiler, CompilerOptions, CELL_COUNT, MAX_CELLS,
};
pub use crate::errors::{CompilationError, Reason};
pub use crate::scanner::Scanner;
