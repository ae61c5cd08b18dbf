//! Runs the scanner and the builder over a whole file, and hands the result to a [Backend].

use std::fs;
use std::path::Path;

use brainjit_backend::{Backend, Context, EmitError, Executable, Function, RuntimeError};
use log::{debug, info};

use crate::builder::ControlFlowBuilder;
use crate::errors::CompilationError;
use crate::scanner::Scanner;

/// The number of cells a bf program gets, unless told otherwise.
pub const CELL_COUNT: usize = 30_000;

/// The most cells a program may ask for.
pub const MAX_CELLS: usize = 1 << 24;

#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Size of the cell array.
    pub cells: usize,
    /// Name of the generated function.
    pub entry_point: String,
    /// Echo every source byte as execution reaches it.
    pub trace: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            cells: CELL_COUNT,
            entry_point: String::from("func"),
            trace: false,
        }
    }
}

/// Compiles bf programs with the given [Backend].
pub struct Compiler<B: Backend> {
    backend: B,
    options: CompilerOptions,
}

/// A successfully compiled program that has not been handed to the backend yet.
#[derive(Debug, Clone)]
pub struct Artifact {
    context: Context,
    entry: Function,
}

/// A program that is ready to run in this process.
pub struct CompiledProgram<P: Executable> {
    program: P,
    entry: String,
}

impl<B: Backend> Compiler<B> {
    pub fn new(backend: B, options: CompilerOptions) -> Self {
        Compiler { backend, options }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compiles `source` in one pass. `filename` is only used in diagnostics.
    pub fn compile(&self, filename: &str, source: &[u8]) -> Result<Artifact, CompilationError> {
        let mut context = Context::new();
        let mut builder = ControlFlowBuilder::new(&mut context, &self.options)?;
        for (byte, location) in Scanner::new(filename, source) {
            builder.compile_char(byte, location)?;
        }
        let entry = builder.finish()?;
        context.validate()?;

        debug!("compiled {} ({} bytes)", filename, source.len());
        Ok(Artifact { context, entry })
    }

    /// Reads and compiles the file at `path`.
    pub fn compile_file(&self, path: &Path) -> Result<Artifact, CompilationError> {
        let source = fs::read(path).map_err(|source| CompilationError::Io {
            path: path.to_owned(),
            source,
        })?;
        self.compile(&path.display().to_string(), &source)
    }

    /// Turns the artifact into code that runs in this process.
    pub fn emit_in_process(
        &self,
        artifact: &Artifact,
    ) -> Result<CompiledProgram<B::Program>, CompilationError> {
        let program = self.backend.compile(&artifact.context)?;
        info!("{} backend is ready to run `{}`", self.backend.name(), artifact.entry_name());

        Ok(CompiledProgram {
            program,
            entry: artifact.entry_name().to_owned(),
        })
    }

    /// Writes a standalone executable to `path`, with a `main` that calls the program.
    pub fn emit_to_file(&self, artifact: &Artifact, path: &Path) -> Result<(), EmitError> {
        let mut context = artifact.context.clone();
        context.new_main(artifact.entry)?;
        self.backend.compile_to_file(&context, path)?;

        info!("wrote {}", path.display());
        Ok(())
    }
}

impl Artifact {
    /// The backend session holding the program.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The name of the function that runs the program.
    pub fn entry_name(&self) -> &str {
        self.context.function_name(self.entry).unwrap_or_default()
    }
}

impl<P: Executable> CompiledProgram<P> {
    /// Runs the program from start to end.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        self.program.invoke(&self.entry, &[])?;
        Ok(())
    }

    pub fn entry_name(&self) -> &str {
        &self.entry
    }

    /// The backend's program, e.g. to run it with different I/O.
    pub fn program_mut(&mut self) -> &mut P {
        &mut self.program
    }
}
