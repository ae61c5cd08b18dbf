use std::path::PathBuf;
use std::process;

use brainjit_backend::{Backend, Interpreter, NativeBackend, NativeOptions, OptLevel};
use brainjit_core::{CompilationError, Compiler, CompilerOptions, MAX_CELLS};
use log::debug;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "brainjit", about = "Compiles bf programs to native code.")]
struct Opt {
    /// The bf program to compile.
    #[structopt(parse(from_os_str))]
    input: PathBuf,

    /// Write an executable to this path instead of running the program.
    #[structopt(short, long, parse(from_os_str))]
    output: Option<PathBuf>,

    /// How to run the program.
    #[structopt(long, default_value = "native", possible_values = &["native", "interpret"])]
    backend: String,

    /// Optimization level of the native backend.
    #[structopt(short = "O", default_value = "2", possible_values = &["0", "1", "2"])]
    opt_level: u8,

    /// Attach source locations to the generated code.
    #[structopt(short = "g")]
    debug_info: bool,

    /// Number of cells available to the program.
    #[structopt(long, default_value = "30000", parse(try_from_str = parse_cells))]
    cells: usize,

    /// Name of the generated function.
    #[structopt(long, default_value = "func")]
    entry: String,

    /// Print every command as it executes.
    #[structopt(long)]
    trace: bool,

    /// Print the generated code to stderr.
    #[structopt(long)]
    dump_ir: bool,

    /// Linker used to produce executables.
    #[structopt(long, default_value = "cc")]
    linker: String,
}

fn main() {
    env_logger::init();
    let opt = Opt::from_args();
    debug!("{:?}", opt);

    if let Err(error) = run(&opt) {
        eprintln!("{}", error);
        process::exit(1);
    }
}

fn run(opt: &Opt) -> Result<(), CompilationError> {
    let options = CompilerOptions {
        cells: opt.cells,
        entry_point: opt.entry.clone(),
        trace: opt.trace,
    };

    match opt.backend.as_str() {
        "interpret" => drive(Compiler::new(Interpreter::new(), options), opt),
        _ => {
            let native = NativeBackend::new(native_options(opt));
            drive(Compiler::new(native, options), opt)
        }
    }
}

fn native_options(opt: &Opt) -> NativeOptions {
    NativeOptions {
        opt_level: match opt.opt_level {
            0 => OptLevel::None,
            1 => OptLevel::Speed,
            _ => OptLevel::SpeedAndSize,
        },
        debug_info: opt.debug_info,
        linker: opt.linker.clone(),
    }
}

fn parse_cells(text: &str) -> Result<usize, String> {
    let cells: usize = text.parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
    if cells == 0 || cells > MAX_CELLS {
        return Err(format!("must be between 1 and {}", MAX_CELLS));
    }
    Ok(cells)
}

fn drive<B: Backend>(compiler: Compiler<B>, opt: &Opt) -> Result<(), CompilationError> {
    let artifact = compiler.compile_file(&opt.input)?;
    if opt.dump_ir {
        eprint!("{}", artifact.context());
    }

    match &opt.output {
        Some(path) => compiler.emit_to_file(&artifact, path)?,
        None => compiler.emit_in_process(&artifact)?.run()?,
    }

    Ok(())
}
