//! A [Backend] that generates machine code for the host with Cranelift.
//!
//! In-process programs are JIT compiled. Executables are written as an object file and linked
//! with the system C compiler, which also provides `putchar` and `getchar`.

mod lower;

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{self, Command};
use std::sync::atomic::{AtomicUsize, Ordering};

use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_object::{ObjectBuilder, ObjectModule};
use log::{debug, info, trace};

use crate::context::{Context, FunctionKind};
use crate::error::{BackendError, EmitError, RuntimeError};
use crate::location::Location;
use crate::program::{Backend, Executable, GetChar, PutChar};
use crate::types::Type;

/// How hard Cranelift should try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptLevel {
    None,
    Speed,
    SpeedAndSize,
}

/// Defaults match the command line's: `-O 2`, no debug info, linked with `cc`.
#[derive(Debug, Clone)]
pub struct NativeOptions {
    pub opt_level: OptLevel,
    /// Attach source locations to the generated instructions.
    pub debug_info: bool,
    /// Program used to link executables.
    pub linker: String,
}

impl Default for NativeOptions {
    fn default() -> Self {
        NativeOptions {
            opt_level: OptLevel::SpeedAndSize,
            debug_info: false,
            linker: String::from("cc"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NativeBackend {
    options: NativeOptions,
    put_char: PutChar,
    get_char: GetChar,
}

/// JIT compiled code. The memory is freed when the program is dropped.
pub struct NativeProgram {
    module: Option<JITModule>,
    entries: HashMap<String, Entry>,
    locations: Vec<Location>,
}

struct Entry {
    code: *const u8,
    params: Vec<Type>,
    returns: Type,
}

impl NativeBackend {
    pub fn new(options: NativeOptions) -> Self {
        NativeBackend {
            options,
            put_char: stdout_putchar,
            get_char: stdin_getchar,
        }
    }

    /// Binds `putchar` and `getchar` of in-process programs to the given functions.
    pub fn with_io(mut self, put_char: PutChar, get_char: GetChar) -> Self {
        self.put_char = put_char;
        self.get_char = get_char;
        self
    }

    pub fn options(&self) -> &NativeOptions {
        &self.options
    }

    fn isa(&self, pic: bool) -> Result<OwnedTargetIsa, BackendError> {
        let opt_level = match self.options.opt_level {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        };

        let mut flag_builder = settings::builder();
        let flags: [(&str, &str); 3] = [
            ("opt_level", opt_level),
            ("is_pic", if pic { "true" } else { "false" }),
            ("use_colocated_libcalls", "false"),
        ];
        for (name, value) in flags {
            flag_builder
                .set(name, value)
                .map_err(|e| BackendError::Codegen(format!("{}={}: {}", name, value, e)))?;
        }

        cranelift_native::builder()
            .map_err(|e| BackendError::Codegen(e.to_string()))?
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| BackendError::Codegen(e.to_string()))
    }
}

impl Default for NativeBackend {
    fn default() -> Self {
        NativeBackend::new(NativeOptions::default())
    }
}

impl Backend for NativeBackend {
    type Program = NativeProgram;

    fn name(&self) -> &'static str {
        "native"
    }

    fn compile(&self, context: &Context) -> Result<NativeProgram, BackendError> {
        context.validate()?;

        let mut jit_builder =
            JITBuilder::with_isa(self.isa(false)?, cranelift_module::default_libcall_names());
        jit_builder.symbol("putchar", self.put_char as *const u8);
        jit_builder.symbol("getchar", self.get_char as *const u8);
        for function in &context.functions {
            if function.kind == FunctionKind::Imported
                && !matches!(function.name.as_str(), "putchar" | "getchar")
            {
                return Err(BackendError::UnresolvedSymbol(function.name.clone()));
            }
        }

        let mut module = JITModule::new(jit_builder);
        let declarations = lower::define_all(&mut module, context, self.options.debug_info)?;
        module
            .finalize_definitions()
            .map_err(lower::codegen_error)?;

        let mut entries = HashMap::new();
        for (function, id) in context.functions.iter().zip(&declarations.functions) {
            if function.kind == FunctionKind::Imported {
                continue;
            }
            let code = module.get_finalized_function(*id);
            trace!("`{}` is at {:p}", function.name, code);
            entries.insert(
                function.name.clone(),
                Entry {
                    code,
                    params: function.params.iter().map(|p| p.ty.clone()).collect(),
                    returns: function.return_type.clone(),
                },
            );
        }
        debug!("JIT compiled {} function(s)", entries.len());

        Ok(NativeProgram {
            module: Some(module),
            entries,
            locations: declarations.locations,
        })
    }

    fn compile_to_file(&self, context: &Context, path: &Path) -> Result<(), EmitError> {
        context.validate()?;
        if context.function_by_name("main").is_none() {
            return Err(BackendError::invalid("an executable needs a `main` function", None).into());
        }

        let builder = ObjectBuilder::new(
            self.isa(true)?,
            "brainjit",
            cranelift_module::default_libcall_names(),
        )
        .map_err(lower::codegen_error)?;
        let mut module = ObjectModule::new(builder);
        lower::define_all(&mut module, context, self.options.debug_info)?;
        let object = module
            .finish()
            .emit()
            .map_err(|e| BackendError::Codegen(e.to_string()))?;

        // Link in a scratch directory, so nothing next to `path` is touched until the
        // executable is complete.
        let scratch = ScratchDir::create()?;
        let object_path = scratch.path.join("program.o");
        let linked_path = scratch.path.join("program");
        fs::write(&object_path, object).map_err(|source| EmitError::Io {
            path: object_path.clone(),
            source,
        })?;
        debug!("wrote {}", object_path.display());

        let output = Command::new(&self.options.linker)
            .arg(&object_path)
            .arg("-o")
            .arg(&linked_path)
            .output()
            .map_err(|e| EmitError::Link {
                linker: self.options.linker.clone(),
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(EmitError::Link {
                linker: self.options.linker.clone(),
                stderr: one_line(&String::from_utf8_lossy(&output.stderr)),
            });
        }

        fs::copy(&linked_path, path).map_err(|source| EmitError::Io {
            path: path.to_owned(),
            source,
        })?;
        info!("linked {}", path.display());

        Ok(())
    }
}

impl NativeProgram {
    /// Frees the generated code now instead of when the program is dropped.
    pub fn release(mut self) {
        self.free();
    }

    /// Source locations of the generated code, when compiled with `debug_info`.
    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    fn free(&mut self) {
        if let Some(module) = self.module.take() {
            debug!("freeing JIT memory");
            // SAFETY: every pointer into the module lives in `entries`, which is dropped with
            // `self` and is never handed out.
            unsafe { module.free_memory() };
            self.entries.clear();
        }
    }
}

impl Drop for NativeProgram {
    fn drop(&mut self) {
        self.free();
    }
}

impl Executable for NativeProgram {
    fn invoke(&mut self, name: &str, args: &[i32]) -> Result<Option<i32>, RuntimeError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownFunction(name.to_owned()))?;
        if entry.params.len() != args.len() {
            return Err(RuntimeError::ArityMismatch {
                name: name.to_owned(),
                expected: entry.params.len(),
                given: args.len(),
            });
        }
        let supported = entry.params.iter().all(|ty| *ty == Type::Int)
            && matches!(entry.returns, Type::Int | Type::Void);
        if !supported {
            return Err(RuntimeError::UnsupportedSignature(name.to_owned()));
        }

        // SAFETY: the signature of the compiled function was checked above, and the code stays
        // mapped for as long as `self` exists.
        let result = unsafe {
            if entry.returns == Type::Void {
                call_void(entry.code, args).map(|()| None)
            } else {
                call_int(entry.code, args).map(Some)
            }
        };
        // SAFETY: flushing every open stream has no preconditions.
        unsafe { libc::fflush(std::ptr::null_mut()) };

        result.ok_or_else(|| RuntimeError::UnsupportedSignature(name.to_owned()))
    }
}

/// A uniquely named directory under the system's temporary directory, removed on drop.
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    fn create() -> Result<Self, EmitError> {
        static COUNT: AtomicUsize = AtomicUsize::new(0);

        let name = format!(
            "brainjit-{}-{}",
            process::id(),
            COUNT.fetch_add(1, Ordering::Relaxed)
        );
        let path = env::temp_dir().join(name);
        fs::create_dir_all(&path).map_err(|source| EmitError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(ScratchDir { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            debug!("could not remove {}: {}", self.path.display(), e);
        }
    }
}

/// Linker diagnostics can span many lines; errors are printed on one.
fn one_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

type Fn0 = extern "C" fn() -> i32;
type Fn1 = extern "C" fn(i32) -> i32;
type Fn2 = extern "C" fn(i32, i32) -> i32;
type Fn3 = extern "C" fn(i32, i32, i32) -> i32;

unsafe fn call_int(code: *const u8, args: &[i32]) -> Option<i32> {
    Some(match *args {
        [] => std::mem::transmute::<_, Fn0>(code)(),
        [a] => std::mem::transmute::<_, Fn1>(code)(a),
        [a, b] => std::mem::transmute::<_, Fn2>(code)(a, b),
        [a, b, c] => std::mem::transmute::<_, Fn3>(code)(a, b, c),
        _ => return None,
    })
}

unsafe fn call_void(code: *const u8, args: &[i32]) -> Option<()> {
    match *args {
        [] => std::mem::transmute::<_, extern "C" fn()>(code)(),
        [a] => std::mem::transmute::<_, extern "C" fn(i32)>(code)(a),
        [a, b] => std::mem::transmute::<_, extern "C" fn(i32, i32)>(code)(a, b),
        [a, b, c] => std::mem::transmute::<_, extern "C" fn(i32, i32, i32)>(code)(a, b, c),
        _ => return None,
    }
    Some(())
}

extern "C" fn stdout_putchar(c: i32) -> i32 {
    unsafe { libc::putchar(c) }
}

extern "C" fn stdin_getchar() -> i32 {
    unsafe { libc::getchar() }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::context::{BinaryOp, GlobalKind, LValue};
    use crate::samples;

    use test_log::test;

    thread_local! {
        static OUTPUT: RefCell<Vec<u8>> = RefCell::new(Vec::new());
        static INPUT: RefCell<Vec<u8>> = RefCell::new(Vec::new());
    }

    extern "C" fn capture_putchar(c: i32) -> i32 {
        OUTPUT.with(|out| out.borrow_mut().push(c as u8));
        c
    }

    extern "C" fn feed_getchar() -> i32 {
        INPUT.with(|input| {
            let mut input = input.borrow_mut();
            if input.is_empty() {
                -1
            } else {
                input.remove(0) as i32
            }
        })
    }

    fn backend() -> NativeBackend {
        NativeBackend::default().with_io(capture_putchar, feed_getchar)
    }

    fn run_captured(ctxt: &Context, name: &str, input: &[u8]) -> Vec<u8> {
        OUTPUT.with(|out| out.borrow_mut().clear());
        INPUT.with(|i| *i.borrow_mut() = input.to_vec());
        let mut program = backend().compile(ctxt).unwrap();
        program.invoke(name, &[]).unwrap();
        OUTPUT.with(|out| out.borrow().clone())
    }

    #[test]
    fn square() {
        let mut ctxt = Context::new();
        samples::populate_square(&mut ctxt).unwrap();
        let mut program = backend().compile(&ctxt).unwrap();

        assert_eq!(program.invoke("square", &[5]).unwrap(), Some(25));
        assert_eq!(program.invoke("square", &[-7]).unwrap(), Some(49));
    }

    #[test]
    fn sum_of_squares() {
        let mut ctxt = Context::new();
        samples::populate_sum_of_squares(&mut ctxt).unwrap();
        let mut program = backend().compile(&ctxt).unwrap();

        assert_eq!(program.invoke("loop_test", &[10]).unwrap(), Some(285));
        assert_eq!(program.invoke("loop_test", &[-3]).unwrap(), Some(0));
    }

    #[test]
    fn switch() {
        let mut ctxt = Context::new();
        samples::populate_switch(&mut ctxt).unwrap();
        let mut program = backend().compile(&ctxt).unwrap();

        for x in -200..200 {
            assert_eq!(
                program.invoke("test_switch", &[x]).unwrap(),
                Some(samples::simulate_switch(x)),
                "test_switch({})",
                x
            );
        }
    }

    #[test]
    fn unoptimized_code_agrees() {
        let mut ctxt = Context::new();
        samples::populate_sum_of_squares(&mut ctxt).unwrap();
        let options = NativeOptions {
            opt_level: OptLevel::None,
            debug_info: true,
            ..NativeOptions::default()
        };
        let mut program = NativeBackend::new(options).compile(&ctxt).unwrap();
        assert_eq!(program.invoke("loop_test", &[4]).unwrap(), Some(14));
        program.release();
    }

    /// Reads a byte into a cell, increments it, and writes it out twice.
    #[test]
    fn cells_and_io() {
        let mut ctxt = Context::new();
        let cells = ctxt
            .new_global(GlobalKind::Internal, Type::array(Type::Byte, 16), "cells")
            .unwrap();
        let getchar = ctxt
            .new_function(FunctionKind::Imported, Type::Int, "getchar", &[])
            .unwrap();
        let putchar = ctxt
            .new_function(FunctionKind::Imported, Type::Int, "putchar", &[(Type::Int, "c")])
            .unwrap();
        let func = ctxt
            .new_function(FunctionKind::Exported, Type::Void, "func", &[])
            .unwrap();
        let entry = ctxt.new_block(func, None).unwrap();

        let three = ctxt.new_constant(Type::Int, 3).unwrap();
        let cell = ctxt.array_access(cells, three).unwrap();
        let c = ctxt.new_call(getchar, &[], None).unwrap();
        let byte = ctxt.new_cast(c, Type::Byte, None).unwrap();
        ctxt.add_assignment(entry, cell, byte, None).unwrap();
        let one = ctxt.one(Type::Byte).unwrap();
        ctxt.add_assignment_op(entry, cell, BinaryOp::Plus, one, None).unwrap();
        let value = ctxt.load(cell).unwrap();
        let widened = ctxt.new_cast(value, Type::Int, None).unwrap();
        let echo = ctxt.new_call(putchar, &[widened], None).unwrap();
        ctxt.add_eval(entry, echo, None).unwrap();
        ctxt.add_eval(entry, echo, None).unwrap();
        ctxt.end_with_void_return(entry, None).unwrap();

        assert_eq!(run_captured(&ctxt, "func", b"a"), b"bb");
        // EOF truncates to 255, which wraps to 0.
        assert_eq!(run_captured(&ctxt, "func", b""), b"\0\0");
    }

    #[test]
    fn byte_arithmetic_wraps() {
        let mut ctxt = Context::new();
        let counter = ctxt
            .new_global(GlobalKind::Internal, Type::Byte, "counter")
            .unwrap();
        let f = ctxt
            .new_function(FunctionKind::Exported, Type::Int, "dec", &[])
            .unwrap();
        let entry = ctxt.new_block(f, None).unwrap();
        let one = ctxt.one(Type::Byte).unwrap();
        ctxt.add_assignment_op(entry, LValue::Global(counter), BinaryOp::Minus, one, None)
            .unwrap();
        let value = ctxt.load(LValue::Global(counter)).unwrap();
        let widened = ctxt.new_cast(value, Type::Int, None).unwrap();
        ctxt.end_with_return(entry, Some(widened), None).unwrap();

        let mut program = backend().compile(&ctxt).unwrap();
        assert_eq!(program.invoke("dec", &[]).unwrap(), Some(255));
        assert_eq!(program.invoke("dec", &[]).unwrap(), Some(254));
    }

    #[test]
    fn unknown_imports_do_not_compile() {
        let mut ctxt = Context::new();
        ctxt.new_function(FunctionKind::Imported, Type::Int, "abort", &[]).unwrap();
        assert!(matches!(
            backend().compile(&ctxt),
            Err(BackendError::UnresolvedSymbol(name)) if name == "abort"
        ));
    }

    #[test]
    fn invoke_checks_arity() {
        let mut ctxt = Context::new();
        samples::populate_square(&mut ctxt).unwrap();
        let mut program = backend().compile(&ctxt).unwrap();
        assert!(matches!(
            program.invoke("square", &[]),
            Err(RuntimeError::ArityMismatch { expected: 1, given: 0, .. })
        ));
        assert!(matches!(
            program.invoke("cube", &[2]),
            Err(RuntimeError::UnknownFunction(_))
        ));
    }

    /// A program whose `main` prints `!`.
    fn bang() -> Context {
        let mut ctxt = Context::new();
        let putchar = ctxt
            .new_function(FunctionKind::Imported, Type::Int, "putchar", &[(Type::Int, "c")])
            .unwrap();
        let func = ctxt
            .new_function(FunctionKind::Exported, Type::Void, "func", &[])
            .unwrap();
        let entry = ctxt.new_block(func, None).unwrap();
        let c = ctxt.new_constant(Type::Int, b'!' as i64).unwrap();
        let call = ctxt.new_call(putchar, &[c], None).unwrap();
        ctxt.add_eval(entry, call, None).unwrap();
        ctxt.end_with_void_return(entry, None).unwrap();
        ctxt.new_main(func).unwrap();
        ctxt
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("brainjit-test-{}-{}", name, process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn default_options_match_the_command_line() {
        let options = NativeOptions::default();
        assert_eq!(options.opt_level, OptLevel::SpeedAndSize);
        assert!(!options.debug_info);
        assert_eq!(options.linker, "cc");
    }

    #[test]
    fn linking_leaves_neighbouring_files_alone() {
        let dir = scratch("neighbours");
        let output = dir.join("prog");
        fs::write(dir.join("prog.o"), b"not mine").unwrap();

        backend().compile_to_file(&bang(), &output).unwrap();

        assert_eq!(fs::read(dir.join("prog.o")).unwrap(), b"not mine");
        let ran = Command::new(&output).output().unwrap();
        assert_eq!(ran.stdout, b"!");
    }

    #[test]
    fn output_may_end_in_dot_o() {
        let output = scratch("dot-o").join("prog.o");
        backend().compile_to_file(&bang(), &output).unwrap();
        let ran = Command::new(&output).output().unwrap();
        assert_eq!(ran.stdout, b"!");
    }

    #[test]
    fn missing_output_directory_is_an_io_error() {
        let output = scratch("missing").join("no").join("such").join("dir");
        match backend().compile_to_file(&bang(), &output) {
            Err(EmitError::Io { path, .. }) => assert_eq!(path, output),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn failing_linker_is_a_link_error() {
        let options = NativeOptions {
            linker: String::from("false"),
            ..NativeOptions::default()
        };
        let output = scratch("false").join("prog");
        let err = NativeBackend::new(options).compile_to_file(&bang(), &output).unwrap_err();
        assert!(matches!(err, EmitError::Link { ref linker, .. } if linker == "false"));
        assert!(!output.exists());
    }

    #[test]
    fn missing_linker_is_a_link_error() {
        let options = NativeOptions {
            linker: String::from("/nonexistent/brainjit-linker"),
            ..NativeOptions::default()
        };
        let output = scratch("nolinker").join("prog");
        let err = NativeBackend::new(options).compile_to_file(&bang(), &output).unwrap_err();
        assert!(matches!(err, EmitError::Link { .. }), "{:?}", err);
        assert!(!err.to_string().contains('\n'), "{}", err);
    }

    #[test]
    fn linker_output_fits_on_one_line() {
        assert_eq!(one_line("  a: error\n\n  b: note  \n"), "a: error | b: note");
    }

    #[test]
    fn huge_globals_are_an_error() {
        let mut ctxt = Context::new();
        ctxt.new_global(GlobalKind::Internal, Type::array(Type::Int, usize::MAX), "cells")
            .unwrap();
        assert!(matches!(backend().compile(&ctxt), Err(BackendError::Codegen(_))));

        let mut ctxt = Context::new();
        ctxt.new_global(GlobalKind::Internal, Type::array(Type::Byte, 1 << 32), "cells")
            .unwrap();
        assert!(matches!(backend().compile(&ctxt), Err(BackendError::Codegen(_))));
    }

    #[test]
    fn executables_need_main() {
        let mut ctxt = Context::new();
        samples::populate_square(&mut ctxt).unwrap();
        let path = std::env::temp_dir().join("brainjit-no-main");
        assert!(matches!(
            backend().compile_to_file(&ctxt, &path),
            Err(EmitError::Backend(BackendError::Invalid { .. }))
        ));
    }
}
