//! Defines and implements an interpreter for a [Context]. The more appropriate term for what it
//! runs is probably [threaded code], (not to be confused with multi-threaded code!): every
//! function's basic blocks are flattened into one vector of operations, and branches are
//! resolved to offsets into that vector.
//!
//! Since this is platform-independent code, it will run on any platform, unlike the native
//! backend!
//!
//! [threaded code]: https://en.wikipedia.org/wiki/Threaded_code

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;

use log::{debug, trace};

use crate::context::{
    BinaryOp, Comparison, Context, Expr, ExprKind, FunctionData, FunctionKind, LValue, RValue,
    Statement, Terminator,
};
use crate::error::{BackendError, EmitError, RuntimeError};
use crate::location::Location;
use crate::program::{Backend, Executable};
use crate::types::Type;

/// A [Backend] that interprets the session instead of generating machine code.
#[derive(Debug, Clone)]
pub struct Interpreter {
    max_call_depth: usize,
}

/// An [Executable] that is dynamically interpreted.
pub struct InterpretedProgram {
    image: Image,
    globals: Vec<Vec<Value>>,
    by_name: HashMap<String, usize>,
    max_call_depth: usize,
}

/// A value at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Byte(u8),
    Pointer(usize),
}

/// A concrete offset from the beginning of a function to a specific operation.
#[derive(Debug, Clone, Copy)]
struct BranchTarget(usize);

#[derive(Debug, Clone)]
enum Op {
    Assign(LValue, RValue),
    AssignOp(LValue, BinaryOp, RValue),
    Eval(RValue),
    BranchIf {
        condition: RValue,
        on_true: BranchTarget,
        on_false: BranchTarget,
    },
    BranchTo(BranchTarget),
    Switch {
        value: RValue,
        default: BranchTarget,
        cases: Vec<(i32, i32, BranchTarget)>,
    },
    Return(Option<RValue>),
}

struct Image {
    exprs: Vec<Expr>,
    functions: Vec<Routine>,
}

enum Routine {
    Defined(Defined),
    Builtin { builtin: Builtin, returns: Type },
}

struct Defined {
    params: Vec<Type>,
    locals: Vec<Type>,
    code: Vec<Op>,
    locations: Vec<Option<Location>>,
}

#[derive(Debug, Clone, Copy)]
enum Builtin {
    PutChar,
    GetChar,
}

// Implementation

impl Interpreter {
    pub fn new() -> Self {
        Interpreter {
            max_call_depth: 512,
        }
    }

    /// Limits how deeply interpreted functions may call each other.
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Interpreter::new()
    }
}

impl Backend for Interpreter {
    type Program = InterpretedProgram;

    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn compile(&self, context: &Context) -> Result<InterpretedProgram, BackendError> {
        context.validate()?;

        let mut functions = Vec::with_capacity(context.functions.len());
        let mut by_name = HashMap::new();
        for (index, function) in context.functions.iter().enumerate() {
            by_name.insert(function.name.clone(), index);
            functions.push(match function.kind {
                FunctionKind::Imported => Routine::Builtin {
                    builtin: resolve_builtin(function)?,
                    returns: function.return_type.clone(),
                },
                FunctionKind::Exported | FunctionKind::Internal => {
                    let defined = flatten(function);
                    debug!(
                        "flattened `{}` into {} operation(s)",
                        function.name,
                        defined.code.len()
                    );
                    Routine::Defined(defined)
                }
            });
        }

        let mut globals = Vec::with_capacity(context.globals.len());
        for global in &context.globals {
            globals.push(match &global.ty {
                Type::Array { element, len } => {
                    let zero = zero_value(element).ok_or_else(|| {
                        BackendError::invalid(
                            format!("cannot interpret storage of type {}", global.ty),
                            None,
                        )
                    })?;
                    let mut cells = Vec::new();
                    cells.try_reserve_exact(*len).map_err(|e| {
                        let message = format!("cannot allocate `{}`: {}", global.name, e);
                        BackendError::invalid(message, None)
                    })?;
                    cells.resize(*len, zero);
                    cells
                }
                scalar => vec![zero_value(scalar).ok_or_else(|| {
                    BackendError::invalid(
                        format!("cannot interpret storage of type {}", scalar),
                        None,
                    )
                })?],
            });
        }

        Ok(InterpretedProgram {
            image: Image {
                exprs: context.exprs.clone(),
                functions,
            },
            globals,
            by_name,
            max_call_depth: self.max_call_depth,
        })
    }

    fn compile_to_file(&self, _context: &Context, _path: &Path) -> Result<(), EmitError> {
        Err(EmitError::Unsupported(self.name()))
    }
}

impl InterpretedProgram {
    /// Calls `name` with the given input and output standing in for `stdin` and `stdout`.
    pub fn invoke_with_io(
        &mut self,
        name: &str,
        args: &[i32],
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<Option<i32>, RuntimeError> {
        let index = *self
            .by_name
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownFunction(name.to_owned()))?;
        let params = match &self.image.functions[index] {
            Routine::Defined(defined) => &defined.params,
            Routine::Builtin { .. } => return Err(RuntimeError::UnknownFunction(name.to_owned())),
        };
        if params.len() != args.len() {
            return Err(RuntimeError::ArityMismatch {
                name: name.to_owned(),
                expected: params.len(),
                given: args.len(),
            });
        }
        let args = params
            .iter()
            .zip(args)
            .map(|(ty, &arg)| match ty {
                Type::Byte => Value::Byte(arg as u8),
                Type::Pointer(_) => Value::Pointer(arg as usize),
                _ => Value::Int(arg),
            })
            .collect();

        let mut machine = Machine {
            image: &self.image,
            globals: &mut self.globals,
            input,
            output,
            depth: 0,
            max_depth: self.max_call_depth,
        };
        let result = machine.call(index, args)?;
        machine.output.flush()?;

        Ok(result.map(|v| v.as_i64() as i32))
    }
}

impl Executable for InterpretedProgram {
    fn invoke(&mut self, name: &str, args: &[i32]) -> Result<Option<i32>, RuntimeError> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        self.invoke_with_io(name, args, &mut stdin.lock(), &mut stdout.lock())
    }
}

impl Value {
    /// The value widened to 64 bits. Bytes are unsigned.
    pub fn as_i64(self) -> i64 {
        match self {
            Value::Int(v) => v as i64,
            Value::Byte(v) => v as i64,
            Value::Pointer(v) => v as i64,
        }
    }

    fn is_true(self) -> bool {
        self.as_i64() != 0
    }

    /// A value of the same type as `self`, truncated from `raw`.
    fn with_bits(self, raw: i64) -> Value {
        match self {
            Value::Int(_) => Value::Int(raw as i32),
            Value::Byte(_) => Value::Byte(raw as u8),
            Value::Pointer(_) => Value::Pointer(raw as usize),
        }
    }
}

// Internal stuff:

/// Where an lvalue lives at runtime.
#[derive(Clone, Copy)]
enum Place {
    Local(usize),
    Cell { global: usize, index: usize },
}

struct Frame {
    params: Vec<Value>,
    locals: Vec<Value>,
}

struct Machine<'p, 'io> {
    image: &'p Image,
    globals: &'p mut Vec<Vec<Value>>,
    input: &'io mut dyn Read,
    output: &'io mut dyn Write,
    depth: usize,
    max_depth: usize,
}

impl<'p, 'io> Machine<'p, 'io> {
    fn call(&mut self, function: usize, args: Vec<Value>) -> Result<Option<Value>, RuntimeError> {
        let image = self.image;
        match &image.functions[function] {
            Routine::Builtin { builtin, returns } => self.builtin(*builtin, returns, &args),
            Routine::Defined(defined) => {
                if self.depth >= self.max_depth {
                    return Err(RuntimeError::StackOverflow(self.max_depth));
                }
                let mut frame = Frame {
                    params: args,
                    locals: defined
                        .locals
                        .iter()
                        .map(|ty| zero_value(ty).unwrap_or(Value::Int(0)))
                        .collect(),
                };

                self.depth += 1;
                let result = self.run(defined, &mut frame);
                self.depth -= 1;

                result
            }
        }
    }

    fn run(
        &mut self,
        function: &'p Defined,
        frame: &mut Frame,
    ) -> Result<Option<Value>, RuntimeError> {
        let mut program_counter = 0;

        loop {
            let location = function.locations[program_counter].as_ref();
            program_counter = match &function.code[program_counter] {
                Op::Assign(lvalue, rvalue) => {
                    let place = self.place(frame, *lvalue, location)?;
                    let value = self.eval(frame, *rvalue)?;
                    self.write(frame, place, value);

                    program_counter + 1
                }
                Op::AssignOp(lvalue, op, rvalue) => {
                    let place = self.place(frame, *lvalue, location)?;
                    let current = self.read(frame, place);
                    let operand = self.eval(frame, *rvalue)?;
                    let value = arithmetic(*op, current, operand, location)?;
                    self.write(frame, place, value);

                    program_counter + 1
                }
                Op::Eval(rvalue) => {
                    self.eval(frame, *rvalue)?;

                    program_counter + 1
                }
                Op::BranchIf {
                    condition,
                    on_true,
                    on_false,
                } => {
                    if self.eval(frame, *condition)?.is_true() {
                        on_true.0
                    } else {
                        on_false.0
                    }
                }
                Op::BranchTo(target) => target.0,
                Op::Switch {
                    value,
                    default,
                    cases,
                } => {
                    let value = self.eval(frame, *value)?.as_i64();
                    cases
                        .iter()
                        .find(|(low, high, _)| (*low as i64..=*high as i64).contains(&value))
                        .map(|(_, _, target)| target.0)
                        .unwrap_or(default.0)
                }
                Op::Return(value) => {
                    return match value {
                        Some(value) => Ok(Some(self.eval(frame, *value)?)),
                        None => Ok(None),
                    };
                }
            }
        }
    }

    fn eval(&mut self, frame: &mut Frame, value: RValue) -> Result<Value, RuntimeError> {
        let image = self.image;
        let expr = &image.exprs[value.0 as usize];

        Ok(match &expr.kind {
            ExprKind::Constant(c) => zero_value(&expr.ty)
                .unwrap_or(Value::Int(0))
                .with_bits(*c),
            ExprKind::Param { index, .. } => frame.params[*index as usize],
            ExprKind::Load(lvalue) => {
                let place = self.place(frame, *lvalue, expr.location.as_ref())?;
                self.read(frame, place)
            }
            ExprKind::Binary(op, a, b) => {
                let a = self.eval(frame, *a)?;
                let b = self.eval(frame, *b)?;
                arithmetic(*op, a, b, expr.location.as_ref())?
            }
            ExprKind::Comparison(cmp, a, b) => {
                let a = self.eval(frame, *a)?.as_i64();
                let b = self.eval(frame, *b)?.as_i64();
                let holds = match cmp {
                    Comparison::Eq => a == b,
                    Comparison::Ne => a != b,
                    Comparison::Lt => a < b,
                    Comparison::Le => a <= b,
                    Comparison::Gt => a > b,
                    Comparison::Ge => a >= b,
                };
                Value::Int(holds as i32)
            }
            ExprKind::Cast(inner) => {
                let raw = self.eval(frame, *inner)?.as_i64();
                match expr.ty {
                    Type::Byte => Value::Byte(raw as u8),
                    _ => Value::Int(raw as i32),
                }
            }
            ExprKind::Call(function, args) => {
                let mut values = Vec::with_capacity(args.len());
                for &arg in args {
                    values.push(self.eval(frame, arg)?);
                }
                // void results are never used as values; the context rejects that.
                self.call(function.0 as usize, values)?
                    .unwrap_or(Value::Int(0))
            }
        })
    }

    fn place(
        &mut self,
        frame: &mut Frame,
        lvalue: LValue,
        location: Option<&Location>,
    ) -> Result<Place, RuntimeError> {
        match lvalue {
            LValue::Local(local) => Ok(Place::Local(local.index as usize)),
            LValue::Global(global) => Ok(Place::Cell {
                global: global.0 as usize,
                index: 0,
            }),
            LValue::Element { array, index } => {
                let index = self.eval(frame, index)?.as_i64();
                let len = self.globals[array.0 as usize].len();
                if index < 0 || index as usize >= len {
                    return Err(RuntimeError::OutOfBounds {
                        index,
                        len,
                        location: location.cloned(),
                    });
                }
                Ok(Place::Cell {
                    global: array.0 as usize,
                    index: index as usize,
                })
            }
        }
    }

    fn read(&self, frame: &Frame, place: Place) -> Value {
        match place {
            Place::Local(index) => frame.locals[index],
            Place::Cell { global, index } => self.globals[global][index],
        }
    }

    fn write(&mut self, frame: &mut Frame, place: Place, value: Value) {
        match place {
            Place::Local(index) => frame.locals[index] = value,
            Place::Cell { global, index } => self.globals[global][index] = value,
        }
    }

    fn builtin(
        &mut self,
        builtin: Builtin,
        returns: &Type,
        args: &[Value],
    ) -> Result<Option<Value>, RuntimeError> {
        let result = match builtin {
            Builtin::PutChar => {
                let c = args.first().copied().unwrap_or(Value::Int(0));
                self.output.write_all(&[c.as_i64() as u8])?;
                c.as_i64() as i32
            }
            Builtin::GetChar => {
                let mut one_byte = [0u8];
                match self.input.read(&mut one_byte)? {
                    0 => -1,
                    _ => one_byte[0] as i32,
                }
            }
        };
        trace!("{:?} -> {}", builtin, result);

        Ok(match returns {
            Type::Void => None,
            _ => Some(Value::Int(result)),
        })
    }
}

fn arithmetic(
    op: BinaryOp,
    a: Value,
    b: Value,
    location: Option<&Location>,
) -> Result<Value, RuntimeError> {
    let (x, y) = (a.as_i64(), b.as_i64());
    let raw = match op {
        BinaryOp::Plus => x.wrapping_add(y),
        BinaryOp::Minus => x.wrapping_sub(y),
        BinaryOp::Mult => x.wrapping_mul(y),
        BinaryOp::Divide | BinaryOp::Modulo if y == 0 => {
            return Err(RuntimeError::DivisionByZero {
                location: location.cloned(),
            });
        }
        BinaryOp::Divide => x.wrapping_div(y),
        BinaryOp::Modulo => x.wrapping_rem(y),
    };

    Ok(a.with_bits(raw))
}

fn zero_value(ty: &Type) -> Option<Value> {
    match ty {
        Type::Int => Some(Value::Int(0)),
        Type::Byte => Some(Value::Byte(0)),
        Type::Pointer(_) => Some(Value::Pointer(0)),
        Type::Void | Type::Array { .. } => None,
    }
}

fn resolve_builtin(function: &FunctionData) -> Result<Builtin, BackendError> {
    match (function.name.as_str(), function.params.len()) {
        ("putchar", 1) => Ok(Builtin::PutChar),
        ("getchar", 0) => Ok(Builtin::GetChar),
        _ => Err(BackendError::UnresolvedSymbol(function.name.clone())),
    }
}

/// Convert a function's basic blocks to threaded code.
fn flatten(function: &FunctionData) -> Defined {
    let mut block_starts = Vec::with_capacity(function.blocks.len());
    let mut incomplete_instructions = Vec::new();
    let mut code = Vec::new();
    let mut locations = Vec::new();

    // First pass. Generate code; branches hold block indices instead of offsets.
    for block in function.blocks.iter() {
        block_starts.push(code.len());

        for (statement, location) in block.statements.iter() {
            code.push(match statement {
                Statement::Assign(lvalue, rvalue) => Op::Assign(*lvalue, *rvalue),
                Statement::AssignOp(lvalue, op, rvalue) => Op::AssignOp(*lvalue, *op, *rvalue),
                Statement::Eval(rvalue) => Op::Eval(*rvalue),
                Statement::Comment(_) => {
                    continue;
                }
            });
            locations.push(location.clone());
        }

        // validate() guarantees every block is terminated.
        if let Some((terminator, location)) = &block.terminator {
            let pc = code.len();
            code.push(match terminator {
                Terminator::Jump(target) => {
                    incomplete_instructions.push(pc);
                    Op::BranchTo(BranchTarget(target.index as usize))
                }
                Terminator::Conditional {
                    condition,
                    on_true,
                    on_false,
                } => {
                    incomplete_instructions.push(pc);
                    Op::BranchIf {
                        condition: *condition,
                        on_true: BranchTarget(on_true.index as usize),
                        on_false: BranchTarget(on_false.index as usize),
                    }
                }
                Terminator::Switch {
                    value,
                    default,
                    cases,
                } => {
                    incomplete_instructions.push(pc);
                    Op::Switch {
                        value: *value,
                        default: BranchTarget(default.index as usize),
                        cases: cases
                            .iter()
                            .map(|c| (c.low, c.high, BranchTarget(c.dest.index as usize)))
                            .collect(),
                    }
                }
                Terminator::Return(value) => Op::Return(*value),
            });
            locations.push(location.clone());
        }
    }

    // Second pass: patch in branch targets
    let resolve = |target: &mut BranchTarget| target.0 = block_starts[target.0];
    for pc in incomplete_instructions {
        match &mut code[pc] {
            Op::BranchTo(target) => resolve(target),
            Op::BranchIf {
                on_true, on_false, ..
            } => {
                resolve(on_true);
                resolve(on_false);
            }
            Op::Switch { default, cases, .. } => {
                resolve(default);
                for (_, _, target) in cases.iter_mut() {
                    resolve(target);
                }
            }
            _ => unreachable!("only branches are patched"),
        }
    }

    Defined {
        params: function.params.iter().map(|p| p.ty.clone()).collect(),
        locals: function.locals.iter().map(|l| l.ty.clone()).collect(),
        code,
        locations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Case, FunctionKind, GlobalKind};
    use crate::samples;

    use test_log::test;

    fn run_main(ctxt: &Context, input: &[u8]) -> Result<Vec<u8>, RuntimeError> {
        let mut program = Interpreter::new().compile(ctxt).unwrap();
        let mut output = Vec::new();
        program.invoke_with_io("main", &[], &mut &input[..], &mut output)?;
        Ok(output)
    }

    #[test]
    fn square() {
        let mut ctxt = Context::new();
        samples::populate_square(&mut ctxt).unwrap();
        let mut program = Interpreter::new().compile(&ctxt).unwrap();

        for _ in 0..5 {
            assert_eq!(program.invoke("square", &[5]).unwrap(), Some(25));
        }
        assert_eq!(program.invoke("square", &[-7]).unwrap(), Some(49));
    }

    #[test]
    fn sum_of_squares() {
        let mut ctxt = Context::new();
        samples::populate_sum_of_squares(&mut ctxt).unwrap();
        let mut program = Interpreter::new().compile(&ctxt).unwrap();

        assert_eq!(program.invoke("loop_test", &[10]).unwrap(), Some(285));
        assert_eq!(program.invoke("loop_test", &[0]).unwrap(), Some(0));
    }

    #[test]
    fn switch() {
        let mut ctxt = Context::new();
        samples::populate_switch(&mut ctxt).unwrap();
        let mut program = Interpreter::new().compile(&ctxt).unwrap();

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
    fn prints_and_reads_bytes() {
        let mut ctxt = Context::new();
        let getchar = ctxt
            .new_function(FunctionKind::Imported, Type::Int, "getchar", &[])
            .unwrap();
        let putchar = ctxt
            .new_function(FunctionKind::Imported, Type::Int, "putchar", &[(Type::Int, "c")])
            .unwrap();
        let main = ctxt
            .new_function(FunctionKind::Exported, Type::Int, "main", &[])
            .unwrap();
        let entry = ctxt.new_block(main, None).unwrap();
        let c = ctxt.new_call(getchar, &[], None).unwrap();
        let one = ctxt.one(Type::Int).unwrap();
        let next = ctxt.new_binary_op(BinaryOp::Plus, Type::Int, c, one, None).unwrap();
        let echo = ctxt.new_call(putchar, &[next], None).unwrap();
        ctxt.add_eval(entry, echo, None).unwrap();
        let zero = ctxt.zero(Type::Int).unwrap();
        ctxt.end_with_return(entry, Some(zero), None).unwrap();

        assert_eq!(run_main(&ctxt, b"a").unwrap(), b"b");
        // EOF is -1, so the echo is 0
        assert_eq!(run_main(&ctxt, b"").unwrap(), b"\0");
    }

    #[test]
    fn reports_out_of_bounds_access() {
        let mut ctxt = Context::new();
        let cells = ctxt
            .new_global(GlobalKind::Internal, Type::array(Type::Byte, 4), "cells")
            .unwrap();
        let main = ctxt
            .new_function(FunctionKind::Exported, Type::Void, "main", &[])
            .unwrap();
        let entry = ctxt.new_block(main, None).unwrap();
        let four = ctxt.new_constant(Type::Int, 4).unwrap();
        let cell = ctxt.array_access(cells, four).unwrap();
        let one = ctxt.one(Type::Byte).unwrap();
        let location = Location::new("oob.bf".into(), 3, 7);
        ctxt.add_assignment_op(entry, cell, BinaryOp::Plus, one, Some(location))
            .unwrap();
        ctxt.end_with_void_return(entry, None).unwrap();

        let err = run_main(&ctxt, b"").unwrap_err();
        assert!(matches!(err, RuntimeError::OutOfBounds { index: 4, len: 4, .. }));
        assert!(err.to_string().starts_with("oob.bf:3:7:"), "{}", err);
    }

    #[test]
    fn reports_division_by_zero() {
        let mut ctxt = Context::new();
        let f = ctxt
            .new_function(
                FunctionKind::Exported,
                Type::Int,
                "div",
                &[(Type::Int, "a"), (Type::Int, "b")],
            )
            .unwrap();
        let entry = ctxt.new_block(f, None).unwrap();
        let a = ctxt.param(f, 0).unwrap();
        let b = ctxt.param(f, 1).unwrap();
        let q = ctxt.new_binary_op(BinaryOp::Divide, Type::Int, a, b, None).unwrap();
        ctxt.end_with_return(entry, Some(q), None).unwrap();

        let mut program = Interpreter::new().compile(&ctxt).unwrap();
        assert_eq!(program.invoke("div", &[7, 2]).unwrap(), Some(3));
        assert!(matches!(
            program.invoke("div", &[7, 0]),
            Err(RuntimeError::DivisionByZero { .. })
        ));
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

        let mut program = Interpreter::new().compile(&ctxt).unwrap();
        assert_eq!(program.invoke("dec", &[]).unwrap(), Some(255));
        assert_eq!(program.invoke("dec", &[]).unwrap(), Some(254));
    }

    #[test]
    fn unbounded_recursion_is_an_error() {
        let mut ctxt = Context::new();
        let f = ctxt
            .new_function(FunctionKind::Exported, Type::Void, "forever", &[])
            .unwrap();
        let entry = ctxt.new_block(f, None).unwrap();
        let call = ctxt.new_call(f, &[], None).unwrap();
        ctxt.add_eval(entry, call, None).unwrap();
        ctxt.end_with_void_return(entry, None).unwrap();

        let mut program = Interpreter::new()
            .with_max_call_depth(16)
            .compile(&ctxt)
            .unwrap();
        assert!(matches!(
            program.invoke("forever", &[]),
            Err(RuntimeError::StackOverflow(16))
        ));
    }

    #[test]
    fn unknown_imports_do_not_compile() {
        let mut ctxt = Context::new();
        ctxt.new_function(FunctionKind::Imported, Type::Int, "abort", &[])
            .unwrap();
        assert!(matches!(
            Interpreter::new().compile(&ctxt),
            Err(BackendError::UnresolvedSymbol(name)) if name == "abort"
        ));
    }

    #[test]
    fn switch_ranges_are_inclusive() {
        let mut ctxt = Context::new();
        let f = ctxt
            .new_function(FunctionKind::Exported, Type::Int, "pick", &[(Type::Int, "x")])
            .unwrap();
        let entry = ctxt.new_block(f, None).unwrap();
        let hit = ctxt.new_block(f, None).unwrap();
        let miss = ctxt.new_block(f, None).unwrap();
        let x = ctxt.param(f, 0).unwrap();
        ctxt.end_with_switch(entry, x, miss, &[Case::new(2, 3, hit)], None)
            .unwrap();
        let one = ctxt.one(Type::Int).unwrap();
        let zero = ctxt.zero(Type::Int).unwrap();
        ctxt.end_with_return(hit, Some(one), None).unwrap();
        ctxt.end_with_return(miss, Some(zero), None).unwrap();

        let mut program = Interpreter::new().compile(&ctxt).unwrap();
        let picks: Vec<_> = (1..5)
            .map(|x| program.invoke("pick", &[x]).unwrap())
            .collect();
        assert_eq!(picks, [Some(0), Some(1), Some(1), Some(0)]);
    }

    #[test]
    fn huge_globals_are_an_error() {
        let mut ctxt = Context::new();
        ctxt.new_global(GlobalKind::Internal, Type::array(Type::Byte, usize::MAX), "cells")
            .unwrap();
        assert!(matches!(
            Interpreter::new().compile(&ctxt),
            Err(BackendError::Invalid { .. })
        ));
    }

    #[test]
    fn compile_to_file_is_unsupported() {
        let ctxt = Context::new();
        assert!(matches!(
            Interpreter::new().compile_to_file(&ctxt, Path::new("a.out")),
            Err(EmitError::Unsupported(_))
        ));
    }
}
