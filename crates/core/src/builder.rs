//! Translates bf, one byte at a time, into basic blocks of a backend [Context].
//!
//! The generated function looks like this:
//!
//! ```c
//! static unsigned char data_cells[30000];
//!
//! void func (void)
//! {
//!   int idx;
//!
//! initial:
//!   idx = 0;
//!   ...
//! }
//! ```
//!
//! Every `[` ends the current block and opens three new ones: a `test` block that checks the
//! current cell, the loop body, and the block after the loop. The matching `]` jumps back to the
//! test and continues in the block after the loop.

use brainjit_backend::{
    BinaryOp, Block, Comparison, Context, Function, FunctionKind, Global, GlobalKind, LValue,
    Location, RValue, Type,
};
use log::trace;

use crate::driver::CompilerOptions;
use crate::errors::{CompilationError, Reason};

/// The three blocks of a loop that has been opened but not yet closed.
#[derive(Debug, Clone)]
struct LoopFrame {
    test: Block,
    body: Block,
    after: Block,
    opened_at: Location,
}

/// Accumulates one bf program into a function of a [Context].
pub struct ControlFlowBuilder<'c> {
    ctxt: &'c mut Context,
    func: Function,
    current: Block,
    loops: Vec<LoopFrame>,
    loop_count: usize,
    idx: LValue,
    data_cells: Global,
    getchar: Function,
    putchar: Function,
    trace: bool,
}

impl<'c> ControlFlowBuilder<'c> {
    /// Declares everything the program needs and positions the builder at the start of the entry
    /// function.
    pub fn new(ctxt: &'c mut Context, options: &CompilerOptions) -> Result<Self, CompilationError> {
        let int_type = Type::Int;
        let byte_type = Type::Byte;
        let array_type = Type::array(byte_type, options.cells);

        let getchar = ctxt.new_function(FunctionKind::Imported, int_type.clone(), "getchar", &[])?;
        let putchar = ctxt.new_function(
            FunctionKind::Imported,
            Type::Void,
            "putchar",
            &[(int_type.clone(), "c")],
        )?;

        let func =
            ctxt.new_function(FunctionKind::Exported, Type::Void, &options.entry_point, &[])?;
        let initial = ctxt.new_block(func, Some("initial"))?;

        let data_cells = ctxt.new_global(GlobalKind::Internal, array_type, "data_cells")?;
        let idx = LValue::Local(ctxt.new_local(func, int_type.clone(), "idx")?);
        let zero = ctxt.zero(int_type)?;
        ctxt.add_assignment(initial, idx, zero, None)?;

        Ok(ControlFlowBuilder {
            ctxt,
            func,
            current: initial,
            loops: Vec::new(),
            loop_count: 0,
            idx,
            data_cells,
            getchar,
            putchar,
            trace: options.trace,
        })
    }

    /// How many loops are currently open.
    pub fn open_loops(&self) -> usize {
        self.loops.len()
    }

    /// Appends the code for one byte of source. Bytes that are not bf commands do nothing, unless
    /// tracing, which echoes every byte.
    pub fn compile_char(&mut self, byte: u8, location: Location) -> Result<(), CompilationError> {
        let loc = Some(location.clone());
        if self.trace {
            let echo = self.ctxt.new_constant(Type::Int, byte as i64)?;
            let call = self.ctxt.new_call(self.putchar, &[echo], loc.clone())?;
            self.ctxt.add_eval(self.current, call, loc.clone())?;
        }

        let description = match describe(byte) {
            Some(description) => description,
            None => return Ok(()),
        };
        trace!("{}: {}", location, description);
        self.ctxt.add_comment(self.current, description, loc.clone())?;

        match byte {
            b'>' => self.move_pointer(BinaryOp::Plus, loc)?,
            b'<' => self.move_pointer(BinaryOp::Minus, loc)?,
            b'+' => self.change_cell(BinaryOp::Plus, loc)?,
            b'-' => self.change_cell(BinaryOp::Minus, loc)?,
            b'.' => {
                let cell = self.current_cell()?;
                let value = self.ctxt.load(cell)?;
                let c = self.ctxt.new_cast(value, Type::Int, loc.clone())?;
                let call = self.ctxt.new_call(self.putchar, &[c], loc.clone())?;
                self.ctxt.add_eval(self.current, call, loc)?;
            }
            b',' => {
                let cell = self.current_cell()?;
                let call = self.ctxt.new_call(self.getchar, &[], loc.clone())?;
                let c = self.ctxt.new_cast(call, Type::Byte, loc.clone())?;
                self.ctxt.add_assignment(self.current, cell, c, loc)?;
            }
            b'[' => self.open_loop(location)?,
            b']' => self.close_loop(location)?,
            _ => unreachable!("only bf commands have a description"),
        }

        Ok(())
    }

    /// Ends the function. Fails if a loop was never closed.
    pub fn finish(self) -> Result<Function, CompilationError> {
        if let Some(frame) = self.loops.last() {
            return Err(CompilationError::syntax(
                Reason::UnmatchedOpen,
                frame.opened_at.clone(),
            ));
        }

        self.ctxt.end_with_void_return(self.current, None)?;
        Ok(self.func)
    }

    fn move_pointer(
        &mut self,
        op: BinaryOp,
        loc: Option<Location>,
    ) -> Result<(), CompilationError> {
        let one = self.ctxt.one(Type::Int)?;
        self.ctxt.add_assignment_op(self.current, self.idx, op, one, loc)?;
        Ok(())
    }

    fn change_cell(&mut self, op: BinaryOp, loc: Option<Location>) -> Result<(), CompilationError> {
        let cell = self.current_cell()?;
        let one = self.ctxt.one(Type::Byte)?;
        self.ctxt.add_assignment_op(self.current, cell, op, one, loc)?;
        Ok(())
    }

    /// `data_cells[idx]`
    fn current_cell(&mut self) -> Result<LValue, CompilationError> {
        let idx = self.ctxt.load(self.idx)?;
        Ok(self.ctxt.array_access(self.data_cells, idx)?)
    }

    fn cell_is_zero(&mut self, loc: Option<Location>) -> Result<RValue, CompilationError> {
        let cell = self.current_cell()?;
        let value = self.ctxt.load(cell)?;
        let zero = self.ctxt.zero(Type::Byte)?;
        Ok(self.ctxt.new_comparison(Comparison::Eq, value, zero, loc)?)
    }

    fn open_loop(&mut self, location: Location) -> Result<(), CompilationError> {
        let n = self.loop_count;
        self.loop_count += 1;

        let test = self.ctxt.new_block(self.func, Some(format!("test_{}", n).as_str()))?;
        let body = self.ctxt.new_block(self.func, Some(format!("on_non_zero_{}", n).as_str()))?;
        let after = self.ctxt.new_block(self.func, Some(format!("on_zero_{}", n).as_str()))?;

        let loc = Some(location.clone());
        self.ctxt.end_with_jump(self.current, test, loc.clone())?;
        let is_zero = self.cell_is_zero(loc.clone())?;
        self.ctxt.end_with_conditional(test, is_zero, after, body, loc)?;

        self.loops.push(LoopFrame {
            test,
            body,
            after,
            opened_at: location,
        });
        self.current = body;

        Ok(())
    }

    fn close_loop(&mut self, location: Location) -> Result<(), CompilationError> {
        let frame = match self.loops.pop() {
            Some(frame) => frame,
            None => return Err(CompilationError::syntax(Reason::UnmatchedClose, location)),
        };
        trace!("closing {:?}, continuing in {:?}", frame.body, frame.after);

        self.ctxt.end_with_jump(self.current, frame.test, Some(location))?;
        self.current = frame.after;

        Ok(())
    }
}

fn describe(byte: u8) -> Option<&'static str> {
    Some(match byte {
        b'>' => "'>': idx += 1;",
        b'<' => "'<': idx -= 1;",
        b'+' => "'+': data_cells[idx] += 1;",
        b'-' => "'-': data_cells[idx] -= 1;",
        b'.' => "'.': putchar ((int)data_cells[idx]);",
        b',' => "',': data_cells[idx] = (unsigned char)getchar ();",
        b'[' => "'[': loop while data_cells[idx] != 0",
        b']' => "']': end of loop",
        _ => return None,
    })
}
