//! The compilation session: everything that will be compiled together.
//!
//! A [Context] is a plain value. It holds every global, function, basic block and expression
//! declared for one compilation, so several sessions can exist side by side. Everything that is
//! declared is type checked immediately; mistakes come back as [BackendError::Invalid].
//!
//! Functions are control flow graphs: a list of basic blocks, each with a list of statements and
//! exactly one [Terminator]. The first block created for a function is its entry block.

use std::collections::HashSet;

use crate::error::{BackendError, Result};
use crate::location::Location;
use crate::types::Type;

/// Handle to a global variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Global(pub(crate) u32);

/// Handle to a function, either defined in this session or imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Function(pub(crate) u32);

/// Handle to a basic block. Also serves as a branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    pub(crate) function: u32,
    pub(crate) index: u32,
}

/// Handle to a local variable of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Local {
    pub(crate) function: u32,
    pub(crate) index: u32,
}

/// Opaque handle to a value produced by an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RValue(pub(crate) u32);

/// Something that can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LValue {
    Local(Local),
    Global(Global),
    /// `array[index]`, where `array` is a global of array type.
    Element { array: Global, index: RValue },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalKind {
    /// Visible only inside the compiled code.
    Internal,
    /// Visible to the linker.
    Exported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Exported,
    Internal,
    /// Defined elsewhere, e.g. by the C library.
    Imported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    Mult,
    Divide,
    Modulo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// One arm of a switch: `case low ... high: goto dest;`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Case {
    pub low: i32,
    pub high: i32,
    pub dest: Block,
}

impl Case {
    pub fn new(low: i32, high: i32, dest: Block) -> Self {
        Case { low, high, dest }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GlobalData {
    pub(crate) kind: GlobalKind,
    pub(crate) ty: Type,
    pub(crate) name: String,
}

#[derive(Debug, Clone)]
pub(crate) struct Variable {
    pub(crate) ty: Type,
    pub(crate) name: String,
}

#[derive(Debug, Clone)]
pub(crate) struct FunctionData {
    pub(crate) kind: FunctionKind,
    pub(crate) return_type: Type,
    pub(crate) name: String,
    pub(crate) params: Vec<Variable>,
    pub(crate) locals: Vec<Variable>,
    pub(crate) blocks: Vec<BasicBlock>,
}

/// A basic block has only one way in and exactly one way out.
#[derive(Debug, Clone)]
pub(crate) struct BasicBlock {
    pub(crate) name: Option<String>,
    pub(crate) statements: Vec<(Statement, Option<Location>)>,
    pub(crate) terminator: Option<(Terminator, Option<Location>)>,
}

#[derive(Debug, Clone)]
pub(crate) enum Statement {
    Assign(LValue, RValue),
    AssignOp(LValue, BinaryOp, RValue),
    Eval(RValue),
    Comment(String),
}

#[derive(Debug, Clone)]
pub(crate) enum Terminator {
    Jump(Block),
    Conditional {
        condition: RValue,
        on_true: Block,
        on_false: Block,
    },
    Return(Option<RValue>),
    Switch {
        value: RValue,
        default: Block,
        cases: Vec<Case>,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Expr {
    pub(crate) kind: ExprKind,
    pub(crate) ty: Type,
    pub(crate) location: Option<Location>,
}

#[derive(Debug, Clone)]
pub(crate) enum ExprKind {
    Constant(i64),
    Param { function: u32, index: u32 },
    Load(LValue),
    Binary(BinaryOp, RValue, RValue),
    Comparison(Comparison, RValue, RValue),
    Cast(RValue),
    Call(Function, Vec<RValue>),
}

/// A compilation session.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub(crate) globals: Vec<GlobalData>,
    pub(crate) functions: Vec<FunctionData>,
    pub(crate) exprs: Vec<Expr>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    // Declarations

    /// Declares zero-initialized global storage.
    pub fn new_global(&mut self, kind: GlobalKind, ty: Type, name: &str) -> Result<Global> {
        let storable = match &ty {
            Type::Array { element, .. } => element.is_scalar(),
            other => other.is_scalar(),
        };
        if !storable {
            return Err(BackendError::invalid(
                format!("global `{}` cannot have type {}", name, ty),
                None,
            ));
        }
        self.globals.push(GlobalData {
            kind,
            ty,
            name: name.to_owned(),
        });
        Ok(Global(self.globals.len() as u32 - 1))
    }

    /// Declares a function. Imported functions have no blocks; they are resolved by the backend.
    pub fn new_function(
        &mut self,
        kind: FunctionKind,
        return_type: Type,
        name: &str,
        params: &[(Type, &str)],
    ) -> Result<Function> {
        if !(return_type.is_scalar() || return_type == Type::Void) {
            return Err(BackendError::invalid(
                format!("`{}` cannot return {}", name, return_type),
                None,
            ));
        }
        let mut declared = Vec::with_capacity(params.len());
        for (ty, param) in params {
            if !ty.is_scalar() {
                return Err(BackendError::invalid(
                    format!("parameter `{}` of `{}` cannot have type {}", param, name, ty),
                    None,
                ));
            }
            declared.push(Variable {
                ty: ty.clone(),
                name: (*param).to_owned(),
            });
        }

        self.functions.push(FunctionData {
            kind,
            return_type,
            name: name.to_owned(),
            params: declared,
            locals: Vec::new(),
            blocks: Vec::new(),
        });
        Ok(Function(self.functions.len() as u32 - 1))
    }

    /// Returns the value of the `index`-th parameter of `function`.
    pub fn param(&mut self, function: Function, index: usize) -> Result<RValue> {
        let data = self.function(function)?;
        let param = data.params.get(index).ok_or_else(|| {
            BackendError::invalid(
                format!("`{}` has no parameter {}", data.name, index),
                None,
            )
        })?;
        let ty = param.ty.clone();
        Ok(self.push_expr(
            ExprKind::Param {
                function: function.0,
                index: index as u32,
            },
            ty,
            None,
        ))
    }

    pub fn new_local(&mut self, function: Function, ty: Type, name: &str) -> Result<Local> {
        if !ty.is_scalar() {
            return Err(BackendError::invalid(
                format!("local `{}` cannot have type {}", name, ty),
                None,
            ));
        }
        let data = self.defined_function_mut(function)?;
        data.locals.push(Variable {
            ty,
            name: name.to_owned(),
        });
        Ok(Local {
            function: function.0,
            index: data.locals.len() as u32 - 1,
        })
    }

    /// Creates a new, empty basic block. The first block of a function is where it starts.
    pub fn new_block(&mut self, function: Function, name: Option<&str>) -> Result<Block> {
        let data = self.defined_function_mut(function)?;
        data.blocks.push(BasicBlock {
            name: name.map(str::to_owned),
            statements: Vec::new(),
            terminator: None,
        });
        Ok(Block {
            function: function.0,
            index: data.blocks.len() as u32 - 1,
        })
    }

    /// Wraps `entry` (a `void (void)` function) in `int main(int argc, char **argv)`.
    pub fn new_main(&mut self, entry: Function) -> Result<Function> {
        let data = self.function(entry)?;
        if !data.params.is_empty() || data.return_type != Type::Void {
            return Err(BackendError::invalid(
                format!("`{}` must take no arguments and return void", data.name),
                None,
            ));
        }

        let argv = Type::Byte.pointer().pointer();
        let main = self.new_function(
            FunctionKind::Exported,
            Type::Int,
            "main",
            &[(Type::Int, "argc"), (argv, "argv")],
        )?;
        let block = self.new_block(main, Some("entry"))?;
        let call = self.new_call(entry, &[], None)?;
        self.add_eval(block, call, None)?;
        let zero = self.zero(Type::Int)?;
        self.end_with_return(block, Some(zero), None)?;

        Ok(main)
    }

    // Values

    pub fn new_constant(&mut self, ty: Type, value: i64) -> Result<RValue> {
        if !ty.is_integral() {
            return Err(BackendError::invalid(
                format!("cannot make a constant of type {}", ty),
                None,
            ));
        }
        Ok(self.push_expr(ExprKind::Constant(value), ty, None))
    }

    pub fn zero(&mut self, ty: Type) -> Result<RValue> {
        self.new_constant(ty, 0)
    }

    pub fn one(&mut self, ty: Type) -> Result<RValue> {
        self.new_constant(ty, 1)
    }

    /// Reads an lvalue.
    pub fn load(&mut self, lvalue: LValue) -> Result<RValue> {
        let ty = self.lvalue_type(lvalue)?;
        if !ty.is_scalar() {
            return Err(BackendError::invalid(
                format!("cannot use a value of type {} directly", ty),
                None,
            ));
        }
        Ok(self.push_expr(ExprKind::Load(lvalue), ty, None))
    }

    /// `array[index]` as an lvalue.
    pub fn array_access(&mut self, array: Global, index: RValue) -> Result<LValue> {
        let data = self.global(array)?;
        if !matches!(data.ty, Type::Array { .. }) {
            return Err(BackendError::invalid(
                format!("`{}` is not an array", data.name),
                None,
            ));
        }
        let index_ty = &self.expr(index)?.ty;
        if *index_ty != Type::Int {
            return Err(BackendError::invalid(
                format!("array index must be int, not {}", index_ty),
                self.expr(index)?.location.as_ref(),
            ));
        }
        Ok(LValue::Element { array, index })
    }

    pub fn new_binary_op(
        &mut self,
        op: BinaryOp,
        ty: Type,
        a: RValue,
        b: RValue,
        location: Option<Location>,
    ) -> Result<RValue> {
        let (a_ty, b_ty) = (&self.expr(a)?.ty, &self.expr(b)?.ty);
        if !ty.is_integral() || *a_ty != ty || *b_ty != ty {
            return Err(BackendError::invalid(
                format!(
                    "binary {:?} of {} and {} cannot produce {}",
                    op, a_ty, b_ty, ty
                ),
                location.as_ref(),
            ));
        }
        Ok(self.push_expr(ExprKind::Binary(op, a, b), ty, location))
    }

    /// Compares two values of the same integer type; the result is an int that is 0 or 1.
    pub fn new_comparison(
        &mut self,
        comparison: Comparison,
        a: RValue,
        b: RValue,
        location: Option<Location>,
    ) -> Result<RValue> {
        let (a_ty, b_ty) = (&self.expr(a)?.ty, &self.expr(b)?.ty);
        if !a_ty.is_integral() || a_ty != b_ty {
            return Err(BackendError::invalid(
                format!("cannot compare {} with {}", a_ty, b_ty),
                location.as_ref(),
            ));
        }
        Ok(self.push_expr(
            ExprKind::Comparison(comparison, a, b),
            Type::Int,
            location,
        ))
    }

    pub fn new_cast(
        &mut self,
        value: RValue,
        ty: Type,
        location: Option<Location>,
    ) -> Result<RValue> {
        let from = &self.expr(value)?.ty;
        if !from.is_integral() || !ty.is_integral() {
            return Err(BackendError::invalid(
                format!("cannot cast {} to {}", from, ty),
                location.as_ref(),
            ));
        }
        Ok(self.push_expr(ExprKind::Cast(value), ty, location))
    }

    /// A call. Use [Context::add_eval] to make a call whose result is discarded.
    pub fn new_call(
        &mut self,
        function: Function,
        args: &[RValue],
        location: Option<Location>,
    ) -> Result<RValue> {
        let data = self.function(function)?;
        if data.params.len() != args.len() {
            return Err(BackendError::invalid(
                format!(
                    "`{}` takes {} argument(s), got {}",
                    data.name,
                    data.params.len(),
                    args.len()
                ),
                location.as_ref(),
            ));
        }
        for (param, &arg) in data.params.iter().zip(args) {
            let arg_ty = &self.expr(arg)?.ty;
            if *arg_ty != param.ty {
                return Err(BackendError::invalid(
                    format!(
                        "argument `{}` of `{}` must be {}, not {}",
                        param.name, data.name, param.ty, arg_ty
                    ),
                    location.as_ref(),
                ));
            }
        }
        let ty = data.return_type.clone();
        Ok(self.push_expr(ExprKind::Call(function, args.to_vec()), ty, location))
    }

    // Statements

    pub fn add_assignment(
        &mut self,
        block: Block,
        lvalue: LValue,
        rvalue: RValue,
        location: Option<Location>,
    ) -> Result<()> {
        let target = self.lvalue_type(lvalue)?;
        let value = &self.expr(rvalue)?.ty;
        if !target.is_scalar() || target != *value {
            return Err(BackendError::invalid(
                format!("cannot assign {} to {}", value, target),
                location.as_ref(),
            ));
        }
        self.push_statement(block, Statement::Assign(lvalue, rvalue), location)
    }

    /// `lvalue op= rvalue`, with wrapping arithmetic.
    pub fn add_assignment_op(
        &mut self,
        block: Block,
        lvalue: LValue,
        op: BinaryOp,
        rvalue: RValue,
        location: Option<Location>,
    ) -> Result<()> {
        let target = self.lvalue_type(lvalue)?;
        let value = &self.expr(rvalue)?.ty;
        if !target.is_integral() || target != *value {
            return Err(BackendError::invalid(
                format!("cannot apply {:?} to {} with {}", op, target, value),
                location.as_ref(),
            ));
        }
        self.push_statement(block, Statement::AssignOp(lvalue, op, rvalue), location)
    }

    /// Evaluates an expression for its side effects.
    pub fn add_eval(
        &mut self,
        block: Block,
        rvalue: RValue,
        location: Option<Location>,
    ) -> Result<()> {
        self.expr(rvalue)?;
        self.push_statement(block, Statement::Eval(rvalue), location)
    }

    pub fn add_comment(
        &mut self,
        block: Block,
        text: &str,
        location: Option<Location>,
    ) -> Result<()> {
        self.push_statement(block, Statement::Comment(text.to_owned()), location)
    }

    // Terminators

    pub fn end_with_jump(
        &mut self,
        block: Block,
        target: Block,
        location: Option<Location>,
    ) -> Result<()> {
        self.check_same_function(block, target, location.as_ref())?;
        self.terminate(block, Terminator::Jump(target), location)
    }

    pub fn end_with_conditional(
        &mut self,
        block: Block,
        condition: RValue,
        on_true: Block,
        on_false: Block,
        location: Option<Location>,
    ) -> Result<()> {
        self.check_same_function(block, on_true, location.as_ref())?;
        self.check_same_function(block, on_false, location.as_ref())?;
        let ty = &self.expr(condition)?.ty;
        if !ty.is_integral() {
            return Err(BackendError::invalid(
                format!("cannot branch on a value of type {}", ty),
                location.as_ref(),
            ));
        }
        self.terminate(
            block,
            Terminator::Conditional {
                condition,
                on_true,
                on_false,
            },
            location,
        )
    }

    pub fn end_with_return(
        &mut self,
        block: Block,
        value: Option<RValue>,
        location: Option<Location>,
    ) -> Result<()> {
        let expected = self.function(Function(block.function))?.return_type.clone();
        let actual = match value {
            Some(value) => self.expr(value)?.ty.clone(),
            None => Type::Void,
        };
        if expected != actual {
            return Err(BackendError::invalid(
                format!("returning {} from a function returning {}", actual, expected),
                location.as_ref(),
            ));
        }
        self.terminate(block, Terminator::Return(value), location)
    }

    pub fn end_with_void_return(&mut self, block: Block, location: Option<Location>) -> Result<()> {
        self.end_with_return(block, None, location)
    }

    /// Ends the block with a multi-way branch on an int value.
    pub fn end_with_switch(
        &mut self,
        block: Block,
        value: RValue,
        default: Block,
        cases: &[Case],
        location: Option<Location>,
    ) -> Result<()> {
        self.check_same_function(block, default, location.as_ref())?;
        let ty = &self.expr(value)?.ty;
        if *ty != Type::Int {
            return Err(BackendError::invalid(
                format!("cannot switch on a value of type {}", ty),
                location.as_ref(),
            ));
        }
        for case in cases {
            self.check_same_function(block, case.dest, location.as_ref())?;
            if case.low > case.high {
                return Err(BackendError::invalid(
                    format!("empty case range {} ... {}", case.low, case.high),
                    location.as_ref(),
                ));
            }
        }
        self.terminate(
            block,
            Terminator::Switch {
                value,
                default,
                cases: cases.to_vec(),
            },
            location,
        )
    }

    /// Checks that the session is complete enough to be compiled.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for global in &self.globals {
            if !names.insert(global.name.as_str()) {
                return Err(BackendError::invalid(
                    format!("`{}` is declared more than once", global.name),
                    None,
                ));
            }
        }

        for (index, function) in self.functions.iter().enumerate() {
            if !names.insert(function.name.as_str()) {
                return Err(BackendError::invalid(
                    format!("`{}` is declared more than once", function.name),
                    None,
                ));
            }
            if function.kind == FunctionKind::Imported {
                continue;
            }
            if function.blocks.is_empty() {
                return Err(BackendError::invalid(
                    format!("function `{}` has no blocks", function.name),
                    None,
                ));
            }
            for (label, block) in function.blocks.iter().enumerate() {
                let (terminator, _) = block.terminator.as_ref().ok_or_else(|| {
                    BackendError::invalid(
                        format!(
                            "block `{}` of `{}` is not terminated",
                            block_name(block, label),
                            function.name
                        ),
                        block.statements.last().and_then(|(_, l)| l.as_ref()),
                    )
                })?;
                for (statement, location) in &block.statements {
                    self.check_statement_owner(index as u32, statement, location.as_ref())?;
                }
                self.check_terminator_owner(index as u32, terminator)?;
            }
        }

        Ok(())
    }

    // Accessors

    pub fn function_name(&self, function: Function) -> Option<&str> {
        self.functions
            .get(function.0 as usize)
            .map(|f| f.name.as_str())
    }

    pub fn function_by_name(&self, name: &str) -> Option<Function> {
        self.functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| Function(i as u32))
    }

    /// The block a function starts executing from, if it has any.
    pub fn entry_block(&self, function: Function) -> Option<Block> {
        let data = self.functions.get(function.0 as usize)?;
        (!data.blocks.is_empty()).then(|| Block {
            function: function.0,
            index: 0,
        })
    }

    pub fn is_terminated(&self, block: Block) -> bool {
        self.block(block)
            .map(|b| b.terminator.is_some())
            .unwrap_or(false)
    }

    // Internal stuff:

    pub(crate) fn expr(&self, value: RValue) -> Result<&Expr> {
        self.exprs
            .get(value.0 as usize)
            .ok_or_else(|| BackendError::invalid(format!("unknown value {:?}", value), None))
    }

    pub(crate) fn global(&self, global: Global) -> Result<&GlobalData> {
        self.globals
            .get(global.0 as usize)
            .ok_or_else(|| BackendError::invalid(format!("unknown global {:?}", global), None))
    }

    pub(crate) fn function(&self, function: Function) -> Result<&FunctionData> {
        self.functions.get(function.0 as usize).ok_or_else(|| {
            BackendError::invalid(format!("unknown function {:?}", function), None)
        })
    }

    fn defined_function_mut(&mut self, function: Function) -> Result<&mut FunctionData> {
        let data = self.functions.get_mut(function.0 as usize).ok_or_else(|| {
            BackendError::invalid(format!("unknown function {:?}", function), None)
        })?;
        if data.kind == FunctionKind::Imported {
            return Err(BackendError::invalid(
                format!("imported function `{}` cannot have a body", data.name),
                None,
            ));
        }
        Ok(data)
    }

    fn block(&self, block: Block) -> Result<&BasicBlock> {
        self.function(Function(block.function))?
            .blocks
            .get(block.index as usize)
            .ok_or_else(|| BackendError::invalid(format!("unknown block {:?}", block), None))
    }

    fn block_mut(&mut self, block: Block) -> Result<&mut BasicBlock> {
        self.defined_function_mut(Function(block.function))?
            .blocks
            .get_mut(block.index as usize)
            .ok_or_else(|| BackendError::invalid(format!("unknown block {:?}", block), None))
    }

    pub(crate) fn lvalue_type(&self, lvalue: LValue) -> Result<Type> {
        match lvalue {
            LValue::Local(local) => {
                let function = self.function(Function(local.function))?;
                function
                    .locals
                    .get(local.index as usize)
                    .map(|l| l.ty.clone())
                    .ok_or_else(|| {
                        BackendError::invalid(format!("unknown local {:?}", local), None)
                    })
            }
            LValue::Global(global) => Ok(self.global(global)?.ty.clone()),
            LValue::Element { array, .. } => match &self.global(array)?.ty {
                Type::Array { element, .. } => Ok((**element).clone()),
                other => Err(BackendError::invalid(
                    format!("cannot index into {}", other),
                    None,
                )),
            },
        }
    }

    fn push_expr(&mut self, kind: ExprKind, ty: Type, location: Option<Location>) -> RValue {
        self.exprs.push(Expr { kind, ty, location });
        RValue(self.exprs.len() as u32 - 1)
    }

    fn push_statement(
        &mut self,
        block: Block,
        statement: Statement,
        location: Option<Location>,
    ) -> Result<()> {
        let data = self.block_mut(block)?;
        if data.terminator.is_some() {
            return Err(BackendError::invalid(
                "adding to a block that has already been terminated",
                location.as_ref(),
            ));
        }
        data.statements.push((statement, location));
        Ok(())
    }

    fn terminate(
        &mut self,
        block: Block,
        terminator: Terminator,
        location: Option<Location>,
    ) -> Result<()> {
        let data = self.block_mut(block)?;
        if data.terminator.is_some() {
            return Err(BackendError::invalid(
                "block has already been terminated",
                location.as_ref(),
            ));
        }
        data.terminator = Some((terminator, location));
        Ok(())
    }

    fn check_same_function(
        &self,
        from: Block,
        to: Block,
        location: Option<&Location>,
    ) -> Result<()> {
        self.block(to)?;
        if from.function != to.function {
            return Err(BackendError::invalid(
                "cannot branch to a block of another function",
                location,
            ));
        }
        Ok(())
    }

    fn check_statement_owner(
        &self,
        function: u32,
        statement: &Statement,
        location: Option<&Location>,
    ) -> Result<()> {
        match *statement {
            Statement::Assign(lvalue, rvalue) | Statement::AssignOp(lvalue, _, rvalue) => {
                self.check_lvalue_owner(function, lvalue, location)?;
                self.check_expr_owner(function, rvalue)
            }
            Statement::Eval(rvalue) => self.check_expr_owner(function, rvalue),
            Statement::Comment(_) => Ok(()),
        }
    }

    fn check_terminator_owner(&self, function: u32, terminator: &Terminator) -> Result<()> {
        match *terminator {
            Terminator::Jump(_) | Terminator::Return(None) => Ok(()),
            Terminator::Conditional { condition, .. } => self.check_expr_owner(function, condition),
            Terminator::Return(Some(value)) | Terminator::Switch { value, .. } => {
                self.check_expr_owner(function, value)
            }
        }
    }

    fn check_lvalue_owner(
        &self,
        function: u32,
        lvalue: LValue,
        location: Option<&Location>,
    ) -> Result<()> {
        match lvalue {
            LValue::Local(local) if local.function != function => Err(BackendError::invalid(
                "local variable used outside of its function",
                location,
            )),
            LValue::Element { index, .. } => self.check_expr_owner(function, index),
            _ => Ok(()),
        }
    }

    fn check_expr_owner(&self, function: u32, value: RValue) -> Result<()> {
        let expr = self.expr(value)?;
        match &expr.kind {
            ExprKind::Constant(_) => Ok(()),
            ExprKind::Param { function: owner, .. } if *owner != function => {
                Err(BackendError::invalid(
                    "parameter used outside of its function",
                    expr.location.as_ref(),
                ))
            }
            ExprKind::Param { .. } => Ok(()),
            ExprKind::Load(lvalue) => {
                self.check_lvalue_owner(function, *lvalue, expr.location.as_ref())
            }
            ExprKind::Binary(_, a, b) | ExprKind::Comparison(_, a, b) => {
                self.check_expr_owner(function, *a)?;
                self.check_expr_owner(function, *b)
            }
            ExprKind::Cast(inner) => self.check_expr_owner(function, *inner),
            ExprKind::Call(_, args) => args
                .iter()
                .try_for_each(|&arg| self.check_expr_owner(function, arg)),
        }
    }
}

pub(crate) fn block_name(block: &BasicBlock, index: usize) -> String {
    block
        .name
        .clone()
        .unwrap_or_else(|| format!("block{}", index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_function(ctxt: &mut Context) -> (Function, Block) {
        let f = ctxt
            .new_function(FunctionKind::Exported, Type::Int, "f", &[(Type::Int, "x")])
            .unwrap();
        let entry = ctxt.new_block(f, Some("entry")).unwrap();
        (f, entry)
    }

    #[test]
    fn rejects_mismatched_binary_operands() {
        let mut ctxt = Context::new();
        let int_one = ctxt.one(Type::Int).unwrap();
        let byte_one = ctxt.one(Type::Byte).unwrap();
        let err = ctxt
            .new_binary_op(BinaryOp::Plus, Type::Int, int_one, byte_one, None)
            .unwrap_err();
        assert!(matches!(err, BackendError::Invalid { .. }));
    }

    #[test]
    fn rejects_statements_after_terminator() {
        let mut ctxt = Context::new();
        let (f, entry) = int_function(&mut ctxt);
        let x = ctxt.param(f, 0).unwrap();
        ctxt.end_with_return(entry, Some(x), None).unwrap();

        assert!(ctxt.add_comment(entry, "too late", None).is_err());
        assert!(ctxt.end_with_return(entry, Some(x), None).is_err());
    }

    #[test]
    fn rejects_wrong_return_type() {
        let mut ctxt = Context::new();
        let (_, entry) = int_function(&mut ctxt);
        assert!(ctxt.end_with_void_return(entry, None).is_err());
    }

    #[test]
    fn rejects_bad_call_arguments() {
        let mut ctxt = Context::new();
        let putchar = ctxt
            .new_function(FunctionKind::Imported, Type::Void, "putchar", &[(Type::Int, "c")])
            .unwrap();
        let byte = ctxt.one(Type::Byte).unwrap();

        assert!(ctxt.new_call(putchar, &[], None).is_err());
        assert!(ctxt.new_call(putchar, &[byte], None).is_err());
    }

    #[test]
    fn imported_functions_have_no_body() {
        let mut ctxt = Context::new();
        let getchar = ctxt
            .new_function(FunctionKind::Imported, Type::Int, "getchar", &[])
            .unwrap();
        assert!(ctxt.new_block(getchar, None).is_err());
    }

    #[test]
    fn only_arrays_can_be_indexed() {
        let mut ctxt = Context::new();
        let scalar = ctxt.new_global(GlobalKind::Internal, Type::Int, "n").unwrap();
        let cells = ctxt
            .new_global(GlobalKind::Internal, Type::array(Type::Byte, 8), "cells")
            .unwrap();
        let index = ctxt.zero(Type::Int).unwrap();
        let byte_index = ctxt.zero(Type::Byte).unwrap();

        assert!(ctxt.array_access(scalar, index).is_err());
        assert!(ctxt.array_access(cells, byte_index).is_err());
        let element = ctxt.array_access(cells, index).unwrap();
        assert_eq!(ctxt.lvalue_type(element).unwrap(), Type::Byte);
        assert!(ctxt.load(LValue::Global(cells)).is_err());
    }

    #[test]
    fn validate_finds_unterminated_blocks() {
        let mut ctxt = Context::new();
        let (f, entry) = int_function(&mut ctxt);
        let dangling = ctxt.new_block(f, Some("dangling")).unwrap();
        ctxt.end_with_jump(entry, dangling, None).unwrap();

        let err = ctxt.validate().unwrap_err();
        assert!(err.to_string().contains("dangling"), "{}", err);
    }

    #[test]
    fn validate_finds_duplicate_names() {
        let mut ctxt = Context::new();
        ctxt.new_global(GlobalKind::Internal, Type::Int, "x").unwrap();
        ctxt.new_global(GlobalKind::Internal, Type::Byte, "x").unwrap();
        assert!(ctxt.validate().is_err());
    }

    #[test]
    fn validate_finds_locals_used_by_another_function() {
        let mut ctxt = Context::new();
        let (f, entry) = int_function(&mut ctxt);
        let x = ctxt.param(f, 0).unwrap();
        ctxt.end_with_return(entry, Some(x), None).unwrap();

        let g = ctxt
            .new_function(FunctionKind::Internal, Type::Void, "g", &[])
            .unwrap();
        let g_entry = ctxt.new_block(g, None).unwrap();
        let stolen = ctxt.new_local(f, Type::Int, "stolen").unwrap();
        let one = ctxt.one(Type::Int).unwrap();
        ctxt.add_assignment(g_entry, LValue::Local(stolen), one, None).unwrap();
        ctxt.end_with_void_return(g_entry, None).unwrap();

        assert!(ctxt.validate().is_err());
    }

    #[test]
    fn sessions_are_independent() {
        let mut first = Context::new();
        let mut second = Context::new();
        int_function(&mut first);
        assert!(first.function_by_name("f").is_some());
        assert!(second.function_by_name("f").is_none());
        second
            .new_function(FunctionKind::Imported, Type::Int, "getchar", &[])
            .unwrap();
        assert!(first.function_by_name("getchar").is_none());
    }

    #[test]
    fn main_wrapper_calls_entry() {
        let mut ctxt = Context::new();
        let func = ctxt
            .new_function(FunctionKind::Exported, Type::Void, "func", &[])
            .unwrap();
        let entry = ctxt.new_block(func, None).unwrap();
        ctxt.end_with_void_return(entry, None).unwrap();

        let main = ctxt.new_main(func).unwrap();
        assert_eq!(ctxt.function_name(main), Some("main"));
        ctxt.validate().unwrap();
    }
}
