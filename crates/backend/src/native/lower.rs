//! Lowers a [Context] to Cranelift IR inside any [Module] (in-memory JIT or object file).

use std::collections::HashMap;

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{
    types, AbiParam, Block as ClifBlock, FuncRef, GlobalValue, InstBuilder, MemFlags, Signature,
    SourceLoc, UserFuncName, Value as ClifValue,
};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module, ModuleError};
use log::debug;

use crate::context::{
    BinaryOp, Comparison, Context, ExprKind, Function, FunctionData, FunctionKind, GlobalKind,
    LValue, RValue, Statement, Terminator,
};
use crate::error::BackendError;
use crate::location::Location;
use crate::types::Type;

/// Cells are indexed with `int`, so no global may be larger than this.
const MAX_DATA_SIZE: usize = i32::MAX as usize;

/// Everything that was declared in the module, indexed like the [Context].
pub(crate) struct Declarations {
    pub(crate) functions: Vec<FuncId>,
    /// Source locations, indexed by `SourceLoc` minus one.
    pub(crate) locations: Vec<Location>,
}

pub(crate) fn codegen_error(error: ModuleError) -> BackendError {
    BackendError::Codegen(error.to_string())
}

/// Declares and defines every global and function of `context` in `module`.
pub(crate) fn define_all<M: Module>(
    module: &mut M,
    context: &Context,
    debug_info: bool,
) -> Result<Declarations, BackendError> {
    let pointer = module.target_config().pointer_type();

    let mut data_ids = Vec::with_capacity(context.globals.len());
    for global in &context.globals {
        let linkage = match global.kind {
            GlobalKind::Internal => Linkage::Local,
            GlobalKind::Exported => Linkage::Export,
        };
        let id = module
            .declare_data(&global.name, linkage, true, false)
            .map_err(codegen_error)?;
        let size = global
            .ty
            .size(pointer.bytes() as usize)
            .filter(|size| *size <= MAX_DATA_SIZE)
            .ok_or_else(|| {
                let message = format!("`{}` of type {} is too large", global.name, global.ty);
                BackendError::Codegen(message)
            })?;
        let mut data = DataDescription::new();
        data.define_zeroinit(size.max(1));
        module.define_data(id, &data).map_err(codegen_error)?;
        data_ids.push(id);
    }

    let mut functions = Vec::with_capacity(context.functions.len());
    for function in &context.functions {
        let linkage = match function.kind {
            FunctionKind::Exported => Linkage::Export,
            FunctionKind::Internal => Linkage::Local,
            FunctionKind::Imported => Linkage::Import,
        };
        let signature = signature(&*module, function)?;
        let id = module
            .declare_function(&function.name, linkage, &signature)
            .map_err(codegen_error)?;
        functions.push(id);
    }

    let mut locations = Vec::new();
    let mut codegen = module.make_context();
    let mut builder_context = FunctionBuilderContext::new();
    for (index, function) in context.functions.iter().enumerate() {
        if function.kind == FunctionKind::Imported {
            continue;
        }

        codegen.func.signature = signature(&*module, function)?;
        codegen.func.name = UserFuncName::user(0, functions[index].as_u32());

        let builder = FunctionBuilder::new(&mut codegen.func, &mut builder_context);
        let translator = FunctionTranslator {
            builder,
            module: &mut *module,
            context,
            functions: &functions,
            data_ids: &data_ids,
            locations: &mut locations,
            debug_info,
            pointer,
            blocks: Vec::new(),
            params: Vec::new(),
            locals: Vec::new(),
            func_refs: HashMap::new(),
            global_values: HashMap::new(),
        };
        translator.translate(function)?;

        module
            .define_function(functions[index], &mut codegen)
            .map_err(codegen_error)?;
        debug!("defined `{}`", function.name);
        module.clear_context(&mut codegen);
    }

    Ok(Declarations {
        functions,
        locations,
    })
}

fn signature<M: Module>(module: &M, function: &FunctionData) -> Result<Signature, BackendError> {
    let pointer = module.target_config().pointer_type();
    let mut signature = module.make_signature();
    for param in &function.params {
        signature
            .params
            .push(AbiParam::new(clif_type(&param.ty, pointer)?));
    }
    if function.return_type != Type::Void {
        signature
            .returns
            .push(AbiParam::new(clif_type(&function.return_type, pointer)?));
    }
    Ok(signature)
}

fn clif_type(ty: &Type, pointer: types::Type) -> Result<types::Type, BackendError> {
    match ty {
        Type::Int => Ok(types::I32),
        Type::Byte => Ok(types::I8),
        Type::Pointer(_) => Ok(pointer),
        Type::Void | Type::Array { .. } => Err(BackendError::Codegen(format!(
            "{} has no machine representation",
            ty
        ))),
    }
}

/// Constants are stored zero-extended to the width of their type.
fn immediate(value: i64, ty: &Type) -> i64 {
    match ty {
        Type::Byte => value as u8 as i64,
        Type::Int => value as i32 as u32 as i64,
        _ => value,
    }
}

struct FunctionTranslator<'a, M: Module> {
    builder: FunctionBuilder<'a>,
    module: &'a mut M,
    context: &'a Context,
    functions: &'a [FuncId],
    data_ids: &'a [DataId],
    locations: &'a mut Vec<Location>,
    debug_info: bool,
    pointer: types::Type,
    blocks: Vec<ClifBlock>,
    params: Vec<ClifValue>,
    locals: Vec<(Variable, Type)>,
    func_refs: HashMap<u32, FuncRef>,
    global_values: HashMap<u32, GlobalValue>,
}

impl<'a, M: Module> FunctionTranslator<'a, M> {
    fn translate(mut self, function: &FunctionData) -> Result<(), BackendError> {
        for _ in &function.blocks {
            let block = self.builder.create_block();
            self.blocks.push(block);
        }

        let entry = self.blocks[0];
        self.builder.append_block_params_for_function_params(entry);
        self.builder.switch_to_block(entry);
        self.params = self.builder.block_params(entry).to_vec();

        for (index, local) in function.locals.iter().enumerate() {
            let variable = Variable::from_u32(index as u32);
            let ty = clif_type(&local.ty, self.pointer)?;
            self.builder.declare_var(variable, ty);
            let zero = self.builder.ins().iconst(ty, 0);
            self.builder.def_var(variable, zero);
            self.locals.push((variable, local.ty.clone()));
        }

        for (index, block) in function.blocks.iter().enumerate() {
            if index > 0 {
                self.builder.switch_to_block(self.blocks[index]);
            }
            for (statement, location) in &block.statements {
                self.set_location(location.as_ref());
                self.statement(statement)?;
            }
            match &block.terminator {
                Some((terminator, location)) => {
                    self.set_location(location.as_ref());
                    self.terminator(terminator)?;
                }
                None => {
                    return Err(BackendError::Codegen(format!(
                        "`{}` has an unterminated block",
                        function.name
                    )))
                }
            }
        }

        self.builder.seal_all_blocks();
        self.builder.finalize();
        Ok(())
    }

    fn set_location(&mut self, location: Option<&Location>) {
        if !self.debug_info {
            return;
        }
        let srcloc = match location {
            Some(location) => {
                self.locations.push(location.clone());
                SourceLoc::new(self.locations.len() as u32)
            }
            None => SourceLoc::default(),
        };
        self.builder.set_srcloc(srcloc);
    }

    fn statement(&mut self, statement: &Statement) -> Result<(), BackendError> {
        match *statement {
            Statement::Assign(lvalue, rvalue) => {
                let value = self.rvalue(rvalue)?;
                self.store(lvalue, value)
            }
            Statement::AssignOp(lvalue, op, rvalue) => {
                // Resolve the address once, so the index is only evaluated once.
                let place = self.place(lvalue)?;
                let current = self.read(&place)?;
                let operand = self.rvalue(rvalue)?;
                let ty = self.context.lvalue_type(lvalue)?;
                let value = self.arithmetic(op, &ty, current, operand);
                self.write(&place, value);
                Ok(())
            }
            Statement::Eval(rvalue) => self.eval(rvalue).map(|_| ()),
            Statement::Comment(_) => Ok(()),
        }
    }

    fn terminator(&mut self, terminator: &Terminator) -> Result<(), BackendError> {
        match terminator {
            Terminator::Jump(target) => {
                self.builder
                    .ins()
                    .jump(self.blocks[target.index as usize], &[]);
            }
            Terminator::Conditional {
                condition,
                on_true,
                on_false,
            } => {
                let condition = self.rvalue(*condition)?;
                self.builder.ins().brif(
                    condition,
                    self.blocks[on_true.index as usize],
                    &[],
                    self.blocks[on_false.index as usize],
                    &[],
                );
            }
            Terminator::Return(Some(value)) => {
                let value = self.rvalue(*value)?;
                self.builder.ins().return_(&[value]);
            }
            Terminator::Return(None) => {
                self.builder.ins().return_(&[]);
            }
            Terminator::Switch {
                value,
                default,
                cases,
            } => {
                // A chain of range tests, tried in order.
                let value = self.rvalue(*value)?;
                for case in cases {
                    let low = immediate(case.low as i64, &Type::Int);
                    let low = self.builder.ins().iconst(types::I32, low);
                    let high = immediate(case.high as i64, &Type::Int);
                    let high = self.builder.ins().iconst(types::I32, high);
                    let above = self
                        .builder
                        .ins()
                        .icmp(IntCC::SignedGreaterThanOrEqual, value, low);
                    let below = self
                        .builder
                        .ins()
                        .icmp(IntCC::SignedLessThanOrEqual, value, high);
                    let within = self.builder.ins().band(above, below);

                    let next = self.builder.create_block();
                    self.builder.ins().brif(
                        within,
                        self.blocks[case.dest.index as usize],
                        &[],
                        next,
                        &[],
                    );
                    self.builder.switch_to_block(next);
                }
                self.builder
                    .ins()
                    .jump(self.blocks[default.index as usize], &[]);
            }
        }
        Ok(())
    }

    /// Evaluates an expression; `None` for calls to void functions.
    fn eval(&mut self, value: RValue) -> Result<Option<ClifValue>, BackendError> {
        let context = self.context;
        let expr = context.expr(value)?;

        let result = match &expr.kind {
            ExprKind::Constant(c) => {
                let ty = clif_type(&expr.ty, self.pointer)?;
                self.builder.ins().iconst(ty, immediate(*c, &expr.ty))
            }
            ExprKind::Param { index, .. } => self.params[*index as usize],
            ExprKind::Load(lvalue) => {
                let place = self.place(*lvalue)?;
                self.read(&place)?
            }
            ExprKind::Binary(op, a, b) => {
                let a = self.rvalue(*a)?;
                let b = self.rvalue(*b)?;
                self.arithmetic(*op, &expr.ty, a, b)
            }
            ExprKind::Comparison(cmp, a, b) => {
                let signed = context.expr(*a)?.ty == Type::Int;
                let a = self.rvalue(*a)?;
                let b = self.rvalue(*b)?;
                let flag = self.builder.ins().icmp(condition_code(*cmp, signed), a, b);
                self.builder.ins().uextend(types::I32, flag)
            }
            ExprKind::Cast(inner) => {
                let from = &context.expr(*inner)?.ty;
                let value = self.rvalue(*inner)?;
                match (from, &expr.ty) {
                    (Type::Int, Type::Byte) => self.builder.ins().ireduce(types::I8, value),
                    (Type::Byte, Type::Int) => self.builder.ins().uextend(types::I32, value),
                    _ => value,
                }
            }
            ExprKind::Call(function, args) => return self.call(*function, args),
        };

        Ok(Some(result))
    }

    fn rvalue(&mut self, value: RValue) -> Result<ClifValue, BackendError> {
        self.eval(value)?
            .ok_or_else(|| BackendError::Codegen(String::from("void value used in an expression")))
    }

    fn call(
        &mut self,
        function: Function,
        args: &[RValue],
    ) -> Result<Option<ClifValue>, BackendError> {
        let mut values = Vec::with_capacity(args.len());
        for &arg in args {
            values.push(self.rvalue(arg)?);
        }

        let func_ref = match self.func_refs.get(&function.0) {
            Some(func_ref) => *func_ref,
            None => {
                let id = self.functions[function.0 as usize];
                let func_ref = self.module.declare_func_in_func(id, self.builder.func);
                self.func_refs.insert(function.0, func_ref);
                func_ref
            }
        };

        let call = self.builder.ins().call(func_ref, &values);
        Ok(self.builder.inst_results(call).first().copied())
    }

    fn arithmetic(&mut self, op: BinaryOp, ty: &Type, a: ClifValue, b: ClifValue) -> ClifValue {
        let signed = *ty == Type::Int;
        let ins = self.builder.ins();
        match op {
            BinaryOp::Plus => ins.iadd(a, b),
            BinaryOp::Minus => ins.isub(a, b),
            BinaryOp::Mult => ins.imul(a, b),
            BinaryOp::Divide if signed => ins.sdiv(a, b),
            BinaryOp::Divide => ins.udiv(a, b),
            BinaryOp::Modulo if signed => ins.srem(a, b),
            BinaryOp::Modulo => ins.urem(a, b),
        }
    }

    fn global_address(&mut self, index: u32) -> ClifValue {
        let global_value = match self.global_values.get(&index) {
            Some(global_value) => *global_value,
            None => {
                let id = self.data_ids[index as usize];
                let global_value = self.module.declare_data_in_func(id, self.builder.func);
                self.global_values.insert(index, global_value);
                global_value
            }
        };
        self.builder.ins().symbol_value(self.pointer, global_value)
    }

    fn place(&mut self, lvalue: LValue) -> Result<Place, BackendError> {
        let ty = self.context.lvalue_type(lvalue)?;
        match lvalue {
            LValue::Local(local) => Ok(Place::Variable(self.locals[local.index as usize].0)),
            LValue::Global(global) => {
                let address = self.global_address(global.0);
                Ok(Place::Memory { address, ty })
            }
            LValue::Element { array, index } => {
                let base = self.global_address(array.0);
                let index = self.rvalue(index)?;
                let index = if self.pointer.bits() > 32 {
                    self.builder.ins().sextend(self.pointer, index)
                } else {
                    index
                };
                let element_size = ty
                    .size(self.pointer.bytes() as usize)
                    .ok_or_else(|| BackendError::Codegen(format!("{} is too large", ty)))?;
                let element_size = element_size as i64;
                let offset = self.builder.ins().imul_imm(index, element_size);
                let address = self.builder.ins().iadd(base, offset);
                Ok(Place::Memory { address, ty })
            }
        }
    }

    fn read(&mut self, place: &Place) -> Result<ClifValue, BackendError> {
        match place {
            Place::Variable(variable) => Ok(self.builder.use_var(*variable)),
            Place::Memory { address, ty } => {
                let ty = clif_type(ty, self.pointer)?;
                Ok(self.builder.ins().load(ty, MemFlags::new(), *address, 0))
            }
        }
    }

    fn write(&mut self, place: &Place, value: ClifValue) {
        match place {
            Place::Variable(variable) => self.builder.def_var(*variable, value),
            Place::Memory { address, .. } => {
                self.builder.ins().store(MemFlags::new(), value, *address, 0);
            }
        }
    }

    fn store(&mut self, lvalue: LValue, value: ClifValue) -> Result<(), BackendError> {
        let place = self.place(lvalue)?;
        self.write(&place, value);
        Ok(())
    }
}

enum Place {
    Variable(Variable),
    Memory { address: ClifValue, ty: Type },
}

fn condition_code(cmp: Comparison, signed: bool) -> IntCC {
    match (cmp, signed) {
        (Comparison::Eq, _) => IntCC::Equal,
        (Comparison::Ne, _) => IntCC::NotEqual,
        (Comparison::Lt, true) => IntCC::SignedLessThan,
        (Comparison::Lt, false) => IntCC::UnsignedLessThan,
        (Comparison::Le, true) => IntCC::SignedLessThanOrEqual,
        (Comparison::Le, false) => IntCC::UnsignedLessThanOrEqual,
        (Comparison::Gt, true) => IntCC::SignedGreaterThan,
        (Comparison::Gt, false) => IntCC::UnsignedGreaterThan,
        (Comparison::Ge, true) => IntCC::SignedGreaterThanOrEqual,
        (Comparison::Ge, false) => IntCC::UnsignedGreaterThanOrEqual,
    }
}
