//! Prints a [Context] as C-like pseudocode.

use std::fmt;

use crate::context::{
    block_name, BinaryOp, Block, Comparison, Context, ExprKind, FunctionData, FunctionKind,
    GlobalKind, LValue, RValue, Statement, Terminator,
};

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for global in &self.globals {
            let linkage = match global.kind {
                GlobalKind::Internal => "static ",
                GlobalKind::Exported => "",
            };
            writeln!(f, "{}{} {};", linkage, global.ty, global.name)?;
        }
        if !self.globals.is_empty() {
            writeln!(f)?;
        }

        for function in &self.functions {
            self.fmt_function(f, function)?;
        }

        Ok(())
    }
}

impl Context {
    fn fmt_function(&self, f: &mut fmt::Formatter, function: &FunctionData) -> fmt::Result {
        let linkage = match function.kind {
            FunctionKind::Exported => "",
            FunctionKind::Internal => "static ",
            FunctionKind::Imported => "extern ",
        };
        let params = function
            .params
            .iter()
            .map(|p| format!("{} {}", p.ty, p.name))
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{}{} {} ({})",
            linkage, function.return_type, function.name, params
        )?;

        if function.kind == FunctionKind::Imported {
            return writeln!(f, ";\n");
        }

        writeln!(f, "\n{{")?;
        for local in &function.locals {
            writeln!(f, "  {} {};", local.ty, local.name)?;
        }
        for (index, block) in function.blocks.iter().enumerate() {
            writeln!(f, "\n{}:", block_name(block, index))?;
            for (statement, _) in &block.statements {
                match statement {
                    Statement::Assign(lvalue, rvalue) => writeln!(
                        f,
                        "  {} = {};",
                        self.lvalue_text(*lvalue),
                        self.rvalue_text(*rvalue)
                    )?,
                    Statement::AssignOp(lvalue, op, rvalue) => writeln!(
                        f,
                        "  {} {}= {};",
                        self.lvalue_text(*lvalue),
                        binary_symbol(*op),
                        self.rvalue_text(*rvalue)
                    )?,
                    Statement::Eval(rvalue) => {
                        writeln!(f, "  (void){};", self.rvalue_text(*rvalue))?
                    }
                    Statement::Comment(text) => writeln!(f, "  /* {} */", text)?,
                }
            }
            match &block.terminator {
                Some((Terminator::Jump(target), _)) => {
                    writeln!(f, "  goto {};", self.block_text(*target))?
                }
                Some((
                    Terminator::Conditional {
                        condition,
                        on_true,
                        on_false,
                    },
                    _,
                )) => writeln!(
                    f,
                    "  if ({}) goto {}; else goto {};",
                    self.rvalue_text(*condition),
                    self.block_text(*on_true),
                    self.block_text(*on_false)
                )?,
                Some((Terminator::Return(Some(value)), _)) => {
                    writeln!(f, "  return {};", self.rvalue_text(*value))?
                }
                Some((Terminator::Return(None), _)) => writeln!(f, "  return;")?,
                Some((
                    Terminator::Switch {
                        value,
                        default,
                        cases,
                    },
                    _,
                )) => {
                    writeln!(f, "  switch ({}) {{", self.rvalue_text(*value))?;
                    for case in cases {
                        writeln!(
                            f,
                            "    case {} ... {}: goto {};",
                            case.low,
                            case.high,
                            self.block_text(case.dest)
                        )?;
                    }
                    writeln!(f, "    default: goto {};", self.block_text(*default))?;
                    writeln!(f, "  }}")?;
                }
                None => writeln!(f, "  /* unterminated */")?,
            }
        }
        writeln!(f, "}}\n")
    }

    fn block_text(&self, block: Block) -> String {
        self.functions
            .get(block.function as usize)
            .and_then(|f| f.blocks.get(block.index as usize))
            .map(|b| block_name(b, block.index as usize))
            .unwrap_or_else(|| String::from("<bad block>"))
    }

    fn lvalue_text(&self, lvalue: LValue) -> String {
        match lvalue {
            LValue::Local(local) => self
                .functions
                .get(local.function as usize)
                .and_then(|f| f.locals.get(local.index as usize))
                .map(|l| l.name.clone())
                .unwrap_or_else(|| String::from("<bad local>")),
            LValue::Global(global) => self.global_text(global.0),
            LValue::Element { array, index } => {
                format!("{}[{}]", self.global_text(array.0), self.rvalue_text(index))
            }
        }
    }

    fn global_text(&self, index: u32) -> String {
        self.globals
            .get(index as usize)
            .map(|g| g.name.clone())
            .unwrap_or_else(|| String::from("<bad global>"))
    }

    fn rvalue_text(&self, value: RValue) -> String {
        let expr = match self.expr(value) {
            Ok(expr) => expr,
            Err(_) => return String::from("<bad value>"),
        };
        match &expr.kind {
            ExprKind::Constant(c) => format!("({}){}", expr.ty, c),
            ExprKind::Param { function, index } => self
                .functions
                .get(*function as usize)
                .and_then(|f| f.params.get(*index as usize))
                .map(|p| p.name.clone())
                .unwrap_or_else(|| String::from("<bad param>")),
            ExprKind::Load(lvalue) => self.lvalue_text(*lvalue),
            ExprKind::Binary(op, a, b) => format!(
                "{} {} {}",
                self.rvalue_text(*a),
                binary_symbol(*op),
                self.rvalue_text(*b)
            ),
            ExprKind::Comparison(cmp, a, b) => format!(
                "{} {} {}",
                self.rvalue_text(*a),
                comparison_symbol(*cmp),
                self.rvalue_text(*b)
            ),
            ExprKind::Cast(inner) => format!("({}){}", expr.ty, self.rvalue_text(*inner)),
            ExprKind::Call(function, args) => format!(
                "{} ({})",
                self.function_name(*function).unwrap_or("<bad function>"),
                args.iter()
                    .map(|&a| self.rvalue_text(a))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Plus => "+",
        BinaryOp::Minus => "-",
        BinaryOp::Mult => "*",
        BinaryOp::Divide => "/",
        BinaryOp::Modulo => "%",
    }
}

fn comparison_symbol(cmp: Comparison) -> &'static str {
    match cmp {
        Comparison::Eq => "==",
        Comparison::Ne => "!=",
        Comparison::Lt => "<",
        Comparison::Le => "<=",
        Comparison::Gt => ">",
        Comparison::Ge => ">=",
    }
}

#[cfg(test)]
mod tests {
    use crate::samples;
    use crate::Context;

    #[test]
    fn dumps_square() {
        let mut ctxt = Context::new();
        samples::populate_square(&mut ctxt).unwrap();

        let text = ctxt.to_string();
        assert!(text.contains("int square (int i)"), "{}", text);
        assert!(text.contains("return i * i;"), "{}", text);
    }
}
