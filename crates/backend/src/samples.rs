//! Small, well-known programs built with the [Context] API.
//!
//! Backends use these to check that they agree with each other.

use crate::context::{BinaryOp, Case, Comparison, Context, Function, FunctionKind, LValue};
use crate::error::Result;
use crate::types::Type;

/// `int square (int i) { return i * i; }`
pub fn populate_square(ctxt: &mut Context) -> Result<Function> {
    let square =
        ctxt.new_function(FunctionKind::Exported, Type::Int, "square", &[(Type::Int, "i")])?;
    let entry = ctxt.new_block(square, Some("entry"))?;

    let i = ctxt.param(square, 0)?;
    let product = ctxt.new_binary_op(BinaryOp::Mult, Type::Int, i, i, None)?;
    ctxt.end_with_return(entry, Some(product), None)?;

    Ok(square)
}

/// The sum of `i * i` for every `i` in `0..n`:
///
/// ```c
/// int loop_test (int n)
/// {
///   int i, sum = 0;
///   for (i = 0; i < n; i++)
///     sum += i * i;
///   return sum;
/// }
/// ```
pub fn populate_sum_of_squares(ctxt: &mut Context) -> Result<Function> {
    let func =
        ctxt.new_function(FunctionKind::Exported, Type::Int, "loop_test", &[(Type::Int, "n")])?;
    let i = LValue::Local(ctxt.new_local(func, Type::Int, "i")?);
    let sum = LValue::Local(ctxt.new_local(func, Type::Int, "sum")?);

    let entry = ctxt.new_block(func, Some("entry"))?;
    let cond = ctxt.new_block(func, Some("cond"))?;
    let body = ctxt.new_block(func, Some("loop"))?;
    let after = ctxt.new_block(func, Some("after_loop"))?;

    let zero = ctxt.zero(Type::Int)?;
    ctxt.add_assignment(entry, sum, zero, None)?;
    ctxt.add_assignment(entry, i, zero, None)?;
    ctxt.end_with_jump(entry, cond, None)?;

    let n = ctxt.param(func, 0)?;
    let current = ctxt.load(i)?;
    let in_range = ctxt.new_comparison(Comparison::Lt, current, n, None)?;
    ctxt.end_with_conditional(cond, in_range, body, after, None)?;

    let squared = ctxt.new_binary_op(BinaryOp::Mult, Type::Int, current, current, None)?;
    ctxt.add_assignment_op(body, sum, BinaryOp::Plus, squared, None)?;
    let one = ctxt.one(Type::Int)?;
    ctxt.add_assignment_op(body, i, BinaryOp::Plus, one, None)?;
    ctxt.end_with_jump(body, cond, None)?;

    let total = ctxt.load(sum)?;
    ctxt.end_with_return(after, Some(total), None)?;

    Ok(func)
}

/// A switch with single-value, ranged, negative and default cases. Behaves like
/// [simulate_switch].
pub fn populate_switch(ctxt: &mut Context) -> Result<Function> {
    let func =
        ctxt.new_function(FunctionKind::Exported, Type::Int, "test_switch", &[(Type::Int, "x")])?;
    let entry = ctxt.new_block(func, Some("entry"))?;

    let arms: [(i32, i32, i64); 4] = [(0, 5, 3), (25, 27, 4), (-42, -17, 83), (40, 40, 8)];
    let mut cases = Vec::with_capacity(arms.len());
    for (low, high, result) in arms {
        let block = ctxt.new_block(func, None)?;
        let value = ctxt.new_constant(Type::Int, result)?;
        ctxt.end_with_return(block, Some(value), None)?;
        cases.push(Case::new(low, high, block));
    }

    let default = ctxt.new_block(func, Some("default"))?;
    let ten = ctxt.new_constant(Type::Int, 10)?;
    ctxt.end_with_return(default, Some(ten), None)?;

    let x = ctxt.param(func, 0)?;
    ctxt.end_with_switch(entry, x, default, &cases, None)?;

    Ok(func)
}

/// What `test_switch` from [populate_switch] should return.
pub fn simulate_switch(x: i32) -> i32 {
    match x {
        0..=5 => 3,
        25..=27 => 4,
        -42..=-17 => 83,
        40 => 8,
        _ => 10,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_validate() {
        let mut ctxt = Context::new();
        populate_square(&mut ctxt).unwrap();
        populate_sum_of_squares(&mut ctxt).unwrap();
        populate_switch(&mut ctxt).unwrap();
        ctxt.validate().unwrap();
    }

    #[test]
    fn blocks_keep_their_names() {
        let mut ctxt = Context::new();
        populate_sum_of_squares(&mut ctxt).unwrap();
        let text = ctxt.to_string();
        for label in ["entry:", "cond:", "loop:", "after_loop:"] {
            assert!(text.contains(label), "missing {} in\n{}", label, text);
        }
        assert!(text.contains("sum += i * i;"), "{}", text);
    }
}
