use crate::{Exception, Flow, PrimitiveContext};

// Arithmetic wraps, arbitrary precision lives outside the core.

type IntegerOp = fn(i64, i64) -> i64;

fn integer_binop(ctx: &mut PrimitiveContext, op: IntegerOp) -> Result<Flow, Exception> {
    let a = ctx.receiver_integer()?;
    let b = ctx.integer_arg(0)?;
    Ok(Flow::Return(ctx.vm().integer(op(a, b))))
}

type IntegerCompare = fn(&i64, &i64) -> bool;

fn integer_compare(ctx: &mut PrimitiveContext, op: IntegerCompare) -> Result<Flow, Exception> {
    let a = ctx.receiver_integer()?;
    let b = ctx.integer_arg(0)?;
    Ok(Flow::Return(ctx.vm().boolean(op(&a, &b))))
}

pub fn integer_add(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    integer_binop(ctx, i64::wrapping_add)
}

pub fn integer_sub(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    integer_binop(ctx, i64::wrapping_sub)
}

pub fn integer_mul(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    integer_binop(ctx, i64::wrapping_mul)
}

pub fn integer_lt(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    integer_compare(ctx, i64::lt)
}

pub fn integer_eq(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    integer_compare(ctx, i64::eq)
}

#[cfg(test)]
mod tests {
    use crate::{Expr, ExceptionKind, HeapCreateInfo, VM, VMCreateInfo};

    fn eval(expr: Expr) -> (VM, crate::Value) {
        let vm = VM::new(VMCreateInfo {
            heap: HeapCreateInfo { words: 1 << 16 },
        })
        .unwrap();
        let result = vm.proxy().evaluate_top(&expr);
        (vm, result)
    }

    #[test]
    fn arithmetic() {
        let (vm, result) = eval(Expr::send(
            Expr::send(Expr::Integer(6), "*", [Expr::Integer(7)]),
            "-",
            [Expr::Integer(2)],
        ));
        assert_eq!(vm.proxy().integer_value(result), Some(40));
    }

    #[test]
    fn comparisons_answer_booleans() {
        let (vm, result) = eval(Expr::send(Expr::Integer(1), "<", [Expr::Integer(2)]));
        assert_eq!(result, vm.proxy().specials().true_object);
        let (vm, result) = eval(Expr::send(Expr::Integer(3), "=", [Expr::Integer(2)]));
        assert_eq!(result, vm.proxy().specials().false_object);
    }

    #[test]
    fn overflow_wraps() {
        let (vm, result) = eval(Expr::send(Expr::Integer(i64::MAX), "+", [Expr::Integer(1)]));
        assert_eq!(vm.proxy().integer_value(result), Some(i64::MIN));
    }

    #[test]
    fn non_integer_argument_raises() {
        let (vm, result) = eval(Expr::send(Expr::Integer(1), "+", [Expr::Str("x".into())]));
        let proxy = vm.proxy();
        assert_eq!(
            proxy.exception_kind(result),
            Some(ExceptionKind::IntegerExpected)
        );
    }

    #[test]
    fn missing_argument_raises() {
        // `+` sent with no argument through a unary send.
        let (vm, result) = eval(Expr::send(Expr::Integer(1), "+", []));
        assert_eq!(
            vm.proxy().exception_kind(result),
            Some(ExceptionKind::MissingArgument)
        );
    }
}
