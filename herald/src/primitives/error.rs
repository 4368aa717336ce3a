use crate::{Exception, Flow, PrimitiveContext};

/// `exception raise`
pub fn raise(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    Err(Exception(ctx.receiver()))
}

/// `raise:` of the root dynamic environment.
///
/// Ends the thread; whoever waits on it receives the exception as a value.
pub fn default_handler(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let exception = ctx.arg(0)?;
    ctx.vm().unhandled(ctx.continuation(), exception);
    Ok(Flow::Halt)
}

/// `raise:` installed for threads spawned on behalf of a waiter.
///
/// Ends the thread with the exception wrapped, so the waiter raises it again
/// in its own environment.
pub fn tunnel_handler(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let exception = ctx.arg(0)?;
    let vm = ctx.vm();
    let wrapper = vm.tunnel(exception);
    if let Some(promise) = vm.heap.enclosing_promise(ctx.continuation()) {
        vm.fulfill(promise, wrapper);
    }
    log::debug!("tunneling {} to waiter", vm.describe(exception));
    Ok(Flow::Halt)
}

#[cfg(test)]
mod tests {
    use crate::{Expr, ExceptionKind, HeapCreateInfo, VM, VMCreateInfo};

    fn vm() -> VM {
        VM::new(VMCreateInfo {
            heap: HeapCreateInfo { words: 1 << 17 },
        })
        .unwrap()
    }

    #[test]
    fn raising_an_exception_object() {
        let vm = vm();
        let proxy = vm.proxy();
        // exception badArity raise
        let expr = Expr::send(
            Expr::send(Expr::var("exception"), "badArity", []),
            "raise",
            [],
        );
        let result = proxy.evaluate_top(&expr);
        assert_eq!(proxy.exception_kind(result), Some(ExceptionKind::BadArity));
    }

    #[test]
    fn handler_result_replaces_the_faulting_send() {
        let vm = vm();
        let proxy = vm.proxy();
        let root = proxy.specials().root_environment;
        let lobby = proxy.specials().lobby;
        let env = proxy.child_environment(root);
        let handler = proxy.method(&["e"], &[Expr::Integer(99)], lobby);
        proxy.add_slot(env, "raise:", handler);

        // 1 + (1 frobnicate)
        let expr = Expr::send(
            Expr::Integer(1),
            "+",
            [Expr::send(Expr::Integer(1), "frobnicate", [])],
        );
        let result = proxy.evaluate(&expr, lobby, env);
        assert_eq!(proxy.integer_value(result), Some(100));
    }
}
