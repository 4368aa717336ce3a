use crate::{
    ContinuationParts, Exception, ExceptionKind, Flow, LookupResult, PrimitiveContext, Tag, Value,
};

/// `receiver interpret`, `receiver wait`, `receiver value`
pub fn identity(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    Ok(Flow::Return(ctx.receiver()))
}

/// `a == b`
pub fn identical(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let other = ctx.resolved_arg(0)?;
    Ok(Flow::Return(ctx.vm().boolean(ctx.receiver() == other)))
}

/// `receiver proto`
pub fn proto(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let proto = ctx.heap().proto(ctx.receiver());
    match proto.non_nil() {
        Some(proto) => Ok(Flow::Return(proto)),
        None => Ok(Flow::Return(ctx.vm().specials().null)),
    }
}

/// `object at: name`, visibility filtered, following the proto chain.
pub fn slot_at(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let name = ctx.resolved_arg(0)?;
    let receiver = ctx.receiver();
    let heap = ctx.heap();
    let hidden = heap.hidden_namespaces(ctx.parts().dynamic_env);
    match heap.lookup(receiver, name, hidden) {
        LookupResult::Found { value, .. } => Ok(Flow::Return(value)),
        LookupResult::None => Err(ctx.exception(ExceptionKind::NoMethod, &[receiver, name])),
    }
}

/// `object at: name put: value`
///
/// New slots are tagged with the namespace of the current dynamic
/// environment. The value is stored as sent, promises are not waited on.
pub fn slot_at_put(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let name = ctx.resolved_arg(0)?;
    let value = ctx.arg(1)?;
    let receiver = ctx.receiver();
    let heap = ctx.heap();
    let dynamic_env = ctx.parts().dynamic_env;
    heap.add_slot(
        receiver,
        name,
        value,
        heap.current_namespace(dynamic_env),
        heap.hidden_namespaces(dynamic_env),
    );
    Ok(Flow::Return(receiver))
}

/// Dispatch method of the root of all protos: its own slots, then "no method".
pub fn dispatch_root(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let holder = ctx.holder;
    let parts = ctx.parts();
    let heap = ctx.heap();
    let hidden = heap.hidden_namespaces(parts.dynamic_env);
    match heap.shallow_lookup(holder, parts.selector, hidden) {
        Some(found) => ctx.apply(holder, found),
        None => Err(ctx.exception(
            ExceptionKind::NoMethod,
            &[parts.receiver, parts.selector],
        )),
    }
}

/// `node interpret` for message nodes: replaces the current send with the
/// send the node describes, evaluated position by position.
pub fn interpret_code(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let node = ctx.receiver();
    let parts = ctx.parts();
    let heap = ctx.heap();
    let hidden = heap.hidden(node);
    let target = heap.get(hidden, 0);
    let selector = heap.get(hidden, 1);
    let args = heap.get(hidden, 2);

    let mut positions = Vec::with_capacity(1 + heap.len(args));
    positions.push(target);
    positions.extend(heap.elements(args));
    let unevaluated = heap.allocate_vector(&positions);
    let next = heap.allocate_continuation(&ContinuationParts {
        origin: parts.origin,
        selector,
        evaluated: heap.empty_vector(),
        unevaluated,
        env: parts.env,
        dynamic_env: parts.dynamic_env,
        receiver: Value::NIL,
    });
    ctx.replace_continuation(next);
    Ok(Flow::Advance)
}

/// `node interpret` for scope nodes: the current lexical scope.
pub fn interpret_scope(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    Ok(Flow::Return(ctx.parts().env))
}

/// `node interpret` for block nodes: a method closed over the current scope.
pub fn interpret_block(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let node = ctx.receiver();
    let env = ctx.parts().env;
    let heap = ctx.heap();
    let hidden = heap.hidden(node);
    let parts = heap.allocate_vector(&[heap.get(hidden, 0), heap.get(hidden, 1), env]);
    let method = heap.allocate_object(Tag::Method, ctx.vm().specials().method, parts);
    Ok(Flow::Return(method))
}

/// `internals methodBody: e1 … en`: the value of the last body expression.
pub fn method_body(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let last = ctx.arguments().last().copied();
    Ok(Flow::Return(
        last.unwrap_or_else(|| ctx.vm().specials().null),
    ))
}

/// `block value: a …`: runs the block without rebinding `self`.
pub fn invoke_block(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let block = ctx.receiver();
    let args = ctx.arguments();
    ctx.enter_method(block, None, &args)
}

fn branch(ctx: &mut PrimitiveContext, index: usize) -> Result<Flow, Exception> {
    let block = ctx.arg(index)?;
    let value = ctx.vm().selectors().value;
    ctx.tail_send(block, value, &[])
}

/// `true ifTrue: a ifFalse: b`
pub fn true_branch(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    ctx.arg(1)?;
    branch(ctx, 0)
}

/// `false ifTrue: a ifFalse: b`
pub fn false_branch(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    branch(ctx, 1)
}

/// `true ifTrue: a`
pub fn true_if(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    branch(ctx, 0)
}

/// `false ifTrue: a`
pub fn false_if(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    Ok(Flow::Return(ctx.vm().specials().null))
}

/// `string , other`
pub fn string_concat(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let receiver = ctx.receiver();
    let mut bytes = ctx
        .heap()
        .string_bytes(receiver)
        .ok_or_else(|| ctx.exception(ExceptionKind::StringExpected, &[receiver]))?;
    bytes.extend(ctx.string_arg(0)?);
    let vm = ctx.vm();
    let raw = vm.heap.allocate_bytes(&bytes);
    let string = vm
        .heap
        .allocate_object(Tag::String, vm.specials().string, raw);
    Ok(Flow::Return(string))
}

/// `vector size`
pub fn vector_size(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let len = ctx.receiver_vector()?.len();
    Ok(Flow::Return(ctx.vm().integer(len as i64)))
}

/// `vector at: index`, `null` outside the bounds.
pub fn vector_at(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let elements = ctx.receiver_vector()?;
    let index = ctx.integer_arg(0)?;
    let element = usize::try_from(index)
        .ok()
        .and_then(|index| elements.get(index).copied())
        .and_then(Value::non_nil);
    Ok(Flow::Return(
        element.unwrap_or_else(|| ctx.vm().specials().null),
    ))
}

/// `internals bindingsOf: scope`: names bound by the nearest stack frame.
pub fn frame_bindings(ctx: &mut PrimitiveContext) -> Result<Flow, Exception> {
    let frame = ctx.stack_frame_arg(0)?;
    let heap = ctx.heap();
    let slots = heap.slots(frame);
    let names: Vec<_> = heap.elements(slots).into_iter().step_by(3).collect();
    Ok(Flow::Return(ctx.vm().vector_object(&names)))
}

#[cfg(test)]
mod tests {
    use crate::{ExceptionKind, Expr, HeapCreateInfo, VM, VMCreateInfo};

    fn vm() -> VM {
        VM::new(VMCreateInfo {
            heap: HeapCreateInfo { words: 1 << 17 },
        })
        .unwrap()
    }

    #[test]
    fn slots_are_read_and_written_through_sends() {
        let vm = vm();
        let proxy = vm.proxy();
        let name = proxy.intern("answer");
        let object = proxy.object(proxy.specials().null);
        proxy.add_slot(proxy.specials().lobby, "thing", object);

        let put = Expr::send(
            Expr::var("thing"),
            "at:put:",
            [Expr::Value(name), Expr::Integer(42)],
        );
        assert_eq!(proxy.evaluate_top(&put), object);
        let get = Expr::send(Expr::var("thing"), "at:", [Expr::Value(name)]);
        assert_eq!(proxy.integer_value(proxy.evaluate_top(&get)), Some(42));
        let read = Expr::send(Expr::var("thing"), "answer", []);
        assert_eq!(proxy.integer_value(proxy.evaluate_top(&read)), Some(42));
    }

    #[test]
    fn branches_run_one_block() {
        let vm = vm();
        let proxy = vm.proxy();
        let expr = |condition: Expr| {
            Expr::send(
                condition,
                "ifTrue:ifFalse:",
                [
                    Expr::block(&[], [Expr::Integer(1)]),
                    Expr::block(&[], [Expr::Integer(2)]),
                ],
            )
        };
        let yes = proxy.evaluate_top(&expr(Expr::var("true")));
        let no = proxy.evaluate_top(&expr(Expr::var("false")));
        assert_eq!(proxy.integer_value(yes), Some(1));
        assert_eq!(proxy.integer_value(no), Some(2));

        let skipped = Expr::send(
            Expr::var("false"),
            "ifTrue:",
            [Expr::block(&[], [Expr::Integer(1)])],
        );
        assert_eq!(proxy.evaluate_top(&skipped), proxy.specials().null);
    }

    #[test]
    fn strings_concatenate() {
        let vm = vm();
        let proxy = vm.proxy();
        let expr = Expr::send(Expr::Str("he".into()), ",", [Expr::Str("rald".into())]);
        let result = proxy.evaluate_top(&expr);
        assert_eq!(proxy.string_value(result).as_deref(), Some("herald"));

        let bad = Expr::send(Expr::Str("x".into()), ",", [Expr::Integer(1)]);
        let result = proxy.evaluate_top(&bad);
        assert_eq!(
            proxy.exception_kind(result),
            Some(ExceptionKind::StringExpected)
        );
    }

    #[test]
    fn vectors_answer_size_and_elements() {
        let vm = vm();
        let proxy = vm.proxy();
        let a = proxy.integer(10);
        let b = proxy.integer(20);
        let vector = proxy.vector_object(&[a, b]);
        proxy.add_slot(proxy.specials().lobby, "v", vector);

        let size = proxy.evaluate_top(&Expr::send(Expr::var("v"), "size", []));
        assert_eq!(proxy.integer_value(size), Some(2));
        let second = proxy.evaluate_top(&Expr::send(Expr::var("v"), "at:", [Expr::Integer(1)]));
        assert_eq!(second, b);
        let outside = proxy.evaluate_top(&Expr::send(Expr::var("v"), "at:", [Expr::Integer(9)]));
        assert_eq!(outside, proxy.specials().null);

        // The prototype itself wraps no vector.
        let proto_size = Expr::send(Expr::send(Expr::var("v"), "proto", []), "size", []);
        let result = proxy.evaluate_top(&proto_size);
        assert_eq!(
            proxy.exception_kind(result),
            Some(ExceptionKind::VectorExpected)
        );
    }

    #[test]
    fn frame_bindings_need_a_stack_frame() {
        let vm = vm();
        let proxy = vm.proxy();
        let lobby = proxy.specials().lobby;
        let body = Expr::send(Expr::var("internals"), "bindingsOf:", [Expr::Scope]);
        let method = proxy.method(&["x"], &[body], lobby);
        proxy.add_slot(lobby, "names:", method);

        let names = proxy.evaluate_top(&Expr::implicit("names:", [Expr::Integer(1)]));
        assert_eq!(
            proxy.heap.vector_elements(names),
            Some(vec![proxy.intern("self"), proxy.intern("x")])
        );

        let top = Expr::send(Expr::var("internals"), "bindingsOf:", [Expr::Scope]);
        let result = proxy.evaluate_top(&top);
        assert_eq!(
            proxy.exception_kind(result),
            Some(ExceptionKind::StackFrameExpected)
        );
    }
}
