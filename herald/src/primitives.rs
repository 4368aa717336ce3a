use crate::{
    ContinuationParts, Exception, ExceptionKind, Flow, HeapProxy, Interpreter, Tag, VMProxy, Value,
};

mod concurrency;
mod error;
mod fixnum;
mod general;

pub type PrimitiveFunction = fn(&mut PrimitiveContext) -> Result<Flow, Exception>;

#[derive(Debug, Copy, Clone)]
pub struct PrimitiveMessage<'a> {
    pub name: &'a str,
    pub ptr: PrimitiveFunction,
}

impl<'a> PrimitiveMessage<'a> {
    pub const fn new(name: &'a str, ptr: PrimitiveFunction) -> Self {
        Self { name, ptr }
    }
}

/// What a primitive sees of the send that invoked it.
///
/// `holder` is the object of the receiver's chain the primitive was found on,
/// which differs from the receiver when it was inherited.
pub struct PrimitiveContext<'a> {
    pub interpreter: &'a mut Interpreter,
    pub holder: Value,
}

impl<'a> PrimitiveContext<'a> {
    pub fn new(interpreter: &'a mut Interpreter, holder: Value) -> Self {
        Self {
            interpreter,
            holder,
        }
    }

    #[inline]
    pub fn vm(&self) -> &VMProxy {
        self.interpreter.vm()
    }

    #[inline]
    pub fn heap(&self) -> &HeapProxy {
        &self.interpreter.vm().heap
    }

    #[inline]
    pub fn continuation(&self) -> Value {
        self.interpreter.continuation()
    }

    pub fn parts(&self) -> ContinuationParts {
        self.interpreter.parts()
    }

    /// The resolved receiver.
    pub fn receiver(&self) -> Value {
        self.parts().receiver
    }

    pub fn selector(&self) -> Value {
        self.parts().selector
    }

    /// Arguments as sent, promises included.
    pub fn arguments(&self) -> Vec<Value> {
        let mut evaluated = self.heap().elements(self.parts().evaluated);
        if !evaluated.is_empty() {
            evaluated.remove(0);
        }
        evaluated
    }

    /// The argument at `index` as sent, possibly an unresolved promise.
    pub fn arg(&self, index: usize) -> Result<Value, Exception> {
        let evaluated = self.parts().evaluated;
        if index + 1 >= self.heap().len(evaluated) {
            let index = self.vm().integer(index as i64);
            return Err(self.exception(ExceptionKind::MissingArgument, &[index]));
        }
        Ok(self.heap().get(evaluated, index + 1))
    }

    /// The argument at `index`, waiting for it if it is a promise.
    pub fn resolved_arg(&self, index: usize) -> Result<Value, Exception> {
        let value = self.arg(index)?;
        self.vm().resolve(value)
    }

    pub fn receiver_integer(&self) -> Result<i64, Exception> {
        let receiver = self.receiver();
        self.heap()
            .integer_value(receiver)
            .ok_or_else(|| self.exception(ExceptionKind::IntegerExpected, &[receiver]))
    }

    pub fn integer_arg(&self, index: usize) -> Result<i64, Exception> {
        let value = self.resolved_arg(index)?;
        self.heap()
            .integer_value(value)
            .ok_or_else(|| self.exception(ExceptionKind::IntegerExpected, &[value]))
    }

    pub fn string_arg(&self, index: usize) -> Result<Vec<u8>, Exception> {
        let value = self.resolved_arg(index)?;
        self.heap()
            .string_bytes(value)
            .ok_or_else(|| self.exception(ExceptionKind::StringExpected, &[value]))
    }

    pub fn receiver_vector(&self) -> Result<Vec<Value>, Exception> {
        let receiver = self.receiver();
        self.heap()
            .vector_elements(receiver)
            .ok_or_else(|| self.exception(ExceptionKind::VectorExpected, &[receiver]))
    }

    /// The stack frame at `index`, or the first one up its proto chain.
    pub fn stack_frame_arg(&self, index: usize) -> Result<Value, Exception> {
        let value = self.resolved_arg(index)?;
        self.heap()
            .find_tagged(value, Tag::StackFrame)
            .ok_or_else(|| self.exception(ExceptionKind::StackFrameExpected, &[value]))
    }

    pub fn exception(&self, kind: ExceptionKind, details: &[Value]) -> Exception {
        Exception(self.vm().exception(kind, details))
    }

    pub fn replace_continuation(&mut self, continuation: Value) {
        self.interpreter.set_continuation(continuation)
    }

    /// Replaces the current send with `target selector args` whose result
    /// goes to the same origin.
    pub fn tail_send(
        &mut self,
        target: Value,
        selector: Value,
        args: &[Value],
    ) -> Result<Flow, Exception> {
        let parts = self.parts();
        let mut values = Vec::with_capacity(1 + args.len());
        values.push(target);
        values.extend_from_slice(args);
        let next = self.heap().allocate_send(
            parts.origin,
            selector,
            &values,
            parts.env,
            parts.dynamic_env,
        );
        self.replace_continuation(next);
        Ok(Flow::Dispatch)
    }

    pub fn enter_method(
        &mut self,
        method: Value,
        receiver: Option<Value>,
        args: &[Value],
    ) -> Result<Flow, Exception> {
        self.interpreter.enter_method(method, receiver, args)
    }

    /// Acts on `found` as if the lookup of the current selector had found it
    /// on `holder`.
    pub fn apply(&mut self, holder: Value, found: Value) -> Result<Flow, Exception> {
        self.interpreter.apply(holder, found)
    }
}

pub const PRIMITIVES: &[PrimitiveMessage] = &[
    PrimitiveMessage::new("identity", general::identity),
    PrimitiveMessage::new("identical", general::identical),
    PrimitiveMessage::new("proto", general::proto),
    PrimitiveMessage::new("slotAt", general::slot_at),
    PrimitiveMessage::new("slotAtPut", general::slot_at_put),
    PrimitiveMessage::new("dispatchRoot", general::dispatch_root),
    PrimitiveMessage::new("interpretCode", general::interpret_code),
    PrimitiveMessage::new("interpretScope", general::interpret_scope),
    PrimitiveMessage::new("interpretBlock", general::interpret_block),
    PrimitiveMessage::new("methodBody", general::method_body),
    PrimitiveMessage::new("invokeBlock", general::invoke_block),
    PrimitiveMessage::new("trueBranch", general::true_branch),
    PrimitiveMessage::new("falseBranch", general::false_branch),
    PrimitiveMessage::new("trueIf", general::true_if),
    PrimitiveMessage::new("falseIf", general::false_if),
    PrimitiveMessage::new("stringConcat", general::string_concat),
    PrimitiveMessage::new("vectorSize", general::vector_size),
    PrimitiveMessage::new("vectorAt", general::vector_at),
    PrimitiveMessage::new("frameBindings", general::frame_bindings),
    PrimitiveMessage::new("integerAdd", fixnum::integer_add),
    PrimitiveMessage::new("integerSub", fixnum::integer_sub),
    PrimitiveMessage::new("integerMul", fixnum::integer_mul),
    PrimitiveMessage::new("integerLt", fixnum::integer_lt),
    PrimitiveMessage::new("integerEq", fixnum::integer_eq),
    PrimitiveMessage::new("raise", error::raise),
    PrimitiveMessage::new("defaultHandler", error::default_handler),
    PrimitiveMessage::new("tunnelHandler", error::tunnel_handler),
    PrimitiveMessage::new("interpretAsync", concurrency::interpret_async),
    PrimitiveMessage::new("newPromise", concurrency::new_promise),
    PrimitiveMessage::new("fulfillWith", concurrency::fulfill_with),
    PrimitiveMessage::new("asChannel", concurrency::as_channel),
    PrimitiveMessage::new("asActor", concurrency::as_actor),
];

pub fn primitive_index(name: &str) -> Option<usize> {
    PRIMITIVES.iter().position(|p| p.name == name)
}
