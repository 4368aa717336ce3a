//! Continuation-based evaluator.
//!
//! A thread's whole state is its current continuation. Each step resolves at
//! most one message send and tells the driving loop what to do next, so the
//! host stack never grows with the depth of the evaluated program.

use crate::{
    ContinuationParts, Exception, ExceptionKind, PrimitiveContext, RECEIVER, SlotContents, Tag,
    VMProxy, Value, fatal,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Evaluate the next unevaluated position, or dispatch once all are done.
    Advance,
    /// Resolve the receiver and pick a branch by its kind.
    Dispatch,
    /// Look the selector up on the given object of the receiver's chain.
    Invoke(Value),
    /// The current send produced a value.
    Return(Value),
    /// Redirect to the dynamic environment's `raise:` handler.
    Raise(Value),
    Halt,
}

/// What a primitive asks the evaluator to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Return(Value),
    Advance,
    Dispatch,
    Halt,
}

impl From<Result<Flow, Exception>> for Step {
    fn from(result: Result<Flow, Exception>) -> Self {
        match result {
            Ok(Flow::Return(value)) => Step::Return(value),
            Ok(Flow::Advance) => Step::Advance,
            Ok(Flow::Dispatch) => Step::Dispatch,
            Ok(Flow::Halt) => Step::Halt,
            Err(Exception(exception)) => Step::Raise(exception),
        }
    }
}

#[derive(Debug)]
pub struct Interpreter {
    vm: VMProxy,
    continuation: Value,
}

impl Interpreter {
    /// Picks up the continuation already stored in the proxy's shelter.
    pub fn new(vm: VMProxy) -> Self {
        let continuation = vm.heap.continuation();
        Self { vm, continuation }
    }

    #[inline]
    pub fn vm(&self) -> &VMProxy {
        &self.vm
    }

    #[inline]
    pub fn continuation(&self) -> Value {
        self.continuation
    }

    /// Replaces the current continuation and the shelter root with it.
    pub fn set_continuation(&mut self, continuation: Value) {
        self.continuation = continuation;
        self.vm.heap.set_continuation(continuation);
    }

    pub fn parts(&self) -> ContinuationParts {
        self.vm.heap.continuation_parts(self.continuation)
    }

    /// Runs `continuation` until its thread ends.
    pub fn run_from(&mut self, continuation: Value) {
        self.set_continuation(continuation);
        self.run();
    }

    pub fn run(&mut self) {
        let mut step = Step::Advance;
        loop {
            step = match step {
                Step::Advance => self.advance(),
                Step::Dispatch => self.dispatch(),
                Step::Invoke(holder) => self.invoke(holder),
                Step::Return(value) => self.return_value(value),
                Step::Raise(exception) => self.raise(exception),
                Step::Halt => break,
            };
        }
        self.vm.heap.clear_shelter();
    }

    fn advance(&mut self) -> Step {
        let heap = &self.vm.heap;
        heap.clear_shelter();
        let parts = heap.continuation_parts(self.continuation);
        let evaluated = heap.len(parts.evaluated);
        if evaluated == heap.len(parts.unevaluated) {
            return Step::Dispatch;
        }

        let expression = heap.get(parts.unevaluated, evaluated);
        let next = heap.allocate_send(
            self.continuation,
            self.vm.selectors().interpret,
            &[expression],
            parts.env,
            parts.dynamic_env,
        );
        self.set_continuation(next);
        Step::Dispatch
    }

    fn dispatch(&mut self) -> Step {
        let parts = self.parts();
        let first = self.vm.heap.get(parts.evaluated, 0);
        let receiver = match self.vm.resolve(first) {
            Ok(receiver) if receiver.is_nil() => self.vm.specials().null,
            Ok(receiver) => receiver,
            Err(Exception(exception)) => return Step::Raise(exception),
        };
        self.vm.heap.set(self.continuation, RECEIVER, receiver);

        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "dispatch {} to {:?}",
                self.vm.symbol_text(parts.selector),
                receiver
            );
        }

        match self.vm.heap.tag(receiver) {
            Some(Tag::Actor) => self.send_to_actor(receiver),
            Some(Tag::Channel) => self.send_to_channel(receiver),
            _ => Step::Invoke(receiver),
        }
    }

    fn invoke(&mut self, holder: Value) -> Step {
        let heap = &self.vm.heap;
        let parts = heap.continuation_parts(self.continuation);
        let dispatch = heap.dispatch_method(holder);
        let found = if !dispatch.is_nil() {
            dispatch
        } else {
            let hidden = heap.hidden_namespaces(parts.dynamic_env);
            match heap.shallow_lookup(holder, parts.selector, hidden) {
                Some(value) => value,
                None => {
                    let proto = heap.proto(holder);
                    if proto.is_nil() {
                        return Step::Raise(self.no_method(parts));
                    }
                    return Step::Invoke(proto);
                }
            }
        };
        self.apply(holder, found).into()
    }

    fn no_method(&self, parts: ContinuationParts) -> Value {
        self.vm
            .exception(ExceptionKind::NoMethod, &[parts.receiver, parts.selector])
    }

    /// Acts on a value found for the current selector on `holder`.
    pub(crate) fn apply(&mut self, holder: Value, found: Value) -> Result<Flow, Exception> {
        // Stack frame bindings are variables, never invoked.
        if self.vm.heap.tag(holder) == Some(Tag::StackFrame) {
            return Ok(Flow::Return(found));
        }
        match self.vm.heap.classify(found) {
            SlotContents::Constant(value) => Ok(Flow::Return(value)),
            SlotContents::Primitive(primitive) => self.call_primitive(holder, primitive),
            SlotContents::Method(method) => {
                let parts = self.parts();
                let evaluated = self.vm.heap.elements(parts.evaluated);
                self.enter_method(method, Some(parts.receiver), &evaluated[1..])
            }
        }
    }

    fn call_primitive(&mut self, holder: Value, primitive: Value) -> Result<Flow, Exception> {
        let heap = &self.vm.heap;
        let index = heap.get_raw(heap.hidden(primitive), 0) as usize;
        let Some(ptr) = self.vm.shared.primitive(index) else {
            fatal(&format!("primitive #{index} is not registered"));
        };
        let mut ctx = PrimitiveContext::new(self, holder);
        ptr(&mut ctx)
    }

    /// Replaces the current send with the body of `method`.
    ///
    /// The body runs in a fresh stack frame below the method's lexical scope
    /// and a fresh dynamic scope below the caller's; its result goes straight
    /// to the caller's origin.
    pub(crate) fn enter_method(
        &mut self,
        method: Value,
        receiver: Option<Value>,
        arguments: &[Value],
    ) -> Result<Flow, Exception> {
        let vm = &self.vm;
        let heap = &vm.heap;
        let parts = heap.continuation_parts(self.continuation);
        let hidden = heap.hidden(method);
        let params = heap.get(hidden, 0);
        let body = heap.get(hidden, 1);
        let lexical = heap.get(hidden, 2);

        if heap.len(params) != arguments.len() {
            let supplied = vm.integer(arguments.len() as i64);
            return Err(Exception(
                vm.exception(ExceptionKind::BadArity, &[method, supplied]),
            ));
        }

        let mut bindings = Vec::with_capacity(3 * (arguments.len() + 1));
        if let Some(receiver) = receiver {
            bindings.extend([vm.selectors().self_name, receiver, Value::NIL]);
        }
        for (index, argument) in arguments.iter().enumerate() {
            bindings.extend([heap.get(params, index), *argument, Value::NIL]);
        }
        let slots = heap.allocate_vector(&bindings);
        let frame = heap.allocate_object(Tag::StackFrame, lexical, self.continuation);
        heap.set(frame, crate::SLOTS, slots);

        let dynamic_env = vm.child_environment(parts.dynamic_env);

        let internals = vm.specials().internals;
        let mut unevaluated = Vec::with_capacity(1 + heap.len(body));
        unevaluated.push(internals);
        unevaluated.extend(heap.elements(body));
        let unevaluated = heap.allocate_vector(&unevaluated);
        let evaluated = heap.allocate_vector(&[internals]);

        let next = heap.allocate_continuation(&ContinuationParts {
            origin: parts.origin,
            selector: vm.selectors().method_body,
            evaluated,
            unevaluated,
            env: frame,
            dynamic_env,
            receiver: Value::NIL,
        });
        self.set_continuation(next);
        Ok(Flow::Advance)
    }

    fn return_value(&mut self, value: Value) -> Step {
        let heap = &self.vm.heap;
        heap.shelter(value);
        let origin = heap.origin(self.continuation);
        match heap.tag(origin) {
            Some(Tag::Continuation) => {
                let next = heap.fold_result(origin, value);
                self.set_continuation(next);
                Step::Advance
            }
            Some(Tag::Promise) => {
                self.vm.fulfill(origin, value);
                Step::Halt
            }
            _ => Step::Halt,
        }
    }

    /// Sends `raise:` with the exception to the current dynamic environment
    /// in place of the faulting send.
    fn raise(&mut self, exception: Value) -> Step {
        let heap = &self.vm.heap;
        heap.shelter(exception);
        let parts = heap.continuation_parts(self.continuation);
        let raise = self.vm.selectors().raise;

        // A failing handler lookup would raise forever.
        if parts.selector == raise {
            self.vm.unhandled(self.continuation, exception);
            return Step::Halt;
        }

        let next = heap.allocate_send(
            parts.origin,
            raise,
            &[parts.dynamic_env, exception],
            parts.env,
            parts.dynamic_env,
        );
        self.set_continuation(next);
        Step::Dispatch
    }
}
