//! Serialized message targets.
//!
//! A channel applies one message at a time to its target and makes every
//! sender wait for its own result. An actor queues messages in a mailbox,
//! answers each sender with a promise right away, and drains the mailbox in
//! order on a thread of its own.
//!
//! ```text
//! channel  [target, busy]
//! actor    [target, mailbox head, mailbox tail, draining]
//! cell     [message, next]
//! message  [promise, selector, arguments, env, dynamic env]
//! ```

use crate::{Interpreter, NativeThread, Step, Tag, VMProxy, Value};

const TARGET: usize = 0;
const BUSY: usize = 1;
const HEAD: usize = 1;
const TAIL: usize = 2;
const DRAINING: usize = 3;

impl VMProxy {
    pub fn new_channel(&self, target: Value) -> Value {
        let channel = self.heap.allocate(2, Tag::Channel);
        self.heap.set(channel, TARGET, target);
        channel
    }

    pub fn new_actor(&self, target: Value) -> Value {
        let actor = self.heap.allocate(4, Tag::Actor);
        self.heap.set(actor, TARGET, target);
        actor
    }

    /// Blocks until no other message is applied to `channel`, then claims it.
    fn acquire_channel(&self, channel: Value) {
        let mut guard = self.shared.monitor.lock();
        while self.heap.get_raw(channel, BUSY) != 0 {
            self.shared.channel_signal.wait(&mut guard);
        }
        self.heap.set_raw(channel, BUSY, 1);
    }

    fn release_channel(&self, channel: Value) {
        let _guard = self.shared.monitor.lock();
        self.heap.set_raw(channel, BUSY, 0);
        self.shared.channel_signal.notify_all();
    }

    /// Appends a message and reports whether a drainer has to be started.
    fn enqueue(&self, actor: Value, message: Value) -> bool {
        let cell = self.heap.allocate_vector(&[message, Value::NIL]);
        let _guard = self.shared.monitor.lock();
        let tail = self.heap.get(actor, TAIL);
        if tail.is_nil() {
            self.heap.set(actor, HEAD, cell);
        } else {
            self.heap.set(tail, 1, cell);
        }
        self.heap.set(actor, TAIL, cell);
        let idle = self.heap.get_raw(actor, DRAINING) == 0;
        if idle {
            self.heap.set_raw(actor, DRAINING, 1);
        }
        idle
    }

    /// Pops the oldest message, or marks the actor idle when there is none.
    fn dequeue(&self, actor: Value) -> Option<Value> {
        let _guard = self.shared.monitor.lock();
        let head = self.heap.get(actor, HEAD);
        if head.is_nil() {
            self.heap.set_raw(actor, DRAINING, 0);
            return None;
        }
        let message = self.heap.get(head, 0);
        // Rooted before it leaves the mailbox.
        self.heap.shelter(message);
        let next = self.heap.get(head, 1);
        self.heap.set(actor, HEAD, next);
        if next.is_nil() {
            self.heap.set(actor, TAIL, Value::NIL);
        }
        Some(message)
    }

    fn start_drainer(&self, actor: Value) {
        let proxy = self.create_proxy();
        proxy.heap.pin(actor);
        log::debug!("actor {actor:?} starts draining");
        NativeThread::spawn(move || {
            let mut interpreter = Interpreter::new(proxy);
            drain(&mut interpreter, actor);
        });
    }

    /// Number of messages waiting in an actor's mailbox.
    pub fn mailbox_len(&self, actor: Value) -> usize {
        let _guard = self.shared.monitor.lock();
        let mut len = 0;
        let mut cell = self.heap.get(actor, HEAD);
        while !cell.is_nil() {
            len += 1;
            cell = self.heap.get(cell, 1);
        }
        len
    }
}

fn drain(interpreter: &mut Interpreter, actor: Value) {
    while let Some(message) = interpreter.vm().dequeue(actor) {
        let vm = interpreter.vm();
        let heap = &vm.heap;
        let promise = heap.get(message, 0);
        let selector = heap.get(message, 1);
        let arguments = heap.get(message, 2);
        let env = heap.get(message, 3);
        let dynamic_env = heap.get(message, 4);

        let mut values = vec![heap.get(actor, TARGET)];
        values.extend(heap.elements(arguments));
        let tunnel = vm.tunnel_environment(dynamic_env);
        let continuation = heap.allocate_send(promise, selector, &values, env, tunnel);
        interpreter.run_from(continuation);
    }
    log::debug!("actor {actor:?} is idle");
}

impl Interpreter {
    /// Serialized send through a channel; blocks until the target answered.
    pub(crate) fn send_to_channel(&mut self, channel: Value) -> Step {
        let parts = self.parts();
        let vm = self.vm();
        let mut values = vm.heap.elements(parts.evaluated);
        values[0] = vm.heap.get(channel, TARGET);

        vm.acquire_channel(channel);
        let promise = vm.new_promise();
        let tunnel = vm.tunnel_environment(parts.dynamic_env);
        vm.spawn_thread(promise, parts.selector, &values, parts.env, tunnel);
        let result = vm.resolve(promise);
        vm.release_channel(channel);

        match result {
            Ok(value) => Step::Return(value),
            Err(exception) => Step::Raise(exception.0),
        }
    }

    /// Queues the send in the actor's mailbox and answers a promise of its
    /// result without waiting.
    pub(crate) fn send_to_actor(&mut self, actor: Value) -> Step {
        let parts = self.parts();
        let vm = self.vm();
        let promise = vm.new_promise();
        let evaluated = vm.heap.elements(parts.evaluated);
        let arguments = vm.heap.allocate_vector(&evaluated[1..]);
        let message = vm.heap.allocate_vector(&[
            promise,
            parts.selector,
            arguments,
            parts.env,
            parts.dynamic_env,
        ]);
        if vm.enqueue(actor, message) {
            vm.start_drainer(actor);
        }
        Step::Return(promise)
    }
}
