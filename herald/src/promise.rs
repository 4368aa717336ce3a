//! Single-assignment futures.
//!
//! A promise is a one word block; NIL means unset. Every read and write of
//! that word goes through the VM monitor, so a waiter cannot miss the wake-up
//! of the fulfilling thread. Waiting on anything that is not a
//! promise returns it unchanged.

use crate::{Exception, Tag, VMProxy, Value};

impl VMProxy {
    pub fn new_promise(&self) -> Value {
        self.heap.allocate(1, Tag::Promise)
    }

    pub fn is_fulfilled(&self, promise: Value) -> bool {
        let _guard = self.shared.monitor.lock();
        !self.heap.get(promise, 0).is_nil()
    }

    /// Sets the value unless one is already present. First fulfillment wins.
    pub fn fulfill(&self, promise: Value, value: Value) -> bool {
        let value = value.non_nil().unwrap_or(self.specials().null);
        let _guard = self.shared.monitor.lock();
        if !self.heap.get(promise, 0).is_nil() {
            return false;
        }
        self.heap.set(promise, 0, value);
        self.shared.promise_signal.notify_all();
        true
    }

    /// Blocks until `value` is no longer an unset promise.
    ///
    /// The promise word is only read under the monitor, which orders the
    /// fulfiller's writes to the stored value before the waiter's reads.
    pub fn wait(&self, value: Value) -> Value {
        if self.heap.tag(value) != Some(Tag::Promise) {
            return value;
        }
        let mut guard = self.shared.monitor.lock();
        loop {
            let current = self.heap.get(value, 0);
            if !current.is_nil() {
                return current;
            }
            self.shared.promise_signal.wait(&mut guard);
        }
    }

    /// Waits, then turns a tunneled exception back into a raise.
    pub fn resolve(&self, value: Value) -> Result<Value, Exception> {
        let value = self.wait(value);
        match self.tunneled_exception(value) {
            Some(exception) => Err(Exception(exception)),
            None => Ok(value),
        }
    }

    /// Wraps an exception so the waiter of a promise re-raises it.
    pub fn tunnel(&self, exception: Value) -> Value {
        self.heap
            .allocate_object(Tag::Object, self.specials().tunneled, exception)
    }

    pub fn tunneled_exception(&self, value: Value) -> Option<Value> {
        (self.heap.tag(value) == Some(Tag::Object)
            && self.heap.proto(value) == self.specials().tunneled)
            .then(|| self.heap.hidden(value))
    }

    /// A dynamic scope below `parent` whose `raise:` tunnels to the waiter.
    pub fn tunnel_environment(&self, parent: Value) -> Value {
        let env = self.child_environment(parent);
        let raise = self.selectors().raise;
        self.heap.add_slot(
            env,
            raise,
            self.specials().tunnel_handler,
            self.specials().public_namespace,
            Value::NIL,
        );
        env
    }

    /// Fallback of the root environment: report, hand the exception to the
    /// nearest waiter as a value.
    pub fn unhandled(&self, continuation: Value, exception: Value) {
        log::warn!("unhandled exception: {}", self.describe(exception));
        if let Some(promise) = self.heap.enclosing_promise(continuation) {
            self.fulfill(promise, exception);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use crate::{HeapCreateInfo, VM, VMCreateInfo};

    use super::*;

    fn vm() -> VM {
        VM::new(VMCreateInfo {
            heap: HeapCreateInfo { words: 1 << 15 },
        })
        .unwrap()
    }

    #[test]
    fn first_fulfillment_wins() {
        let vm = vm();
        let proxy = vm.proxy();
        let promise = proxy.new_promise();
        let a = proxy.integer(1);
        let b = proxy.integer(2);
        assert!(proxy.fulfill(promise, a));
        assert!(!proxy.fulfill(promise, b));
        assert_eq!(proxy.wait(promise), a);
        assert_eq!(proxy.wait(promise), a);
    }

    #[test]
    fn waiting_on_a_plain_value_is_identity() {
        let vm = vm();
        let proxy = vm.proxy();
        let n = proxy.integer(5);
        assert_eq!(proxy.wait(n), n);
        assert_eq!(proxy.resolve(n), Ok(n));
    }

    #[test]
    fn waiter_wakes_on_fulfillment() {
        let vm = vm();
        let proxy = vm.proxy();
        let promise = proxy.new_promise();
        let value = proxy.integer(11);
        proxy.heap.pin(promise);

        let fulfiller = Arc::new(vm.proxy());
        let handle = {
            let fulfiller = fulfiller.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                fulfiller.fulfill(promise, value)
            })
        };
        assert_eq!(proxy.wait(promise), value);
        assert!(handle.join().unwrap());
    }

    #[test]
    fn values_built_by_the_fulfiller_are_complete() {
        let vm = vm();
        let proxy = vm.proxy();
        for n in 0..50 {
            let promise = proxy.new_promise();
            assert!(!proxy.is_fulfilled(promise));
            let text = format!("value {n}");
            let worker = vm.proxy();
            let handle = thread::spawn(move || {
                let value = worker.string(&text);
                worker.fulfill(promise, value)
            });
            let value = proxy.wait(promise);
            assert!(proxy.is_fulfilled(promise));
            assert_eq!(proxy.string_value(value), Some(format!("value {n}")));
            assert!(handle.join().unwrap());
            proxy.clear_shelter();
        }
    }

    #[test]
    fn tunneled_exceptions_resolve_to_errors() {
        let vm = vm();
        let proxy = vm.proxy();
        let exception = proxy.exception(crate::ExceptionKind::NoMethod, &[]);
        let promise = proxy.new_promise();
        proxy.fulfill(promise, proxy.tunnel(exception));
        assert_eq!(proxy.resolve(promise), Err(Exception(exception)));
    }
}
