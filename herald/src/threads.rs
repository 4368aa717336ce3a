use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

use crate::{Interpreter, VMProxy, Value};

/// One OS thread with a joinable completion flag.
pub struct NativeThread {
    handle: Mutex<Option<JoinHandle<()>>>,
    done: (Mutex<bool>, Condvar),
}

impl std::fmt::Debug for NativeThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeThread")
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

impl NativeThread {
    pub fn spawn<F>(f: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let jt = Arc::new(Self {
            handle: Mutex::new(None),
            done: (Mutex::new(false), Condvar::new()),
        });

        let jt2 = Arc::clone(&jt);
        let h = thread::spawn(move || {
            f();
            let (ref mx, ref cv) = jt2.done;
            *mx.lock() = true;
            cv.notify_all();
        });
        *jt.handle.lock() = Some(h);
        jt
    }

    pub fn is_done(&self) -> bool {
        *self.done.0.lock()
    }

    pub fn join_timeout(&self, dur: Duration) -> bool {
        let (ref mx, ref cv) = self.done;
        let mut done = mx.lock();
        if *done {
            return true;
        }
        let res = cv.wait_for(&mut done, dur);
        !res.timed_out() || *done
    }

    pub fn join(&self) {
        if let Some(h) = self.handle.lock().take() {
            let _ = h.join();
            return;
        }

        let (ref mx, ref cv) = self.done;
        let mut done = mx.lock();
        while !*done {
            cv.wait(&mut done);
        }
    }
}

impl VMProxy {
    /// Starts a logical thread whose first send is `values[0] selector
    /// values[1..]`, answering into `origin`.
    ///
    /// The continuation is built in this proxy's shelter and handed to the
    /// new thread's shelter before the OS thread starts, so it is rooted at
    /// every point in between.
    pub fn spawn_thread(
        &self,
        origin: Value,
        selector: Value,
        values: &[Value],
        env: Value,
        dynamic_env: Value,
    ) -> Arc<NativeThread> {
        let continuation = self
            .heap
            .allocate_send(origin, selector, values, env, dynamic_env);
        let proxy = self.create_proxy();
        proxy.heap.set_continuation(continuation);
        log::debug!("spawning thread for {}", self.symbol_text(selector));
        NativeThread::spawn(move || {
            let mut interpreter = Interpreter::new(proxy);
            interpreter.run();
            log::debug!("thread finished");
        })
    }

    /// Sends `target selector args` on a fresh thread and blocks for the
    /// result. An exception raised over there is raised again in
    /// `dynamic_env`, and the value its handler produces is returned.
    pub fn call(&self, dynamic_env: Value, target: Value, selector: &str, args: &[Value]) -> Value {
        self.scoped(|| {
            let promise = self.async_call(dynamic_env, target, selector, args);
            match self.resolve(promise) {
                Ok(value) => value,
                Err(exception) => self.reraise(dynamic_env, exception.0),
            }
        })
    }

    /// Like `call` but answers the promise of the result right away.
    pub fn async_call(
        &self,
        dynamic_env: Value,
        target: Value,
        selector: &str,
        args: &[Value],
    ) -> Value {
        self.scoped(|| {
            let selector = self.intern(selector);
            let promise = self.new_promise();
            let tunnel = self.tunnel_environment(dynamic_env);
            let mut values = Vec::with_capacity(1 + args.len());
            values.push(target);
            values.extend_from_slice(args);
            self.spawn_thread(promise, selector, &values, self.specials().lobby, tunnel);
            promise
        })
    }

    fn reraise(&self, dynamic_env: Value, exception: Value) -> Value {
        let promise = self.new_promise();
        self.spawn_thread(
            promise,
            self.selectors().raise,
            &[dynamic_env, exception],
            self.specials().lobby,
            dynamic_env,
        );
        self.wait(promise)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::{ExceptionKind, Expr, HeapCreateInfo, VM, VMCreateInfo};

    use super::*;

    #[test]
    fn join_waits_for_completion() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let t = NativeThread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            c.fetch_add(1, Ordering::SeqCst);
        });
        t.join();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(t.is_done());
        assert!(t.join_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn join_timeout_expires_for_long_work() {
        let t = NativeThread::spawn(|| thread::sleep(Duration::from_millis(200)));
        assert!(!t.join_timeout(Duration::from_millis(5)));
        t.join();
    }

    fn vm() -> VM {
        VM::new(VMCreateInfo {
            heap: HeapCreateInfo { words: 1 << 17 },
        })
        .unwrap()
    }

    #[test]
    fn call_returns_the_result() {
        let vm = vm();
        let proxy = vm.proxy();
        let env = proxy.specials().root_environment;
        let a = proxy.integer(40);
        let b = proxy.integer(2);
        let result = proxy.call(env, a, "+", &[b]);
        assert_eq!(proxy.integer_value(result), Some(42));
    }

    #[test]
    fn calls_shelter_only_their_result() {
        let vm = vm();
        let proxy = vm.proxy();
        let env = proxy.specials().root_environment;
        let a = proxy.integer(5);
        let sheltered = proxy.heap.sheltered();

        let result = proxy.call(env, a, "*", &[a]);
        assert_eq!(proxy.heap.sheltered(), sheltered + 1);
        let promise = proxy.async_call(env, a, "+", &[a]);
        assert_eq!(proxy.heap.sheltered(), sheltered + 2);

        proxy.heap.collect();
        assert_eq!(proxy.integer_value(result), Some(25));
        assert_eq!(proxy.integer_value(proxy.wait(promise)), Some(10));
    }

    #[test]
    fn exceptions_tunnel_back_to_the_caller() {
        let vm = vm();
        let proxy = vm.proxy();
        let root = proxy.specials().root_environment;
        let lobby = proxy.specials().lobby;

        // Without a handler the exception comes back as the value.
        let a = proxy.integer(1);
        let result = proxy.call(root, a, "frobnicate", &[]);
        assert_eq!(proxy.exception_kind(result), Some(ExceptionKind::NoMethod));

        // A handler in the caller's environment sees it.
        let env = proxy.child_environment(root);
        let handler = proxy.method(&["e"], &[Expr::Integer(-1)], lobby);
        proxy.add_slot(env, "raise:", handler);
        let result = proxy.call(env, a, "frobnicate", &[]);
        assert_eq!(proxy.integer_value(result), Some(-1));
    }
}
