//! Suspended state of one in-progress message send.
//!
//! ```text
//! [0] origin        continuation to fold the result into, or a promise to fulfill
//! [1] selector      message being sent
//! [2] evaluated     vector of resolved values, receiver first
//! [3] unevaluated   vector of expression nodes, same order
//! [4] env           lexical scope expressions are evaluated in
//! [5] dynamic env   environment handlers and visibility are taken from
//! [6] receiver      evaluated[0] after promise resolution, NIL before
//! ```
//!
//! Continuations are never extended in place: folding a value into a
//! continuation produces a copy with a longer evaluated vector.

use crate::{HeapInner, HeapProxy, Tag, Value};

pub const ORIGIN: usize = 0;
pub const SELECTOR: usize = 1;
pub const EVALUATED: usize = 2;
pub const UNEVALUATED: usize = 3;
pub const ENV: usize = 4;
pub const DYNAMIC_ENV: usize = 5;
pub const RECEIVER: usize = 6;
pub const CONTINUATION_WORDS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationParts {
    pub origin: Value,
    pub selector: Value,
    pub evaluated: Value,
    pub unevaluated: Value,
    pub env: Value,
    pub dynamic_env: Value,
    pub receiver: Value,
}

impl HeapInner {
    pub fn continuation_parts(&self, continuation: Value) -> ContinuationParts {
        debug_assert_eq!(self.tag(continuation), Some(Tag::Continuation));
        ContinuationParts {
            origin: self.get(continuation, ORIGIN),
            selector: self.get(continuation, SELECTOR),
            evaluated: self.get(continuation, EVALUATED),
            unevaluated: self.get(continuation, UNEVALUATED),
            env: self.get(continuation, ENV),
            dynamic_env: self.get(continuation, DYNAMIC_ENV),
            receiver: self.get(continuation, RECEIVER),
        }
    }

    #[inline]
    pub fn origin(&self, continuation: Value) -> Value {
        self.get(continuation, ORIGIN)
    }

    /// Number of resolved positions and number of positions overall.
    pub fn progress(&self, continuation: Value) -> (usize, usize) {
        let evaluated = self.get(continuation, EVALUATED);
        let unevaluated = self.get(continuation, UNEVALUATED);
        (self.len(evaluated), self.len(unevaluated))
    }

    /// The first promise found by following origins outward.
    pub fn enclosing_promise(&self, continuation: Value) -> Option<Value> {
        let mut current = continuation;
        loop {
            match self.tag(current)? {
                Tag::Promise => return Some(current),
                Tag::Continuation => current = self.get(current, ORIGIN),
                _ => return None,
            }
        }
    }
}

impl HeapProxy {
    pub fn allocate_continuation(&self, parts: &ContinuationParts) -> Value {
        let continuation = self.allocate(CONTINUATION_WORDS, Tag::Continuation);
        self.heap.set(continuation, ORIGIN, parts.origin);
        self.heap.set(continuation, SELECTOR, parts.selector);
        self.heap.set(continuation, EVALUATED, parts.evaluated);
        self.heap.set(continuation, UNEVALUATED, parts.unevaluated);
        self.heap.set(continuation, ENV, parts.env);
        self.heap.set(continuation, DYNAMIC_ENV, parts.dynamic_env);
        self.heap.set(continuation, RECEIVER, parts.receiver);
        continuation
    }

    /// A send whose positions are all already values, ready for dispatch.
    pub fn allocate_send(
        &self,
        origin: Value,
        selector: Value,
        values: &[Value],
        env: Value,
        dynamic_env: Value,
    ) -> Value {
        let values = self.allocate_vector(values);
        self.allocate_continuation(&ContinuationParts {
            origin,
            selector,
            evaluated: values,
            unevaluated: values,
            env,
            dynamic_env,
            receiver: Value::NIL,
        })
    }

    /// Copy of `continuation` with `value` appended to its evaluated values.
    pub fn fold_result(&self, continuation: Value, value: Value) -> Value {
        let parts = self.heap.continuation_parts(continuation);
        let old = parts.evaluated;
        let len = self.heap.len(old);
        let evaluated = self.allocate(len + 1, Tag::Vector);
        for index in 0..len {
            self.heap.set(evaluated, index, self.heap.get(old, index));
        }
        self.heap.set(evaluated, len, value);
        self.allocate_continuation(&ContinuationParts {
            evaluated,
            ..parts
        })
    }
}
