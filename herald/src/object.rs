//! Prototype objects on top of tagged blocks.
//!
//! ```text
//! [0] proto     parent in the delegation chain, NIL only for the root
//! [1] slots     vector of (name, value, namespace) triples
//! [2] hidden    payload that depends on the tag (raw data, method parts, ...)
//! [3] dispatch  optional dispatch method override
//! ```

use crate::{HeapInner, HeapProxy, Tag, Value};

pub const PROTO: usize = 0;
pub const SLOTS: usize = 1;
pub const HIDDEN: usize = 2;
pub const DISPATCH: usize = 3;
pub const OBJECT_WORDS: usize = 4;

const SLOT_NAME: usize = 0;
const SLOT_VALUE: usize = 1;
const SLOT_NAMESPACE: usize = 2;
const SLOT_WORDS: usize = 3;

/// What a looked up slot holds, as far as dispatch cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotContents {
    Constant(Value),
    Primitive(Value),
    Method(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupResult {
    None,
    Found { holder: Value, value: Value },
}

impl LookupResult {
    pub fn value(self) -> Option<Value> {
        match self {
            LookupResult::None => None,
            LookupResult::Found { value, .. } => Some(value),
        }
    }
}

impl HeapInner {
    #[inline]
    pub fn is_object(&self, value: Value) -> bool {
        self.tag(value).is_some_and(Tag::is_object)
    }

    #[inline]
    pub fn proto(&self, object: Value) -> Value {
        if !self.is_object(object) {
            return Value::NIL;
        }
        self.get(object, PROTO)
    }

    #[inline]
    pub fn slots(&self, object: Value) -> Value {
        self.get(object, SLOTS)
    }

    #[inline]
    pub fn hidden(&self, object: Value) -> Value {
        self.get(object, HIDDEN)
    }

    #[inline]
    pub fn dispatch_method(&self, object: Value) -> Value {
        if !self.is_object(object) {
            return Value::NIL;
        }
        self.get(object, DISPATCH)
    }

    #[inline]
    pub fn set_proto(&self, object: Value, proto: Value) {
        self.set(object, PROTO, proto)
    }

    #[inline]
    pub fn set_hidden(&self, object: Value, hidden: Value) {
        self.set(object, HIDDEN, hidden)
    }

    #[inline]
    pub fn set_dispatch_method(&self, object: Value, method: Value) {
        self.set(object, DISPATCH, method)
    }

    pub fn slot_count(&self, object: Value) -> usize {
        self.len(self.slots(object)) / SLOT_WORDS
    }

    /// A namespace is visible unless it is listed in `hidden_namespaces`.
    pub fn is_visible(&self, namespace: Value, hidden_namespaces: Value) -> bool {
        if namespace.is_nil() || hidden_namespaces.is_nil() {
            return true;
        }
        (0..self.len(hidden_namespaces)).all(|i| self.get(hidden_namespaces, i) != namespace)
    }

    fn find_slot(&self, object: Value, name: Value, hidden_namespaces: Value) -> Option<usize> {
        let slots = self.slots(object);
        (0..self.len(slots) / SLOT_WORDS)
            .map(|i| i * SLOT_WORDS)
            .find(|&base| {
                self.get(slots, base + SLOT_NAME) == name
                    && self.is_visible(self.get(slots, base + SLOT_NAMESPACE), hidden_namespaces)
            })
    }

    /// Looks at `object` itself only.
    pub fn shallow_lookup(
        &self,
        object: Value,
        name: Value,
        hidden_namespaces: Value,
    ) -> Option<Value> {
        if !self.is_object(object) {
            return None;
        }
        let slots = self.slots(object);
        self.find_slot(object, name, hidden_namespaces)
            .map(|base| self.get(slots, base + SLOT_VALUE))
    }

    /// Walks the proto chain and stops at the first visible match.
    pub fn lookup(&self, object: Value, name: Value, hidden_namespaces: Value) -> LookupResult {
        let mut current = object;
        while self.is_object(current) {
            if let Some(value) = self.shallow_lookup(current, name, hidden_namespaces) {
                return LookupResult::Found {
                    holder: current,
                    value,
                };
            }
            current = self.get(current, PROTO);
        }
        LookupResult::None
    }

    /// Overwrites a visible shallow slot. Returns `false` if there is none.
    pub fn set_slot(
        &self,
        object: Value,
        name: Value,
        value: Value,
        hidden_namespaces: Value,
    ) -> bool {
        match self.find_slot(object, name, hidden_namespaces) {
            Some(base) => {
                self.set(self.slots(object), base + SLOT_VALUE, value);
                true
            }
            None => false,
        }
    }

    pub fn classify(&self, value: Value) -> SlotContents {
        match self.tag(value) {
            Some(Tag::Primitive) => SlotContents::Primitive(value),
            Some(Tag::Method) => SlotContents::Method(value),
            _ => SlotContents::Constant(value),
        }
    }

    /// First object in the proto chain (the value itself included) carrying `tag`.
    pub fn find_tagged(&self, value: Value, tag: Tag) -> Option<Value> {
        let mut current = value;
        while self.is_object(current) {
            if self.header(current).tag() == tag {
                return Some(current);
            }
            current = self.get(current, PROTO);
        }
        None
    }

    pub fn integer_value(&self, value: Value) -> Option<i64> {
        let integer = self.find_tagged(value, Tag::Integer)?;
        let raw = self.hidden(integer).non_nil()?;
        Some(self.get_raw(raw, 0) as i64)
    }

    pub fn string_bytes(&self, value: Value) -> Option<Vec<u8>> {
        let string = self.find_tagged(value, Tag::String)?;
        let raw = self.hidden(string).non_nil()?;
        Some(self.bytes(raw))
    }

    /// Elements of a plain vector, or of the vector an object wraps.
    pub fn vector_elements(&self, value: Value) -> Option<Vec<Value>> {
        if self.tag(value) == Some(Tag::Vector) {
            return Some(self.elements(value));
        }
        let wrapper = self.find_tagged(value, Tag::VectorObject)?;
        let vector = self.hidden(wrapper);
        (self.tag(vector) == Some(Tag::Vector)).then(|| self.elements(vector))
    }

    /// Dynamic environments carry `[current namespace, hidden namespaces]`.
    pub fn current_namespace(&self, environment: Value) -> Value {
        match self.find_tagged(environment, Tag::Environment) {
            Some(env) => self.get(self.hidden(env), 0),
            None => Value::NIL,
        }
    }

    pub fn hidden_namespaces(&self, environment: Value) -> Value {
        match self.find_tagged(environment, Tag::Environment) {
            Some(env) => self.get(self.hidden(env), 1),
            None => Value::NIL,
        }
    }
}

impl HeapProxy {
    /// A slotless object.
    pub fn allocate_object(&self, tag: Tag, proto: Value, hidden: Value) -> Value {
        debug_assert!(tag.is_object());
        let object = self.allocate(OBJECT_WORDS, tag);
        self.heap.set(object, PROTO, proto);
        self.heap.set(object, SLOTS, self.heap.empty_vector());
        self.heap.set(object, HIDDEN, hidden);
        object
    }

    /// Overwrites `name` if it is shallowly present and visible, otherwise
    /// appends a new triple tagged with `namespace`.
    pub fn add_slot(
        &self,
        object: Value,
        name: Value,
        value: Value,
        namespace: Value,
        hidden_namespaces: Value,
    ) {
        if self.heap.set_slot(object, name, value, hidden_namespaces) {
            return;
        }
        let old = self.heap.slots(object);
        let old_len = self.heap.len(old);
        let slots = self.allocate(old_len + SLOT_WORDS, Tag::Vector);
        for index in 0..old_len {
            self.heap.set(slots, index, self.heap.get(old, index));
        }
        self.heap.set(slots, old_len + SLOT_NAME, name);
        self.heap.set(slots, old_len + SLOT_VALUE, value);
        self.heap.set(slots, old_len + SLOT_NAMESPACE, namespace);
        self.heap.set(object, SLOTS, slots);
    }
}
