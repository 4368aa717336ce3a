use std::sync::Arc;

use parking_lot::{Condvar, Mutex, RwLock};

use crate::{
    ExceptionKind, Heap, HeapCreateInfo, HeapError, HeapProxy, PRIMITIVES, PrimitiveFunction,
    PrimitiveMessage, SymbolTable, Tag, Value, fatal,
};

#[derive(Debug, Clone, Default)]
pub struct VMCreateInfo {
    pub heap: HeapCreateInfo,
}

/// Well-known objects created at bootstrap, kept alive by the global root.
#[derive(Debug, Clone, Copy)]
pub struct SpecialObjects {
    /// Root of all prototype chains.
    pub null: Value,
    pub lobby: Value,
    pub internals: Value,
    pub code: Value,
    pub scope_code: Value,
    pub block_code: Value,
    pub async_code: Value,
    pub scope_node: Value,
    pub integer: Value,
    pub string: Value,
    pub symbol: Value,
    pub primitive: Value,
    pub method: Value,
    pub vector: Value,
    pub true_object: Value,
    pub false_object: Value,
    pub exception: Value,
    pub exceptions: [Value; ExceptionKind::COUNT],
    pub tunneled: Value,
    pub syntax_error: Value,
    /// Namespace slots are tagged with when nothing else is in effect.
    pub public_namespace: Value,
    /// Root dynamic environment, holds the default `raise:` handler.
    pub root_environment: Value,
    pub tunnel_handler: Value,
}

impl SpecialObjects {
    fn values(&self) -> Vec<Value> {
        let mut values = vec![
            self.null,
            self.lobby,
            self.internals,
            self.code,
            self.scope_code,
            self.block_code,
            self.async_code,
            self.scope_node,
            self.integer,
            self.string,
            self.symbol,
            self.primitive,
            self.method,
            self.vector,
            self.true_object,
            self.false_object,
            self.exception,
            self.tunneled,
            self.syntax_error,
            self.public_namespace,
            self.root_environment,
            self.tunnel_handler,
        ];
        values.extend_from_slice(&self.exceptions);
        values
    }

    pub fn exception_proto(&self, kind: ExceptionKind) -> Value {
        self.exceptions[kind as usize]
    }
}

/// Interned selectors the evaluator itself sends.
#[derive(Debug, Clone, Copy)]
pub struct Selectors {
    pub interpret: Value,
    pub method_body: Value,
    pub raise: Value,
    pub value: Value,
    pub self_name: Value,
}

pub struct VMShared {
    pub heap: Heap,
    pub symbols: Arc<SymbolTable>,
    pub specials: SpecialObjects,
    pub selectors: Selectors,
    primitives: RwLock<Vec<PrimitiveMessage<'static>>>,
    /// Guards promise values, channel busy flags and actor mailboxes.
    pub(crate) monitor: Mutex<()>,
    pub(crate) promise_signal: Condvar,
    pub(crate) channel_signal: Condvar,
}

impl std::fmt::Debug for VMShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VMShared")
            .field("heap", &self.heap)
            .field("symbols", &self.symbols.len())
            .finish_non_exhaustive()
    }
}

impl VMShared {
    pub fn primitive(&self, index: usize) -> Option<PrimitiveFunction> {
        self.primitives.read().get(index).map(|message| message.ptr)
    }

    pub fn primitive_index(&self, name: &str) -> Option<usize> {
        self.primitives
            .read()
            .iter()
            .position(|message| message.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct VM {
    inner: Arc<VMShared>,
}

#[derive(Debug)]
pub struct VMProxy {
    pub shared: Arc<VMShared>,
    pub heap: HeapProxy,
}

impl VM {
    pub fn new(info: VMCreateInfo) -> Result<Self, HeapError> {
        let heap = Heap::new(info.heap)?;
        let symbols = Arc::new(SymbolTable::new());
        heap.register_root_provider(symbols.clone());

        let primitives: Vec<_> = PRIMITIVES.to_vec();
        let (specials, selectors) = {
            let proxy = heap.proxy();
            let (specials, selectors) = Bootstrap::new(&proxy, &symbols, &primitives).run();
            let mut roots = specials.values();
            roots.extend([
                selectors.interpret,
                selectors.method_body,
                selectors.raise,
                selectors.value,
                selectors.self_name,
            ]);
            let root = proxy.allocate_vector(&roots);
            heap.set_global_root(root);
            (specials, selectors)
        };
        log::debug!("vm bootstrapped, {} symbols", symbols.len());

        Ok(Self {
            inner: Arc::new(VMShared {
                heap,
                symbols,
                specials,
                selectors,
                primitives: RwLock::new(primitives),
                monitor: Mutex::new(()),
                promise_signal: Condvar::new(),
                channel_signal: Condvar::new(),
            }),
        })
    }

    #[must_use]
    pub fn proxy(&self) -> VMProxy {
        VMProxy {
            shared: self.inner.clone(),
            heap: self.inner.heap.proxy(),
        }
    }

    pub fn shared(&self) -> &Arc<VMShared> {
        &self.inner
    }
}

impl VMProxy {
    /// A proxy with its own shelter, for use on another thread.
    #[must_use]
    pub fn create_proxy(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            heap: self.shared.heap.proxy(),
        }
    }

    #[inline]
    pub fn specials(&self) -> &SpecialObjects {
        &self.shared.specials
    }

    #[inline]
    pub fn selectors(&self) -> &Selectors {
        &self.shared.selectors
    }

    // ── constructors ──

    pub fn intern(&self, text: &str) -> Value {
        self.heap
            .intern(&self.shared.symbols, self.specials().symbol, text.as_bytes())
    }

    pub fn integer(&self, value: i64) -> Value {
        let raw = self.heap.allocate_raw(&[value as u64]);
        self.heap
            .allocate_object(Tag::Integer, self.specials().integer, raw)
    }

    pub fn string(&self, text: &str) -> Value {
        let bytes = self.heap.allocate_bytes(text.as_bytes());
        self.heap
            .allocate_object(Tag::String, self.specials().string, bytes)
    }

    pub fn boolean(&self, value: bool) -> Value {
        match value {
            true => self.specials().true_object,
            false => self.specials().false_object,
        }
    }

    pub fn vector(&self, elements: &[Value]) -> Value {
        self.heap.allocate_vector(elements)
    }

    /// An object wrapping a vector, answering to the vector protocol.
    pub fn vector_object(&self, elements: &[Value]) -> Value {
        let vector = self.heap.allocate_vector(elements);
        self.heap
            .allocate_object(Tag::VectorObject, self.specials().vector, vector)
    }

    /// A slotless plain object.
    pub fn object(&self, proto: Value) -> Value {
        self.heap.allocate_object(Tag::Object, proto, Value::NIL)
    }

    /// A dynamic environment below `parent` that tags new slots with
    /// `namespace` and cannot see slots tagged with any of `hidden`.
    pub fn environment(&self, parent: Value, namespace: Value, hidden: &[Value]) -> Value {
        let hidden = self.heap.allocate_vector(hidden);
        let info = self.heap.allocate_vector(&[namespace, hidden]);
        self.heap.allocate_object(Tag::Environment, parent, info)
    }

    /// A child scope sharing the namespace settings of `parent`.
    pub fn child_environment(&self, parent: Value) -> Value {
        let info = match self.heap.find_tagged(parent, Tag::Environment) {
            Some(env) => self.heap.hidden(env),
            None => Value::NIL,
        };
        self.heap.allocate_object(Tag::Environment, parent, info)
    }

    pub fn exception(&self, kind: ExceptionKind, details: &[Value]) -> Value {
        let details = self.heap.allocate_vector(details);
        self.heap
            .allocate_object(Tag::Object, self.specials().exception_proto(kind), details)
    }

    // ── slots ──

    pub fn add_slot(&self, object: Value, name: &str, value: Value) {
        let name = self.intern(name);
        self.heap.add_slot(
            object,
            name,
            value,
            self.specials().public_namespace,
            Value::NIL,
        );
    }

    pub fn add_slot_in(&self, object: Value, name: &str, value: Value, namespace: Value) {
        let name = self.intern(name);
        self.heap.add_slot(object, name, value, namespace, Value::NIL);
    }

    /// Visibility-filtered lookup as seen from `dynamic_env`.
    pub fn lookup(&self, object: Value, name: &str, dynamic_env: Value) -> Option<Value> {
        let name = self.intern(name);
        let hidden = self.heap.hidden_namespaces(dynamic_env);
        self.heap.lookup(object, name, hidden).value()
    }

    // ── inspection ──

    pub fn integer_value(&self, value: Value) -> Option<i64> {
        self.heap.integer_value(self.wait(value))
    }

    pub fn string_value(&self, value: Value) -> Option<String> {
        self.heap
            .string_bytes(self.wait(value))
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Classifies an exception object by walking its prototype chain.
    pub fn exception_kind(&self, value: Value) -> Option<ExceptionKind> {
        let mut current = value;
        while self.heap.is_object(current) {
            if let Some(position) = self
                .specials()
                .exceptions
                .iter()
                .position(|proto| *proto == current)
            {
                return Some(ExceptionKind::ALL[position]);
            }
            current = self.heap.proto(current);
        }
        None
    }

    /// Text of a symbol or string, for diagnostics.
    pub fn symbol_text(&self, value: Value) -> String {
        match self.heap.string_bytes(value) {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => format!("{value:?}"),
        }
    }

    /// Short human readable form of a value. Never blocks.
    pub fn describe(&self, value: Value) -> String {
        if let Some(kind) = self.exception_kind(value) {
            return format!("exception {}", kind.name());
        }
        if let Some(n) = self.heap.integer_value(value) {
            return n.to_string();
        }
        if let Some(bytes) = self.heap.string_bytes(value) {
            return format!("{:?}", String::from_utf8_lossy(&bytes));
        }
        match self.heap.tag(value) {
            Some(Tag::Promise) => "<promise>".to_owned(),
            Some(Tag::Channel) => "<channel>".to_owned(),
            Some(Tag::Actor) => "<actor>".to_owned(),
            _ => "<object>".to_owned(),
        }
    }

    pub fn is_exception(&self, value: Value) -> bool {
        let exception = self.specials().exception;
        let mut current = self.heap.proto(value);
        while self.heap.is_object(current) {
            if current == exception {
                return true;
            }
            current = self.heap.proto(current);
        }
        false
    }

    // ── primitives ──

    /// Makes `ptr` callable from the language and returns the primitive
    /// object to store in a slot.
    pub fn register_primitive(&self, name: &'static str, ptr: PrimitiveFunction) -> Value {
        let index = {
            let mut primitives = self.shared.primitives.write();
            match primitives.iter().position(|message| message.name == name) {
                Some(index) => {
                    primitives[index] = PrimitiveMessage::new(name, ptr);
                    index
                }
                None => {
                    primitives.push(PrimitiveMessage::new(name, ptr));
                    primitives.len() - 1
                }
            }
        };
        self.primitive_object(index)
    }

    /// The primitive object for an already registered name.
    pub fn primitive(&self, name: &str) -> Option<Value> {
        self.shared
            .primitive_index(name)
            .map(|index| self.primitive_object(index))
    }

    fn primitive_object(&self, index: usize) -> Value {
        let raw = self.heap.allocate_raw(&[index as u64]);
        self.heap
            .allocate_object(Tag::Primitive, self.specials().primitive, raw)
    }

    pub fn clear_shelter(&self) {
        self.heap.clear_shelter()
    }

    /// Runs `body`, then releases everything it sheltered except its result.
    pub fn scoped(&self, body: impl FnOnce() -> Value) -> Value {
        let mark = self.heap.shelter_mark();
        let result = body();
        self.heap.release_shelter(mark, result);
        result
    }
}

// ── bootstrap ─────────────────────────────────────────────────────────

struct Bootstrap<'a> {
    proxy: &'a HeapProxy,
    symbols: &'a SymbolTable,
    primitives: &'a [PrimitiveMessage<'static>],
    symbol_proto: Value,
    primitive_proto: Value,
    public: Value,
}

impl<'a> Bootstrap<'a> {
    fn new(
        proxy: &'a HeapProxy,
        symbols: &'a SymbolTable,
        primitives: &'a [PrimitiveMessage<'static>],
    ) -> Self {
        Self {
            proxy,
            symbols,
            primitives,
            symbol_proto: Value::NIL,
            primitive_proto: Value::NIL,
            public: Value::NIL,
        }
    }

    fn object(&self, proto: Value) -> Value {
        self.proxy.allocate_object(Tag::Object, proto, Value::NIL)
    }

    fn symbol(&self, text: &str) -> Value {
        self.proxy
            .intern(self.symbols, self.symbol_proto, text.as_bytes())
    }

    fn constant(&self, holder: Value, name: &str, value: Value) {
        let name = self.symbol(name);
        self.proxy
            .add_slot(holder, name, value, self.public, Value::NIL);
    }

    fn primitive(&self, name: &str) -> Value {
        let Some(index) = self.primitives.iter().position(|p| p.name == name) else {
            fatal(&format!("bootstrap refers to unknown primitive {name}"));
        };
        let raw = self.proxy.allocate_raw(&[index as u64]);
        self.proxy
            .allocate_object(Tag::Primitive, self.primitive_proto, raw)
    }

    fn install(&self, holder: Value, selector: &str, primitive: &str) {
        let primitive = self.primitive(primitive);
        self.constant(holder, selector, primitive);
    }

    fn run(mut self) -> (SpecialObjects, Selectors) {
        let proxy = self.proxy;
        let heap = &proxy.heap;
        let null = self.object(Value::NIL);
        let string = self.object(null);
        self.symbol_proto = self.object(string);
        self.primitive_proto = self.object(null);
        self.public = self.symbol("public");

        let exception = self.object(null);
        let exceptions = ExceptionKind::ALL.map(|kind| {
            let proto = self.object(exception);
            let name = self.symbol(kind.name());
            self.constant(proto, "name", name);
            proto
        });

        let public = self.public;
        let root_environment = {
            let hidden = heap.empty_vector();
            let info = self.proxy.allocate_vector(&[public, hidden]);
            self.proxy
                .allocate_object(Tag::Environment, null, info)
        };
        let code = self.object(null);
        let scope_code = self.object(null);

        let specials = SpecialObjects {
            null,
            lobby: self.object(null),
            internals: self.object(null),
            code,
            scope_code,
            block_code: self.object(null),
            async_code: self.object(null),
            scope_node: self.object(scope_code),
            integer: self.object(null),
            string,
            symbol: self.symbol_proto,
            primitive: self.primitive_proto,
            method: self.object(null),
            vector: self.object(null),
            true_object: self.object(null),
            false_object: self.object(null),
            exception,
            exceptions,
            tunneled: self.object(null),
            syntax_error: self.object(null),
            public_namespace: public,
            root_environment,
            tunnel_handler: self.primitive("tunnelHandler"),
        };

        heap.set_dispatch_method(null, self.primitive("dispatchRoot"));
        self.install(null, "interpret", "identity");
        self.install(null, "wait", "identity");
        self.install(null, "value", "identity");
        self.install(null, "==", "identical");
        self.install(null, "proto", "proto");
        self.install(null, "at:", "slotAt");
        self.install(null, "at:put:", "slotAtPut");
        self.install(null, "asChannel", "asChannel");
        self.install(null, "asActor", "asActor");

        self.install(specials.code, "interpret", "interpretCode");
        self.install(specials.scope_code, "interpret", "interpretScope");
        self.install(specials.block_code, "interpret", "interpretBlock");
        self.install(specials.async_code, "interpret", "interpretAsync");

        self.install(specials.internals, "methodBody", "methodBody");
        self.install(specials.internals, "newPromise", "newPromise");
        self.install(specials.internals, "fulfill:with:", "fulfillWith");

        self.install(specials.integer, "+", "integerAdd");
        self.install(specials.integer, "-", "integerSub");
        self.install(specials.integer, "*", "integerMul");
        self.install(specials.integer, "<", "integerLt");
        self.install(specials.integer, "=", "integerEq");

        self.install(specials.true_object, "ifTrue:ifFalse:", "trueBranch");
        self.install(specials.false_object, "ifTrue:ifFalse:", "falseBranch");
        self.install(specials.true_object, "ifTrue:", "trueIf");
        self.install(specials.false_object, "ifTrue:", "falseIf");

        self.install(specials.string, ",", "stringConcat");
        self.install(specials.vector, "size", "vectorSize");
        self.install(specials.vector, "at:", "vectorAt");
        self.install(specials.internals, "bindingsOf:", "frameBindings");

        for selector in ["value", "value:", "value:value:", "value:value:value:"] {
            self.install(specials.method, selector, "invokeBlock");
        }

        self.install(specials.exception, "raise", "raise");
        self.install(specials.root_environment, "raise:", "defaultHandler");

        let lobby = specials.lobby;
        self.constant(lobby, "lobby", lobby);
        self.constant(lobby, "internals", specials.internals);
        self.constant(lobby, "null", null);
        self.constant(lobby, "true", specials.true_object);
        self.constant(lobby, "false", specials.false_object);
        self.constant(lobby, "exception", exception);
        for (kind, proto) in ExceptionKind::ALL.iter().zip(exceptions) {
            self.constant(exception, kind.name(), proto);
        }

        let selectors = Selectors {
            interpret: self.symbol("interpret"),
            method_body: self.symbol("methodBody"),
            raise: self.symbol("raise:"),
            value: self.symbol("value"),
            self_name: self.symbol("self"),
        };
        (specials, selectors)
    }
}
