use std::collections::HashMap;

use parking_lot::RwLock;

use crate::{HeapProxy, RootProvider, Tag, Value};

/// Byte content to canonical symbol object.
///
/// Symbols are allocated outside of the table lock; when two threads race on
/// the same text the first insertion wins and the loser's candidate becomes
/// garbage.
#[derive(Debug, Default)]
pub struct SymbolTable {
    table: RwLock<HashMap<Box<[u8]>, Value>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bytes: &[u8]) -> Option<Value> {
        self.table.read().get(bytes).copied()
    }

    /// Returns the canonical symbol for `bytes`, registering `candidate` if
    /// there is none yet.
    pub fn get_or_insert(&self, bytes: &[u8], candidate: Value) -> Value {
        *self
            .table
            .write()
            .entry(bytes.into())
            .or_insert(candidate)
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RootProvider for SymbolTable {
    fn visit_roots(&self, visitor: &mut dyn FnMut(Value)) {
        for value in self.table.read().values() {
            visitor(*value);
        }
    }
}

impl HeapProxy {
    /// Canonical symbol for `bytes`, allocating a candidate on a miss.
    pub fn intern(&self, symbols: &SymbolTable, proto: Value, bytes: &[u8]) -> Value {
        if let Some(symbol) = symbols.get(bytes) {
            return symbol;
        }
        let raw = self.allocate_bytes(bytes);
        let candidate = self.allocate_object(Tag::String, proto, raw);
        symbols.get_or_insert(bytes, candidate)
    }
}
