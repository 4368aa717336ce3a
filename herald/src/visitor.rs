use crate::{Header, HeapInner, Tag, Value};

/// Consumers implement this to provide GC roots that live outside of
/// thread shelters and the global root (the symbol table, for example).
pub trait RootProvider: Send + Sync {
    fn visit_roots(&self, visitor: &mut dyn FnMut(Value));
}

pub trait Visitor {
    fn visit(&mut self, value: Value);
}

impl<F: FnMut(Value)> Visitor for F {
    #[inline]
    fn visit(&mut self, value: Value) {
        self(value)
    }
}

/// Number of leading data words of a block that may hold references.
///
/// Raw payloads are never scanned, the concurrency wrappers only expose
/// their target (and mailbox) to the collector.
#[inline]
pub fn traced_words(header: Header) -> usize {
    match header.tag() {
        Tag::Free | Tag::Raw => 0,
        Tag::Promise | Tag::Channel => header.len().min(1),
        Tag::Actor => header.len().min(3),
        _ => header.len(),
    }
}

impl HeapInner {
    /// Visits every reference edge of the block at `offset`.
    pub fn visit_edges(&self, offset: usize, visitor: &mut impl Visitor) {
        let header = self.header_at(offset);
        let data = offset + crate::HEADER_WORDS;
        for index in 0..traced_words(header) {
            let value = Value::from_raw(self.load(data + index));
            if value.is_reference() {
                visitor.visit(value);
            }
        }
    }
}
