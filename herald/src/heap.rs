//! Single fixed-size arena of words.
//!
//! Every value lives in a tagged block: a three word header (packed header
//! word, `prev` link, `next` link) followed by the data words. Free blocks are
//! threaded through their link words into one circular free list, live blocks
//! are threaded through the same words into the collector's frontier while a
//! collection is running.
//!
//! The arena is an array of `AtomicU64` accessed with relaxed ordering:
//! concurrent slot writes race logically, never at the memory model level.
//! Allocation and collection are serialized by the heap lock.

use std::{
    collections::HashMap,
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};

use crate::{
    GarbageCollectionStats, Header, HeapError, MAX_ARENA_WORDS, RootProvider, Tag,
    Value, fatal,
};

pub const HEADER_WORDS: usize = 3;

const PREV: usize = 1;
const NEXT: usize = 2;

/// The permanently marked empty vector at offset 0.
pub(crate) const SENTINEL: usize = 0;
pub(crate) const FIRST_BLOCK: usize = SENTINEL + HEADER_WORDS;

/// Smallest arena that still leaves room for a handful of blocks.
pub const MIN_HEAP_WORDS: usize = 256;

// ── Settings ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HeapCreateInfo {
    /// Total size of the arena in words, including the sentinel block.
    pub words: usize,
}

impl Default for HeapCreateInfo {
    fn default() -> Self {
        Self { words: 1 << 20 }
    }
}

#[derive(Debug, Clone)]
pub struct HeapSettings {
    pub words: usize,
}

impl HeapSettings {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.words < MIN_HEAP_WORDS {
            return Err("arena must hold at least 256 words");
        }
        if self.words > MAX_ARENA_WORDS {
            return Err("arena exceeds the addressable range of a reference");
        }
        if self.words - FIRST_BLOCK - HEADER_WORDS > u32::MAX as usize {
            return Err("free block length does not fit a header");
        }
        Ok(())
    }
}

impl TryFrom<HeapCreateInfo> for HeapSettings {
    type Error = HeapError;

    fn try_from(info: HeapCreateInfo) -> Result<Self, Self::Error> {
        let settings = HeapSettings { words: info.words };
        settings.validate().map_err(HeapError::InvalidSettings)?;
        Ok(settings)
    }
}

// ── Shelters ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShelterId(u64);

/// Depth of a shelter's temporaries, see `HeapProxy::shelter_mark`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShelterMark(usize);

/// Per-thread root set: the current continuation, values allocated since the
/// last completed step, and values the thread keeps alive for its lifetime.
#[derive(Debug, Default)]
pub struct Shelter {
    pub continuation: Value,
    pub temporaries: Vec<Value>,
    pub pinned: Vec<Value>,
}

impl Shelter {
    pub(crate) fn visit_roots(&self, visitor: &mut dyn FnMut(Value)) {
        visitor(self.continuation);
        self.temporaries.iter().copied().for_each(&mut *visitor);
        self.pinned.iter().copied().for_each(visitor);
    }
}

/// Everything guarded by the heap lock.
#[derive(Debug)]
pub struct HeapState {
    /// Cursor into the circular free list, `None` when the list is empty.
    pub(crate) free: Option<usize>,
    /// Generation given to blocks carved during the current cycle.
    pub(crate) stamp: u16,
    pub(crate) collections: u64,
    pub(crate) global_root: Value,
    pub(crate) shelters: HashMap<ShelterId, Shelter>,
    next_shelter: u64,
    pub(crate) last_stats: Option<GarbageCollectionStats>,
}

// ── Heap ──────────────────────────────────────────────────────────────

pub struct HeapInner {
    words: Box<[AtomicU64]>,
    pub(crate) state: Mutex<HeapState>,
    pub(crate) providers: RwLock<Vec<Arc<dyn RootProvider>>>,
}

impl std::fmt::Debug for HeapInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapInner")
            .field("words", &self.words.len())
            .finish_non_exhaustive()
    }
}

impl HeapInner {
    fn new(settings: HeapSettings) -> Self {
        let words: Box<[AtomicU64]> =
            (0..settings.words).map(|_| AtomicU64::new(0)).collect();
        let heap = Self {
            words,
            state: Mutex::new(HeapState {
                free: Some(FIRST_BLOCK),
                stamp: 1,
                collections: 0,
                global_root: Value::NIL,
                shelters: HashMap::new(),
                next_shelter: 0,
                last_stats: None,
            }),
            providers: RwLock::new(Vec::new()),
        };

        heap.set_header_at(SENTINEL, Header::new(Tag::Vector, 0, 0).marked());
        heap.set_prev(SENTINEL, SENTINEL);
        heap.set_next(SENTINEL, SENTINEL);

        let len = settings.words - FIRST_BLOCK - HEADER_WORDS;
        heap.set_header_at(FIRST_BLOCK, Header::new(Tag::Free, len, 0));
        heap.set_prev(FIRST_BLOCK, FIRST_BLOCK);
        heap.set_next(FIRST_BLOCK, FIRST_BLOCK);
        heap
    }

    // ── raw word access ──

    #[inline]
    pub(crate) fn load(&self, index: usize) -> u64 {
        self.words[index].load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn store(&self, index: usize, raw: u64) {
        self.words[index].store(raw, Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn header_at(&self, offset: usize) -> Header {
        Header::from_raw(self.load(offset))
    }

    #[inline]
    pub(crate) fn set_header_at(&self, offset: usize, header: Header) {
        self.store(offset, header.raw())
    }

    #[inline]
    pub(crate) fn prev(&self, offset: usize) -> usize {
        self.load(offset + PREV) as usize
    }

    #[inline]
    pub(crate) fn next(&self, offset: usize) -> usize {
        self.load(offset + NEXT) as usize
    }

    #[inline]
    pub(crate) fn set_prev(&self, offset: usize, prev: usize) {
        self.store(offset + PREV, prev as u64)
    }

    #[inline]
    pub(crate) fn set_next(&self, offset: usize, next: usize) {
        self.store(offset + NEXT, next as u64)
    }

    /// Puts `block` into a circular list right before `anchor`.
    pub(crate) fn insert_before(&self, anchor: usize, block: usize) {
        let prev = self.prev(anchor);
        self.set_prev(block, prev);
        self.set_next(block, anchor);
        self.set_next(prev, block);
        self.set_prev(anchor, block);
    }

    pub(crate) fn unlink(&self, block: usize) {
        let prev = self.prev(block);
        let next = self.next(block);
        self.set_next(prev, next);
        self.set_prev(next, prev);
    }

    /// Lets `new` take the place of `old` inside its circular list.
    fn replace(&self, old: usize, new: usize) {
        if self.next(old) == old {
            self.set_prev(new, new);
            self.set_next(new, new);
        } else {
            let prev = self.prev(old);
            let next = self.next(old);
            self.set_prev(new, prev);
            self.set_next(new, next);
            self.set_next(prev, new);
            self.set_prev(next, new);
        }
    }

    // ── block access ──

    #[inline]
    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    /// Words available to blocks, headers included.
    #[inline]
    pub fn usable_words(&self) -> usize {
        self.words.len() - FIRST_BLOCK
    }

    /// The canonical empty vector.
    #[inline]
    pub fn empty_vector(&self) -> Value {
        Value::reference(SENTINEL, 0)
    }

    /// Whether `value` still refers to the block it was created for.
    pub fn is_live(&self, value: Value) -> bool {
        if !value.is_reference() || value.offset() + HEADER_WORDS > self.words.len() {
            return false;
        }
        let header = self.header_at(value.offset());
        header.tag() != Tag::Free
            && header.generation() == value.generation()
            && value.offset() + HEADER_WORDS + header.len() <= self.words.len()
    }

    #[inline]
    pub fn header(&self, value: Value) -> Header {
        debug_assert!(self.is_live(value), "stale or invalid handle {value:?}");
        self.header_at(value.offset())
    }

    /// Tag of a reference, `None` for NIL.
    #[inline]
    pub fn tag(&self, value: Value) -> Option<Tag> {
        value.is_reference().then(|| self.header(value).tag())
    }

    #[inline]
    pub fn len(&self, value: Value) -> usize {
        if value.is_nil() {
            return 0;
        }
        self.header(value).len()
    }

    #[inline]
    pub fn get(&self, value: Value, index: usize) -> Value {
        Value::from_raw(self.get_raw(value, index))
    }

    #[inline]
    pub fn set(&self, value: Value, index: usize, element: Value) {
        self.set_raw(value, index, element.raw())
    }

    #[inline]
    pub fn get_raw(&self, value: Value, index: usize) -> u64 {
        debug_assert!(index < self.len(value), "index {index} out of bounds");
        self.load(value.offset() + HEADER_WORDS + index)
    }

    #[inline]
    pub fn set_raw(&self, value: Value, index: usize, raw: u64) {
        debug_assert!(index < self.len(value), "index {index} out of bounds");
        self.store(value.offset() + HEADER_WORDS + index, raw)
    }

    /// Copies the data words of a vector into host memory.
    pub fn elements(&self, vector: Value) -> Vec<Value> {
        (0..self.len(vector)).map(|i| self.get(vector, i)).collect()
    }

    /// Reads the `[byte_len, packed bytes…]` payload of a raw block.
    pub fn bytes(&self, raw: Value) -> Vec<u8> {
        let byte_len = self.get_raw(raw, 0) as usize;
        let mut bytes = Vec::with_capacity(byte_len);
        for index in 0..byte_len.div_ceil(8) {
            bytes.extend_from_slice(&self.get_raw(raw, 1 + index).to_le_bytes());
        }
        bytes.truncate(byte_len);
        bytes
    }

    pub fn collections(&self) -> u64 {
        self.state.lock().collections
    }

    pub fn last_collection(&self) -> Option<GarbageCollectionStats> {
        self.state.lock().last_stats
    }

    pub fn global_root(&self) -> Value {
        self.state.lock().global_root
    }

    pub fn set_global_root(&self, root: Value) {
        self.state.lock().global_root = root;
    }

    pub fn register_root_provider(&self, provider: Arc<dyn RootProvider>) {
        self.providers.write().push(provider);
    }

    // ── allocation ──

    /// First fit over the circular free list, starting at the cursor.
    fn find_fit(&self, state: &mut HeapState, len: usize) -> Option<usize> {
        let start = state.free?;
        let mut current = start;
        loop {
            let capacity = self.header_at(current).len();
            let next = self.next(current);
            if capacity == len {
                if next == current {
                    state.free = None;
                } else {
                    self.unlink(current);
                    state.free = Some(next);
                }
                return Some(current);
            }
            if capacity >= len + HEADER_WORDS {
                let remainder = current + HEADER_WORDS + len;
                let remainder_len = capacity - len - HEADER_WORDS;
                self.set_header_at(remainder, Header::new(Tag::Free, remainder_len, 0));
                self.replace(current, remainder);
                state.free = Some(remainder);
                return Some(current);
            }
            current = next;
            if current == start {
                return None;
            }
        }
    }

    /// Carves a zeroed block of `len` data words, collecting once if the
    /// free list has no fit. Caller holds the heap lock.
    pub(crate) fn carve(
        &self,
        state: &mut HeapState,
        len: usize,
        tag: Tag,
    ) -> Result<Value, HeapError> {
        if len > u32::MAX as usize {
            return Err(HeapError::Exhausted { requested: len });
        }
        let offset = match self.find_fit(state, len) {
            Some(offset) => offset,
            None => {
                self.collect_locked(state);
                self.find_fit(state, len)
                    .ok_or(HeapError::Exhausted { requested: len })?
            }
        };
        self.set_header_at(offset, Header::new(tag, len, state.stamp));
        self.set_prev(offset, 0);
        self.set_next(offset, 0);
        let data = offset + HEADER_WORDS;
        for index in data..data + len {
            self.store(index, 0);
        }
        Ok(Value::reference(offset, state.stamp))
    }
}

#[derive(Debug, Clone)]
pub struct Heap(Arc<HeapInner>);

impl Heap {
    pub fn new(info: HeapCreateInfo) -> Result<Self, HeapError> {
        let settings = HeapSettings::try_from(info)?;
        Ok(Self(Arc::new(HeapInner::new(settings))))
    }

    #[must_use]
    pub fn proxy(&self) -> HeapProxy {
        HeapProxy::new(self.clone())
    }
}

impl Deref for Heap {
    type Target = HeapInner;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ── HeapProxy (per-thread allocation handle) ─────────────────────────

/// Allocation handle owned by one thread.
///
/// Each proxy owns a shelter in the heap state; every block it allocates is
/// linked into that shelter in the same critical section that carved it, so a
/// fresh block is never collectable before its first use. Dropping the proxy
/// releases the shelter.
#[derive(Debug)]
pub struct HeapProxy {
    pub heap: Heap,
    id: ShelterId,
}

impl HeapProxy {
    #[must_use]
    pub fn new(heap: Heap) -> Self {
        let id = {
            let mut state = heap.state.lock();
            let id = ShelterId(state.next_shelter);
            state.next_shelter += 1;
            state.shelters.insert(id, Shelter::default());
            id
        };
        Self { heap, id }
    }

    /// Allocates or terminates the process.
    pub fn allocate(&self, len: usize, tag: Tag) -> Value {
        match self.try_allocate(len, tag) {
            Ok(value) => value,
            Err(err) => fatal(&err.to_string()),
        }
    }

    pub fn try_allocate(&self, len: usize, tag: Tag) -> Result<Value, HeapError> {
        let mut state = self.heap.state.lock();
        let value = self.heap.carve(&mut state, len, tag)?;
        if let Some(shelter) = state.shelters.get_mut(&self.id) {
            shelter.temporaries.push(value);
        }
        Ok(value)
    }

    pub fn allocate_vector(&self, elements: &[Value]) -> Value {
        if elements.is_empty() {
            return self.heap.empty_vector();
        }
        let vector = self.allocate(elements.len(), Tag::Vector);
        for (index, element) in elements.iter().enumerate() {
            self.heap.set(vector, index, *element);
        }
        vector
    }

    pub fn allocate_raw(&self, words: &[u64]) -> Value {
        let raw = self.allocate(words.len(), Tag::Raw);
        for (index, word) in words.iter().enumerate() {
            self.heap.set_raw(raw, index, *word);
        }
        raw
    }

    /// Raw block holding `[byte_len, packed bytes…]`.
    pub fn allocate_bytes(&self, bytes: &[u8]) -> Value {
        let mut words = Vec::with_capacity(1 + bytes.len().div_ceil(8));
        words.push(bytes.len() as u64);
        for chunk in bytes.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            words.push(u64::from_le_bytes(word));
        }
        self.allocate_raw(&words)
    }

    /// Keeps `value` alive until the next `clear_shelter`.
    pub fn shelter(&self, value: Value) {
        if !value.is_reference() {
            return;
        }
        let mut state = self.heap.state.lock();
        if let Some(shelter) = state.shelters.get_mut(&self.id) {
            shelter.temporaries.push(value);
        }
    }

    pub fn clear_shelter(&self) {
        let mut state = self.heap.state.lock();
        if let Some(shelter) = state.shelters.get_mut(&self.id) {
            shelter.temporaries.clear();
        }
    }

    /// Position in the temporaries that `release_shelter` rolls back to.
    pub fn shelter_mark(&self) -> ShelterMark {
        let state = self.heap.state.lock();
        ShelterMark(
            state
                .shelters
                .get(&self.id)
                .map_or(0, |shelter| shelter.temporaries.len()),
        )
    }

    /// Drops every temporary sheltered since `mark` and shelters `keep` in
    /// the same critical section.
    pub fn release_shelter(&self, mark: ShelterMark, keep: Value) {
        let mut state = self.heap.state.lock();
        if let Some(shelter) = state.shelters.get_mut(&self.id) {
            shelter.temporaries.truncate(mark.0);
            if keep.is_reference() {
                shelter.temporaries.push(keep);
            }
        }
    }

    /// Keeps `value` alive for the lifetime of this proxy.
    pub fn pin(&self, value: Value) {
        let mut state = self.heap.state.lock();
        if let Some(shelter) = state.shelters.get_mut(&self.id) {
            shelter.pinned.push(value);
        }
    }

    pub fn continuation(&self) -> Value {
        let state = self.heap.state.lock();
        state
            .shelters
            .get(&self.id)
            .map_or(Value::NIL, |shelter| shelter.continuation)
    }

    pub fn set_continuation(&self, continuation: Value) {
        let mut state = self.heap.state.lock();
        if let Some(shelter) = state.shelters.get_mut(&self.id) {
            shelter.continuation = continuation;
        }
    }

    pub fn sheltered(&self) -> usize {
        let state = self.heap.state.lock();
        state
            .shelters
            .get(&self.id)
            .map_or(0, |shelter| shelter.temporaries.len())
    }

    /// Forces a full collection.
    pub fn collect(&self) -> GarbageCollectionStats {
        let mut state = self.heap.state.lock();
        self.heap.collect_locked(&mut state)
    }
}

impl Deref for HeapProxy {
    type Target = HeapInner;
    fn deref(&self) -> &Self::Target {
        &self.heap
    }
}

impl Drop for HeapProxy {
    fn drop(&mut self) {
        self.heap.state.lock().shelters.remove(&self.id);
    }
}
