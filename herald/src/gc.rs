//! Tri-color, non-moving mark and sweep.
//!
//! White blocks carry no mark bit. Marking a block sets its mark bit and
//! appends it to the frontier list hanging off the sentinel; everything
//! behind the scan cursor is black, everything ahead of it is gray. The sweep
//! walks the arena by address, clears marks on survivors and merges runs of
//! unmarked blocks into free blocks that form the next circular free list.

use crate::{FIRST_BLOCK, HEADER_WORDS, Header, HeapInner, HeapState, SENTINEL, Tag, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GarbageCollectionStats {
    pub cycle: u64,
    pub live_blocks: usize,
    /// Words held by live blocks, headers included.
    pub live_words: usize,
    pub free_blocks: usize,
    /// Words held by free blocks, headers included.
    pub free_words: usize,
}

impl HeapInner {
    fn mark(&self, value: Value) {
        if !self.is_live(value) {
            return;
        }
        let offset = value.offset();
        let header = self.header_at(offset);
        if header.is_marked() {
            return;
        }
        self.set_header_at(offset, header.marked());
        self.insert_before(SENTINEL, offset);
    }

    fn mark_roots(&self, state: &HeapState) {
        let mut mark = |value: Value| self.mark(value);
        mark(state.global_root);
        for provider in self.providers.read().iter() {
            provider.visit_roots(&mut mark);
        }
        for shelter in state.shelters.values() {
            shelter.visit_roots(&mut mark);
        }
    }

    fn trace(&self) {
        let mut cursor = self.next(SENTINEL);
        while cursor != SENTINEL {
            self.visit_edges(cursor, &mut |value: Value| self.mark(value));
            cursor = self.next(cursor);
        }
    }

    /// Rebuilds the free list from every unmarked run and clears the marks
    /// of the survivors.
    fn flip(&self, state: &mut HeapState) -> GarbageCollectionStats {
        let mut stats = GarbageCollectionStats {
            cycle: state.collections + 1,
            ..Default::default()
        };
        let mut head: Option<usize> = None;
        let end = self.capacity();
        let mut offset = FIRST_BLOCK;

        while offset < end {
            let header = self.header_at(offset);
            let size = HEADER_WORDS + header.len();
            if header.is_marked() {
                self.set_header_at(offset, header.unmarked());
                self.set_prev(offset, 0);
                self.set_next(offset, 0);
                stats.live_blocks += 1;
                stats.live_words += size;
                offset += size;
                continue;
            }

            let start = offset;
            offset += size;
            while offset < end {
                let header = self.header_at(offset);
                if header.is_marked() {
                    break;
                }
                offset += HEADER_WORDS + header.len();
            }

            let len = offset - start - HEADER_WORDS;
            self.set_header_at(start, Header::new(Tag::Free, len, 0));
            match head {
                None => {
                    self.set_prev(start, start);
                    self.set_next(start, start);
                    head = Some(start);
                }
                Some(head) => self.insert_before(head, start),
            }
            stats.free_blocks += 1;
            stats.free_words += offset - start;
        }

        self.set_prev(SENTINEL, SENTINEL);
        self.set_next(SENTINEL, SENTINEL);
        state.free = head;
        stats
    }

    /// Runs a full cycle. Caller holds the heap lock.
    pub(crate) fn collect_locked(&self, state: &mut HeapState) -> GarbageCollectionStats {
        self.set_prev(SENTINEL, SENTINEL);
        self.set_next(SENTINEL, SENTINEL);

        self.mark_roots(state);
        self.trace();
        let stats = self.flip(state);

        state.collections += 1;
        state.stamp = match state.stamp.wrapping_add(1) {
            0 => 1,
            stamp => stamp,
        };
        state.last_stats = Some(stats);
        log::debug!(
            "gc #{}: {} live blocks ({} words), {} free blocks ({} words)",
            stats.cycle,
            stats.live_blocks,
            stats.live_words,
            stats.free_blocks,
            stats.free_words
        );
        stats
    }

    /// Walks the arena and totals live and free blocks without collecting.
    pub fn census(&self) -> GarbageCollectionStats {
        let state = self.state.lock();
        let mut stats = GarbageCollectionStats {
            cycle: state.collections,
            ..Default::default()
        };
        let mut offset = FIRST_BLOCK;
        while offset < self.capacity() {
            let header = self.header_at(offset);
            let size = HEADER_WORDS + header.len();
            if header.tag() == Tag::Free {
                stats.free_blocks += 1;
                stats.free_words += size;
            } else {
                stats.live_blocks += 1;
                stats.live_words += size;
            }
            offset += size;
        }
        stats
    }
}
