//! Value: one machine word referring to a heap block, or NIL.
//!
//! ```text
//! bits 0..2    tag   (0b01 = reference, 0b00 = NIL)
//! bits 2..34   word offset of the block header inside the arena
//! bits 34..50  generation stamp of the block the handle was created for
//! ```
//!
//! Handles are generation-checked: a reference is only valid while the header
//! at its offset carries the same generation. Raw blocks store plain `u64`s and
//! never go through this type.
use std::fmt;

#[allow(unused)]
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueTag {
    Nil = 0b00,
    Reference = 0b01,
}

pub const VALUE_TAG_MASK: u64 = 0b11;

const OFFSET_SHIFT: u32 = 2;
const OFFSET_BITS: u32 = 32;
const GENERATION_SHIFT: u32 = OFFSET_SHIFT + OFFSET_BITS;
const OFFSET_MASK: u64 = (1 << OFFSET_BITS) - 1;

/// Largest arena (in words) a reference can address.
pub const MAX_ARENA_WORDS: usize = OFFSET_MASK as usize;

#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Value(u64);

impl Value {
    pub const NIL: Value = Value(0);

    #[inline]
    pub fn reference(offset: usize, generation: u16) -> Self {
        debug_assert!(offset <= MAX_ARENA_WORDS, "offset out of addressable range");
        Self(
            ((generation as u64) << GENERATION_SHIFT)
                | ((offset as u64) << OFFSET_SHIFT)
                | ValueTag::Reference as u64,
        )
    }

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_nil(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_reference(self) -> bool {
        self.0 & VALUE_TAG_MASK == ValueTag::Reference as u64
    }

    /// Word offset of the referenced block header.
    #[inline]
    pub const fn offset(self) -> usize {
        ((self.0 >> OFFSET_SHIFT) & OFFSET_MASK) as usize
    }

    #[inline]
    pub const fn generation(self) -> u16 {
        (self.0 >> GENERATION_SHIFT) as u16
    }

    /// Returns `None` for NIL so lookups can chain with `?`.
    #[inline]
    pub fn non_nil(self) -> Option<Self> {
        (!self.is_nil()).then_some(self)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            write!(f, "nil")
        } else if self.is_reference() {
            write!(f, "#<{}@{}>", self.offset(), self.generation())
        } else {
            write!(f, "#<raw {:#x}>", self.0)
        }
    }
}
