/// Block type tag stored in bits 1..6 of the header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    Free = 0,
    Raw,
    Vector,
    Object,
    Integer,
    String,
    Primitive,
    Method,
    StackFrame,
    VectorObject,
    Environment,
    Continuation,
    Promise,
    Channel,
    Actor,
}

impl Tag {
    pub const COUNT: usize = Self::Actor as usize + 1;

    const ALL: [Tag; Self::COUNT] = [
        Tag::Free,
        Tag::Raw,
        Tag::Vector,
        Tag::Object,
        Tag::Integer,
        Tag::String,
        Tag::Primitive,
        Tag::Method,
        Tag::StackFrame,
        Tag::VectorObject,
        Tag::Environment,
        Tag::Continuation,
        Tag::Promise,
        Tag::Channel,
        Tag::Actor,
    ];

    #[inline]
    pub fn from_bits(bits: u8) -> Option<Self> {
        Self::ALL.get(bits as usize).copied()
    }

    /// Blocks laid out as `[proto, slots, hidden, dispatch]`.
    #[inline]
    pub const fn is_object(self) -> bool {
        matches!(
            self,
            Tag::Object
                | Tag::Integer
                | Tag::String
                | Tag::Primitive
                | Tag::Method
                | Tag::StackFrame
                | Tag::VectorObject
                | Tag::Environment
        )
    }
}

const MARK_BIT: u64 = 0b1;
const TAG_SHIFT: u32 = 1;
const TAG_MASK: u64 = 0b1_1111;
const GENERATION_SHIFT: u32 = 8;
const LENGTH_SHIFT: u32 = 32;

/// Packed first word of every block.
///
/// ```text
/// bit 0:       mark
/// bits 1..6:   tag
/// bits 8..24:  generation
/// bits 32..64: data length in words
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Header(u64);

impl Header {
    #[inline]
    pub fn new(tag: Tag, len: usize, generation: u16) -> Self {
        debug_assert!(len <= u32::MAX as usize);
        Self(
            ((len as u64) << LENGTH_SHIFT)
                | ((generation as u64) << GENERATION_SHIFT)
                | ((tag as u64) << TAG_SHIFT),
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
    pub fn tag(self) -> Tag {
        let bits = ((self.0 >> TAG_SHIFT) & TAG_MASK) as u8;
        Tag::from_bits(bits).unwrap_or(Tag::Free)
    }

    #[inline]
    pub const fn len(self) -> usize {
        (self.0 >> LENGTH_SHIFT) as usize
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub const fn generation(self) -> u16 {
        (self.0 >> GENERATION_SHIFT) as u16
    }

    #[inline]
    pub const fn is_marked(self) -> bool {
        self.0 & MARK_BIT != 0
    }

    #[inline]
    pub const fn marked(self) -> Self {
        Self(self.0 | MARK_BIT)
    }

    #[inline]
    pub const fn unmarked(self) -> Self {
        Self(self.0 & !MARK_BIT)
    }

    #[inline]
    pub fn with_tag(self, tag: Tag) -> Self {
        Self((self.0 & !(TAG_MASK << TAG_SHIFT)) | ((tag as u64) << TAG_SHIFT))
    }
}

impl core::fmt::Debug for Header {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Header")
            .field("tag", &self.tag())
            .field("len", &self.len())
            .field("generation", &self.generation())
            .field("marked", &self.is_marked())
            .finish()
    }
}
