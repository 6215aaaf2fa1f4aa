use crate::utils::ALIGNMENT;

/// Width of a boundary tag or a free-list link. Fixed at 8 bytes so the heap
/// layout does not depend on the host's pointer width.
pub(crate) const WORD: usize = 8;

/// Header plus footer.
pub(crate) const OVERHEAD: usize = 2 * WORD;

/// Smallest footprint a block can have: header, two links, footer.
pub(crate) const MIN_BLOCK_SIZE: usize = 4 * WORD;

const ALLOCATED: u64 = 0x1;

/// Offset value used in link words for "no block". Offset 0 always holds the
/// prologue, so no block header can live there.
const NIL: u64 = 0;

/// This is the structure of a block inside the heap. Every offset used by the
/// allocator is relative to the start of the heap source's memory.
///
/// ```text
///            +---------------------+ <------- BlockRef (header offset)
///            |   size | allocated  |          -> Header tag
/// Payload -> +---------------------+ <------+
///            |   next (free only)  |        |
///            +---------------------+        |
///            |   prev (free only)  |        | -> size bytes
///            +---------------------+        |
///            |        ...          |        |
///            +---------------------+ <------+
///            |   size | allocated  |          -> Footer tag
///            +---------------------+
/// ```
///
/// The size is always a multiple of [`ALIGNMENT`], so its lowest bit is free
/// to hold the allocation flag. Header and footer always carry the same tag;
/// the footer is what lets us step back to the previous block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Tag(u64);

impl Tag {
    /// Zero-size allocated tag used for the prologue and epilogue words.
    pub const SENTINEL: Self = Self::encode(0, true);

    pub const fn encode(size: usize, allocated: bool) -> Self {
        Self(size as u64 | allocated as u64)
    }

    #[inline]
    pub const fn size(self) -> usize {
        (self.0 & !ALLOCATED) as usize
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & ALLOCATED != 0
    }

    #[inline]
    pub const fn is_sentinel(self) -> bool {
        self.size() == 0
    }

    #[inline]
    pub fn read(mem: &[u8], at: usize) -> Self {
        Self(read_word(mem, at))
    }

    #[inline]
    pub fn write(self, mem: &mut [u8], at: usize) {
        write_word(mem, at, self.0);
    }
}

fn read_word(mem: &[u8], at: usize) -> u64 {
    let mut word = [0; WORD];
    word.copy_from_slice(&mem[at..at + WORD]);
    u64::from_ne_bytes(word)
}

fn write_word(mem: &mut [u8], at: usize, value: u64) {
    mem[at..at + WORD].copy_from_slice(&value.to_ne_bytes());
}

/// Offset of a block's header word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct BlockRef(usize);

impl BlockRef {
    #[inline]
    pub const fn new(header: usize) -> Self {
        Self(header)
    }

    #[inline]
    pub const fn from_payload(payload: Payload) -> Self {
        Self(payload.0 - WORD)
    }

    #[inline]
    pub const fn header(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn payload(self) -> Payload {
        Payload(self.0 + WORD)
    }

    /// Offset of the footer of a block with the given payload `size`.
    #[inline]
    pub const fn footer(self, size: usize) -> usize {
        self.0 + WORD + size
    }

    /// Header of whatever follows a block of payload `size` starting here.
    #[inline]
    pub const fn following(self, size: usize) -> Self {
        Self(self.0 + size + OVERHEAD)
    }

    #[inline]
    pub fn tag(self, mem: &[u8]) -> Tag {
        Tag::read(mem, self.0)
    }

    #[inline]
    pub fn size(self, mem: &[u8]) -> usize {
        self.tag(mem).size()
    }

    #[inline]
    pub fn is_free(self, mem: &[u8]) -> bool {
        !self.tag(mem).is_allocated()
    }

    /// Next block in address order, or `None` when this block is the last
    /// one before the epilogue.
    pub fn next(self, mem: &[u8]) -> Option<Self> {
        let next = self.following(self.size(mem));

        (!next.tag(mem).is_sentinel()).then_some(next)
    }

    /// Previous block in address order, found through its footer. `None`
    /// when the word right before this header is the prologue.
    pub fn prev(self, mem: &[u8]) -> Option<Self> {
        let footer = Tag::read(mem, self.0 - WORD);

        (!footer.is_sentinel()).then(|| Self(self.0 - footer.size() - OVERHEAD))
    }
}

/// Free-list linkage stored in the first two payload words of a free block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Links {
    pub next: Option<BlockRef>,
    pub prev: Option<BlockRef>,
}

impl Links {
    pub fn read(mem: &[u8], block: BlockRef) -> Self {
        Self {
            next: decode_link(read_word(mem, block.0 + WORD)),
            prev: decode_link(read_word(mem, block.0 + 2 * WORD)),
        }
    }

    pub fn write(self, mem: &mut [u8], block: BlockRef) {
        write_word(mem, block.0 + WORD, encode_link(self.next));
        write_word(mem, block.0 + 2 * WORD, encode_link(self.prev));
    }

    pub fn set_next(mem: &mut [u8], block: BlockRef, next: Option<BlockRef>) {
        write_word(mem, block.0 + WORD, encode_link(next));
    }

    pub fn set_prev(mem: &mut [u8], block: BlockRef, prev: Option<BlockRef>) {
        write_word(mem, block.0 + 2 * WORD, encode_link(prev));
    }
}

fn encode_link(link: Option<BlockRef>) -> u64 {
    link.map_or(NIL, |block| block.0 as u64)
}

fn decode_link(word: u64) -> Option<BlockRef> {
    (word != NIL).then_some(BlockRef(word as usize))
}

/// A decoded block. Only the free variant owns list links; an allocated
/// block's payload belongs to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Block {
    Free { size: usize, links: Links },
    Allocated { size: usize },
}

impl Block {
    pub fn read(mem: &[u8], at: BlockRef) -> Self {
        let tag = at.tag(mem);

        if tag.is_allocated() {
            Self::Allocated { size: tag.size() }
        } else {
            Self::Free {
                size: tag.size(),
                links: Links::read(mem, at),
            }
        }
    }

    /// Writes header and footer (and links, for free blocks) in one go.
    pub fn write(self, mem: &mut [u8], at: BlockRef) {
        let tag = match self {
            Self::Free { size, .. } => Tag::encode(size, false),
            Self::Allocated { size } => Tag::encode(size, true),
        };

        debug_assert_eq!(tag.size() % ALIGNMENT, 0, "block size must stay aligned");

        tag.write(mem, at.header());
        tag.write(mem, at.footer(tag.size()));

        if let Self::Free { links, .. } = self {
            links.write(mem, at);
        }
    }
}

/// Handle to an allocation: the offset of its payload inside the heap.
///
/// Payload offsets are always multiples of 16, and so is the heap's base
/// address, so the address behind a `Payload` is 16-byte aligned as well.
/// Use [`crate::Heap::payload`] or [`crate::Heap::as_ptr`] to reach the bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Payload(usize);

impl Payload {
    /// Rebuilds a handle from a raw offset. The heap validates handles it is
    /// given back, so a forged offset is ignored rather than trusted.
    pub const fn from_offset(offset: usize) -> Self {
        Self(offset)
    }

    pub const fn offset(self) -> usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips_size_and_flag() {
        let tag = Tag::encode(4064, false);
        assert_eq!(tag.size(), 4064);
        assert!(!tag.is_allocated());

        let tag = Tag::encode(32, true);
        assert_eq!(tag.size(), 32);
        assert!(tag.is_allocated());

        assert!(Tag::SENTINEL.is_sentinel());
        assert!(Tag::SENTINEL.is_allocated());
    }

    /// prologue | A(32, alloc) | B(16, free) | epilogue
    fn small_heap() -> Vec<u8> {
        let mut mem = vec![0; 8 + 48 + 32 + 8];
        Tag::SENTINEL.write(&mut mem, 0);
        Block::Allocated { size: 32 }.write(&mut mem, BlockRef::new(8));
        Block::Free { size: 16, links: Links::default() }.write(&mut mem, BlockRef::new(56));
        Tag::SENTINEL.write(&mut mem, 88);
        mem
    }

    #[test]
    fn header_and_footer_agree() {
        let mem = small_heap();

        assert_eq!(Tag::read(&mem, 8), Tag::read(&mem, 8 + WORD + 32));
        assert_eq!(Tag::read(&mem, 56), Tag::read(&mem, 56 + WORD + 16));
    }

    #[test]
    fn neighbors_stop_at_sentinels() {
        let mem = small_heap();
        let a = BlockRef::new(8);
        let b = BlockRef::new(56);

        assert_eq!(a.next(&mem), Some(b));
        assert_eq!(b.prev(&mem), Some(a));
        assert_eq!(a.prev(&mem), None);
        assert_eq!(b.next(&mem), None);

        assert!(!a.is_free(&mem));
        assert!(b.is_free(&mem));
    }

    #[test]
    fn free_blocks_carry_links() {
        let mut mem = small_heap();
        let a = BlockRef::new(8);
        let b = BlockRef::new(56);

        let links = Links { next: Some(a), prev: None };
        Block::Free { size: 16, links }.write(&mut mem, b);

        assert_eq!(Block::read(&mem, b), Block::Free { size: 16, links });
        assert_eq!(Block::read(&mem, a), Block::Allocated { size: 32 });
    }

    #[test]
    fn payload_sits_one_word_after_header() {
        let block = BlockRef::new(8);

        assert_eq!(block.payload().offset(), 16);
        assert_eq!(BlockRef::from_payload(block.payload()), block);
    }
}
