use crate::block::{BlockRef, Links};

/// Doubly linked list of free blocks.
///
/// The list doesn't own any memory of its own. The links of every node live
/// in the payload of the free block they describe, which is fine because a
/// free block's payload is not used by anybody else:
///
/// ```text
/// +--------+------------------------+--------+
/// | header | next | prev |   ...    | footer |
/// +--------+------------------------+--------+
///           <----- free payload ----->
/// ```
///
/// Inside the heap this looks something like this, where `head` is the most
/// recently inserted block:
///
/// ```text
///                       next                        next
///           +-----------------------------+ +----------------+
///           |                             v |                v
/// +------+--|---+-------+------+-------+--|---+-------+------+----------+
/// | pro  | Free | Alloc | Free | Alloc | Free | Alloc | Free | epilogue |
/// +------+------+-------+--|---+-------+------+-------+------+----------+
///                   head --+
/// ```
///
/// The list is not ordered by address or size, only by insertion: new blocks
/// are pushed at the head, so first-fit searches start with the most recently
/// freed (or most recently grown) block.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    head: Option<BlockRef>,
    len: usize,
}

impl FreeList {
    /// Creates a new empty list.
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub fn head(&self) -> Option<BlockRef> {
        self.head
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Pushes `block` at the head of the list.
    ///
    /// The block must already be tagged free; this only writes its links.
    pub fn insert(&mut self, mem: &mut [u8], block: BlockRef) {
        Links {
            next: self.head,
            prev: None,
        }
        .write(mem, block);

        if let Some(head) = self.head {
            Links::set_prev(mem, head, Some(block));
        }

        self.head = Some(block);
        self.len += 1;
    }

    /// Unlinks `block` using its own links, no search involved.
    ///
    /// The block must currently be in the list. Callers know that from the
    /// allocation bit: every free block is listed, no allocated block is.
    pub fn remove(&mut self, mem: &mut [u8], block: BlockRef) {
        let Links { next, prev } = Links::read(mem, block);

        match (prev, next) {
            (Some(prev), Some(next)) => {
                Links::set_next(mem, prev, Some(next));
                Links::set_prev(mem, next, Some(prev));
            }
            (None, Some(next)) => {
                debug_assert_eq!(self.head, Some(block), "unlinked block without prev is not the head");
                Links::set_prev(mem, next, None);
                self.head = Some(next);
            }
            (Some(prev), None) => {
                Links::set_next(mem, prev, None);
            }
            (None, None) => {
                debug_assert_eq!(self.head, Some(block), "sole free block is not the head");
                self.head = None;
            }
        }

        self.len -= 1;
    }

    /// Walks the list from the head.
    pub fn iter<'a>(&self, mem: &'a [u8]) -> Iter<'a> {
        Iter {
            mem,
            current: self.head,
            remaining: self.len,
        }
    }

    /// Returns the first block on the list with at least `size` payload
    /// bytes. No best-fit search: the first one that fits wins.
    pub fn first_fit(&self, mem: &[u8], size: usize) -> Option<BlockRef> {
        self.iter(mem).find(|block| block.size(mem) >= size)
    }
}

/// Iterator over the free list. It never yields more than the list's length,
/// so a corrupted cycle can't make it spin forever.
pub(crate) struct Iter<'a> {
    mem: &'a [u8],
    current: Option<BlockRef>,
    remaining: usize,
}

impl Iterator for Iter<'_> {
    type Item = BlockRef;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let block = self.current?;
        self.current = Links::read(self.mem, block).next;
        self.remaining -= 1;

        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, Tag};

    /// Lays out free blocks of the given sizes back to back (they are never
    /// coalesced here, the list doesn't care about addresses).
    fn heap_with(sizes: &[usize]) -> (Vec<u8>, Vec<BlockRef>) {
        let total: usize = sizes.iter().map(|size| size + 16).sum();
        let mut mem = vec![0; total + 16];
        let mut blocks = Vec::new();
        let mut at = BlockRef::new(8);

        Tag::SENTINEL.write(&mut mem, 0);
        for &size in sizes {
            Block::Free { size, links: Links::default() }.write(&mut mem, at);
            blocks.push(at);
            at = at.following(size);
        }
        Tag::SENTINEL.write(&mut mem, at.header());

        (mem, blocks)
    }

    fn listed(list: &FreeList, mem: &[u8]) -> Vec<BlockRef> {
        list.iter(mem).collect()
    }

    #[test]
    fn new_list_is_empty() {
        let list = FreeList::new();
        let mem = vec![0; 16];

        assert_eq!(list.len(), 0);
        assert!(list.iter(&mem).next().is_none());
    }

    #[test]
    fn insert_pushes_at_head() {
        let (mut mem, blocks) = heap_with(&[16, 32, 48]);
        let mut list = FreeList::new();

        for &block in &blocks {
            list.insert(&mut mem, block);
        }

        assert_eq!(list.head(), Some(blocks[2]));
        assert_eq!(listed(&list, &mem), vec![blocks[2], blocks[1], blocks[0]]);
    }

    #[test]
    fn remove_handles_every_position() {
        let (mut mem, blocks) = heap_with(&[16, 16, 16, 16]);
        let mut list = FreeList::new();
        for &block in &blocks {
            list.insert(&mut mem, block);
        }
        // head -> 3, 2, 1, 0

        // interior
        list.remove(&mut mem, blocks[2]);
        assert_eq!(listed(&list, &mem), vec![blocks[3], blocks[1], blocks[0]]);

        // tail
        list.remove(&mut mem, blocks[0]);
        assert_eq!(listed(&list, &mem), vec![blocks[3], blocks[1]]);

        // head
        list.remove(&mut mem, blocks[3]);
        assert_eq!(listed(&list, &mem), vec![blocks[1]]);
        assert_eq!(Links::read(&mem, blocks[1]), Links::default());

        // sole element
        list.remove(&mut mem, blocks[1]);
        assert_eq!(list.len(), 0);
        assert_eq!(list.head(), None);
    }

    #[test]
    fn list_can_be_refilled_after_emptying() {
        let (mut mem, blocks) = heap_with(&[16, 16]);
        let mut list = FreeList::new();

        list.insert(&mut mem, blocks[0]);
        list.remove(&mut mem, blocks[0]);
        list.insert(&mut mem, blocks[1]);
        list.insert(&mut mem, blocks[0]);

        assert_eq!(listed(&list, &mem), vec![blocks[0], blocks[1]]);
    }

    #[test]
    fn first_fit_takes_first_large_enough_block() {
        let (mut mem, blocks) = heap_with(&[64, 16, 48, 32]);
        let mut list = FreeList::new();
        for &block in &blocks {
            list.insert(&mut mem, block);
        }
        // head -> 32, 48, 16, 64

        assert_eq!(list.first_fit(&mem, 16), Some(blocks[3]));
        assert_eq!(list.first_fit(&mem, 48), Some(blocks[2]));
        assert_eq!(list.first_fit(&mem, 64), Some(blocks[0]));
        assert_eq!(list.first_fit(&mem, 80), None);
    }
}
