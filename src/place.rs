use log::trace;

use crate::{
    block::{Block, BlockRef, Links, MIN_BLOCK_SIZE, OVERHEAD},
    heap::Heap,
    source::HeapSource,
};

impl<S: HeapSource> Heap<S> {
    /// Returns the first block on the free list that can hold `size` bytes.
    pub(crate) fn find_fit(&self, size: usize) -> Option<BlockRef> {
        self.free_list.first_fit(self.source.memory(), size)
    }

    /// Marks `size` bytes of the free `block` as allocated.
    ///
    /// If what is left over is big enough to be a block on its own the free
    /// block is split:
    ///
    /// ```text
    /// +--------+------------------------------------------+--------+
    /// | hdr    |                free_size                 | ftr    |
    /// +--------+------------------------------------------+--------+
    ///                             |
    ///                             v
    /// +--------+---------+--------+--------+--------------+--------+
    /// | hdr    |  size   | ftr    | hdr    |  remainder   | ftr    |
    /// +--------+---------+--------+--------+--------------+--------+
    ///  allocated                   free
    /// ```
    ///
    /// Otherwise the whole block is handed out and the slack stays inside it.
    pub(crate) fn place(&mut self, block: BlockRef, size: usize) {
        let mem = self.source.memory_mut();
        let free_size = block.size(mem);

        debug_assert!(block.is_free(mem), "placing into an allocated block");
        debug_assert!(free_size >= size, "placing {size} bytes into {free_size}");

        self.free_list.remove(mem, block);

        if free_size - size >= MIN_BLOCK_SIZE {
            let rest = block.following(size);
            let rest_size = free_size - size - OVERHEAD;

            trace!("split {block:?} into {size} allocated + {rest_size} free");

            Block::Allocated { size }.write(mem, block);
            Block::Free {
                size: rest_size,
                links: Links::default(),
            }
            .write(mem, rest);

            // The remainder may border another free block.
            self.coalesce(rest);
        } else {
            trace!("place {size} bytes in whole {block:?} of {free_size}");

            Block::Allocated { size: free_size }.write(mem, block);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Heap, HeapConfig, MemLib};

    #[test]
    fn large_free_block_is_split() {
        let mut heap = Heap::new(MemLib::default()).unwrap();

        let ptr = heap.allocate(100).unwrap().unwrap();

        assert_eq!(heap.capacity(ptr), Some(112));
        // 4064 - 112 - 16
        assert_eq!(heap.stats().free_bytes, 3936);
        assert_eq!(heap.free_list_len(), 1);
    }

    #[test]
    fn small_remainder_stays_inside_the_block() {
        let config = HeapConfig::new().initial_size(32 + 64);
        let mut heap = Heap::with_config(MemLib::default(), config).unwrap();

        // The only free block holds 64 bytes; 64 - 48 < 32 so no split.
        let ptr = heap.allocate(40).unwrap().unwrap();

        assert_eq!(heap.capacity(ptr), Some(64));
        assert_eq!(heap.free_list_len(), 0);
    }

    #[test]
    fn exact_minimum_remainder_is_split() {
        let config = HeapConfig::new().initial_size(32 + 64);
        let mut heap = Heap::with_config(MemLib::default(), config).unwrap();

        // 64 - 32 == 32: leaves a 16 byte free block.
        let ptr = heap.allocate(32).unwrap().unwrap();

        assert_eq!(heap.capacity(ptr), Some(32));
        assert_eq!(heap.free_list_len(), 1);
        assert_eq!(heap.stats().free_bytes, 16);
    }
}
