use log::trace;

use crate::{
    block::{Block, BlockRef, Links, OVERHEAD},
    heap::Heap,
    source::HeapSource,
};

impl<S: HeapSource> Heap<S> {
    /// Merges the free `block` with its free neighbors and puts the result
    /// on the free list. `block` must be tagged free and not be listed yet.
    ///
    /// There are four cases depending on whether the previous and next
    /// blocks are free. The prologue and epilogue count as allocated, so we
    /// never merge past the edges of the heap:
    ///
    /// ```text
    /// prev   next      result
    /// alloc  alloc     [ block ]
    /// alloc  free      [ block + next ]
    /// free   alloc     [ prev + block ]
    /// free   free      [ prev + block + next ]
    /// ```
    ///
    /// Returns the block that ends up on the list.
    pub(crate) fn coalesce(&mut self, block: BlockRef) -> BlockRef {
        let mem = self.source.memory_mut();
        let size = block.size(mem);

        let prev = block.prev(mem).filter(|prev| prev.is_free(mem));
        let next = block.next(mem).filter(|next| next.is_free(mem));

        trace!(
            "coalesce {block:?}: prev free {}, next free {}",
            prev.is_some(),
            next.is_some()
        );

        let (start, size) = match (prev, next) {
            (None, None) => (block, size),
            (None, Some(next)) => {
                let next_size = next.size(mem);
                self.free_list.remove(mem, next);

                (block, size + next_size + OVERHEAD)
            }
            (Some(prev), None) => {
                let prev_size = prev.size(mem);
                self.free_list.remove(mem, prev);

                (prev, prev_size + size + OVERHEAD)
            }
            (Some(prev), Some(next)) => {
                let prev_size = prev.size(mem);
                let next_size = next.size(mem);
                self.free_list.remove(mem, prev);
                self.free_list.remove(mem, next);

                (prev, prev_size + size + next_size + 2 * OVERHEAD)
            }
        };

        Block::Free {
            size,
            links: Links::default(),
        }
        .write(mem, start);
        self.free_list.insert(mem, start);

        start
    }
}

#[cfg(test)]
mod tests {
    use crate::{Heap, MemLib, Payload};

    /// Fills the initial 4064 byte block exactly: three 1008 byte blocks
    /// and a last one that takes the remaining 992.
    fn four_blocks() -> (Heap, [Payload; 4]) {
        let mut heap = Heap::new(MemLib::default()).unwrap();
        let blocks = [
            heap.allocate(1008).unwrap().unwrap(),
            heap.allocate(1008).unwrap().unwrap(),
            heap.allocate(1008).unwrap().unwrap(),
            heap.allocate(992).unwrap().unwrap(),
        ];

        assert_eq!(heap.free_list_len(), 0);
        (heap, blocks)
    }

    fn free_sizes(heap: &Heap) -> Vec<usize> {
        heap.blocks()
            .filter(|info| !info.allocated)
            .map(|info| info.size)
            .collect()
    }

    #[test]
    fn no_free_neighbors() {
        let (mut heap, [_, b, _, _]) = four_blocks();

        heap.release(Some(b));

        assert_eq!(free_sizes(&heap), vec![1008]);
        assert_eq!(heap.free_list_len(), 1);
    }

    #[test]
    fn merges_with_next() {
        let (mut heap, [_, b, c, _]) = four_blocks();

        heap.release(Some(c));
        heap.release(Some(b));

        assert_eq!(free_sizes(&heap), vec![1008 * 2 + 16]);
        assert_eq!(heap.free_list_len(), 1);
    }

    #[test]
    fn merges_with_prev() {
        let (mut heap, [_, b, c, _]) = four_blocks();

        heap.release(Some(b));
        heap.release(Some(c));

        assert_eq!(free_sizes(&heap), vec![1008 * 2 + 16]);
        assert_eq!(heap.free_list_len(), 1);
    }

    #[test]
    fn merges_with_both() {
        let (mut heap, [a, b, c, d]) = four_blocks();

        heap.release(Some(a));
        heap.release(Some(c));
        assert_eq!(heap.free_list_len(), 2);

        heap.release(Some(b));
        assert_eq!(free_sizes(&heap), vec![1008 * 3 + 32]);
        assert_eq!(heap.free_list_len(), 1);

        heap.release(Some(d));
        assert_eq!(free_sizes(&heap), vec![4064]);
        assert!(heap.check_invariants("merges_with_both"));
    }
}
