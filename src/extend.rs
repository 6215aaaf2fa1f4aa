use log::debug;
use snafu::OptionExt;

use crate::{
    block::{Block, BlockRef, Links, OVERHEAD, Tag, WORD},
    error::{AllocError, OutOfMemorySnafu, TooLargeSnafu},
    heap::Heap,
    source::HeapSource,
    utils::{ALIGNMENT, checked_align},
};

impl<S: HeapSource> Heap<S> {
    /// Grows the heap by `bytes` (rounded up to 16) and returns the free block
    /// covering the new space.
    ///
    /// The old epilogue becomes the header of the new block and a new
    /// epilogue is written in the last word of the grown region:
    ///
    /// ```text
    ///          old end                               new end
    ///             |                                     |
    /// ... | epi   |                 bytes               |
    /// ... | hdr   |       bytes - 16 (free)    | ftr    | epi |
    /// ```
    ///
    /// If the block before the old epilogue was free, both are merged and
    /// the merged block is returned instead.
    pub(crate) fn extend(&mut self, bytes: usize) -> Result<BlockRef, AllocError> {
        let bytes = checked_align(bytes, ALIGNMENT).context(TooLargeSnafu { size: bytes })?;

        debug_assert!(bytes >= OVERHEAD + 2 * WORD, "extension of {bytes} bytes can't hold a block");

        let old_end = self.source.size();
        let start = self.source.grow(bytes).context(OutOfMemorySnafu { bytes })?;

        debug_assert_eq!(start, old_end, "heap source is not contiguous");
        debug!("heap grew by {bytes} bytes to {}", self.source.size());

        let mem = self.source.memory_mut();
        let block = BlockRef::new(start - WORD);

        Tag::SENTINEL.write(mem, start + bytes - WORD);
        Block::Free {
            size: bytes - OVERHEAD,
            links: Links::default(),
        }
        .write(mem, block);

        Ok(self.coalesce(block))
    }
}
