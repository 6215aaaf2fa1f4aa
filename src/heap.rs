use log::{debug, trace, warn};
use snafu::{OptionExt, ensure};

use crate::{
    block::{Block, BlockRef, Links, MIN_BLOCK_SIZE, OVERHEAD, Payload, Tag, WORD},
    config::HeapConfig,
    error::{
        AllocError, InvalidPointerSnafu, MisalignedSourceSnafu, OutOfMemorySnafu, OverflowSnafu,
        TooLargeSnafu,
    },
    freelist::FreeList,
    memlib::MemLib,
    source::HeapSource,
    utils::{ALIGNMENT, checked_align},
};

/// A heap: one growable region plus the free list threaded through it.
///
/// All state lives in this value. Every operation takes `&mut self`, so a
/// heap has exactly one user at a time, and independent heaps never share
/// anything.
pub struct Heap<S: HeapSource = MemLib> {
    pub(crate) source: S,
    pub(crate) free_list: FreeList,
    pub(crate) config: HeapConfig,
    /// Offset of the prologue word.
    pub(crate) prologue: usize,
}

impl<S: HeapSource> Heap<S> {
    /// Creates a heap with the default [`HeapConfig`].
    pub fn new(source: S) -> Result<Self, AllocError> {
        Self::with_config(source, HeapConfig::default())
    }

    /// Grows `source` by `config.initial_size` bytes and lays out the
    /// prologue, one free block spanning the rest, and the epilogue.
    pub fn with_config(mut source: S, config: HeapConfig) -> Result<Self, AllocError> {
        config.validate()?;

        // A source that was grown before must have stopped on a 16 byte boundary.
        ensure!(
            source.size() % ALIGNMENT == 0,
            MisalignedSourceSnafu { offset: source.size() }
        );

        let bytes = config.initial_size;
        let prologue = source.grow(bytes).context(OutOfMemorySnafu { bytes })?;

        let base = source.memory().as_ptr() as usize;
        ensure!(
            base % ALIGNMENT == 0 && prologue % ALIGNMENT == 0,
            MisalignedSourceSnafu { offset: base.wrapping_add(prologue) % ALIGNMENT }
        );

        let mut heap = Self {
            source,
            free_list: FreeList::new(),
            config,
            prologue,
        };

        let mem = heap.source.memory_mut();
        let block = BlockRef::new(prologue + WORD);

        Tag::SENTINEL.write(mem, prologue);
        Block::Free {
            size: bytes - 2 * OVERHEAD,
            links: Links::default(),
        }
        .write(mem, block);
        Tag::SENTINEL.write(mem, prologue + bytes - WORD);
        heap.free_list.insert(mem, block);

        debug!("heap initialized with {bytes} bytes");
        heap.audit("init");

        Ok(heap)
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Allocates at least `size` bytes and returns a handle to the payload.
    ///
    /// A zero byte request is not an error and returns `Ok(None)`. The only
    /// failure at runtime is the heap source refusing to grow.
    pub fn allocate(&mut self, size: usize) -> Result<Option<Payload>, AllocError> {
        if size == 0 {
            return Ok(None);
        }

        let block = self.allocate_block(size)?;
        self.audit("allocate");

        Ok(Some(block.payload()))
    }

    fn allocate_block(&mut self, requested: usize) -> Result<BlockRef, AllocError> {
        let size = checked_align(requested, ALIGNMENT).context(TooLargeSnafu { size: requested })?;

        let block = match self.find_fit(size) {
            Some(block) => block,
            None => {
                let needed = size
                    .checked_add(OVERHEAD)
                    .context(TooLargeSnafu { size: requested })?;

                self.extend(needed.max(self.config.chunk_size))?
            }
        };

        self.place(block, size);

        Ok(block)
    }

    /// Frees the block behind `ptr`. `None` is a no-op.
    ///
    /// Releasing a block that is already free, or a handle that doesn't name
    /// a block of this heap, is ignored.
    pub fn release(&mut self, ptr: Option<Payload>) {
        let Some(ptr) = ptr else {
            return;
        };

        let Some(block) = self.block_of(ptr) else {
            warn!("ignoring release of {ptr:?}: not a block of this heap");
            return;
        };

        match Block::read(self.source.memory(), block) {
            Block::Free { .. } => {
                warn!("ignoring release of {ptr:?}: block is already free");
            }
            Block::Allocated { .. } => {
                self.free_block(block);
                self.audit("release");
            }
        }
    }

    fn free_block(&mut self, block: BlockRef) {
        let mem = self.source.memory_mut();
        let size = block.size(mem);

        Block::Free {
            size,
            links: Links::default(),
        }
        .write(mem, block);

        self.coalesce(block);
    }

    /// Changes the size of the allocation behind `ptr`.
    ///
    /// - `ptr == None` behaves like [`Heap::allocate`].
    /// - `size == 0` releases `ptr` and returns `Ok(None)`.
    /// - If the block already holds `size` bytes the same handle comes back;
    ///   blocks are never shrunk in place.
    /// - Otherwise the contents move to a new block and the old one is
    ///   released. If that allocation fails the old block is left as it was.
    pub fn resize(&mut self, ptr: Option<Payload>, size: usize) -> Result<Option<Payload>, AllocError> {
        let Some(ptr) = ptr else {
            return self.allocate(size);
        };

        if size == 0 {
            self.release(Some(ptr));
            return Ok(None);
        }

        let block = self
            .block_of(ptr)
            .filter(|block| !block.is_free(self.source.memory()))
            .context(InvalidPointerSnafu { offset: ptr.offset() })?;

        let capacity = block.size(self.source.memory());
        let needed = checked_align(size, ALIGNMENT).context(TooLargeSnafu { size })?;

        if capacity >= needed {
            trace!("resize of {ptr:?} to {size} fits in place");
            return Ok(Some(ptr));
        }

        let moved = self.allocate_block(size)?;
        let len = capacity.min(size);
        let from = ptr.offset();

        self.source
            .memory_mut()
            .copy_within(from..from + len, moved.payload().offset());
        self.free_block(block);
        self.audit("resize");

        Ok(Some(moved.payload()))
    }

    /// Allocates room for `count` elements of `size` bytes and zeroes it.
    pub fn zero_allocate(&mut self, count: usize, size: usize) -> Result<Option<Payload>, AllocError> {
        let bytes = count.checked_mul(size).context(OverflowSnafu { count, size })?;

        let ptr = self.allocate(bytes)?;

        if let Some(ptr) = ptr {
            let start = ptr.offset();
            self.source.memory_mut()[start..start + bytes].fill(0);
        }

        Ok(ptr)
    }

    /// Usable bytes of the block behind `ptr`, or `None` if `ptr` doesn't
    /// name an allocated block.
    pub fn capacity(&self, ptr: Payload) -> Option<usize> {
        let mem = self.source.memory();

        self.block_of(ptr)
            .filter(|block| !block.is_free(mem))
            .map(|block| block.size(mem))
    }

    /// The payload bytes of an allocated block (its full capacity).
    pub fn payload(&self, ptr: Payload) -> Option<&[u8]> {
        let size = self.capacity(ptr)?;
        let start = ptr.offset();

        Some(&self.source.memory()[start..start + size])
    }

    pub fn payload_mut(&mut self, ptr: Payload) -> Option<&mut [u8]> {
        let size = self.capacity(ptr)?;
        let start = ptr.offset();

        Some(&mut self.source.memory_mut()[start..start + size])
    }

    /// Address of the payload. Only valid until the heap is dropped.
    pub fn as_ptr(&self, ptr: Payload) -> *const u8 {
        self.source.memory().as_ptr().wrapping_add(ptr.offset())
    }

    /// Lowest address of the heap.
    pub fn heap_lo(&self) -> *const u8 {
        self.source.memory().as_ptr()
    }

    /// One past the highest address of the heap.
    pub fn heap_hi(&self) -> *const u8 {
        self.source.memory().as_ptr_range().end
    }

    pub fn heap_size(&self) -> usize {
        self.source.size()
    }

    pub fn free_list_len(&self) -> usize {
        self.free_list.len()
    }

    /// Maps a payload handle to its block after checking that the handle is
    /// aligned, lies inside the heap, and points at a header whose footer
    /// agrees with it. Arbitrary offsets are rejected instead of trusted.
    pub(crate) fn block_of(&self, ptr: Payload) -> Option<BlockRef> {
        let mem = self.source.memory();
        let offset = ptr.offset();

        ensure_some(offset % ALIGNMENT == 0 && offset >= self.prologue + 2 * WORD)?;

        let block = BlockRef::from_payload(ptr);
        // The smallest block still needs its footer and the epilogue after it.
        ensure_some(block.header().checked_add(MIN_BLOCK_SIZE + WORD)? <= mem.len())?;

        let tag = block.tag(mem);
        let footer = block.header().checked_add(WORD + tag.size())?;
        ensure_some(!tag.is_sentinel() && footer.checked_add(2 * WORD)? <= mem.len())?;
        ensure_some(Tag::read(mem, footer) == tag)?;

        Some(block)
    }

    /// With the `heap-check` feature every public operation ends here.
    #[inline]
    pub(crate) fn audit(&self, context: &str) {
        #[cfg(feature = "heap-check")]
        assert!(self.check_invariants(context), "heap invariants broken after {context}");

        #[cfg(not(feature = "heap-check"))]
        let _ = context;
    }
}

impl<S: HeapSource> std::fmt::Debug for Heap<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("size", &self.heap_size())
            .field("free_blocks", &self.free_list.len())
            .field("config", &self.config)
            .finish()
    }
}

#[inline]
fn ensure_some(condition: bool) -> Option<()> {
    condition.then_some(())
}
