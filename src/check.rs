//! Heap walking and consistency checks.
//!
//! Nothing here is needed for correct allocation. [`Heap::check_invariants`]
//! is meant to be sprinkled through debugging sessions and tests; in release
//! builds without the `heap-check` feature it does nothing.

use log::error;
use snafu::{OptionExt, Snafu, ensure};

use crate::{
    block::{BlockRef, Links, Payload, Tag, WORD},
    heap::Heap,
    source::HeapSource,
    utils::ALIGNMENT,
};

/// One block as seen by a heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub payload: Payload,
    pub size: usize,
    pub allocated: bool,
}

/// Summary of a heap walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub heap_size: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
}

/// The first inconsistency found by [`Heap::verify`].
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum HeapViolation {
    #[snafu(display("heap base is not 16-byte aligned"))]
    MisalignedBase,

    #[snafu(display("prologue word at {offset} is not a zero-size allocated tag"))]
    BadPrologue { offset: usize },

    #[snafu(display("block at {offset} runs past the end of the heap"))]
    Truncated { offset: usize },

    #[snafu(display("block at {offset} has unaligned size {size}"))]
    MisalignedBlock { offset: usize, size: usize },

    #[snafu(display("block at {offset}: header says {header:?} but footer says {footer:?}"))]
    TagMismatch { offset: usize, header: (usize, bool), footer: (usize, bool) },

    #[snafu(display("free blocks at {offset} and before it were not coalesced"))]
    Uncoalesced { offset: usize },

    #[snafu(display("epilogue at {offset} is not in the last word of the heap"))]
    MisplacedEpilogue { offset: usize },

    #[snafu(display("listed block at {offset} is not a free block"))]
    ListedAllocated { offset: usize },

    #[snafu(display("links around block at {offset} do not point back to it"))]
    BrokenLink { offset: usize },

    #[snafu(display("free list has {listed} blocks, heap has {free} free blocks"))]
    ListMismatch { listed: usize, free: usize },
}

/// Iterator over every block between the prologue and the epilogue, in
/// address order. Stops early instead of panicking on a corrupted size.
pub struct Blocks<'a> {
    mem: &'a [u8],
    at: usize,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        if self.at + WORD > self.mem.len() {
            return None;
        }

        let block = BlockRef::new(self.at);
        let tag = block.tag(self.mem);
        if tag.is_sentinel() {
            return None;
        }

        self.at = self.at.checked_add(tag.size() + 2 * WORD)?;

        Some(BlockInfo {
            payload: block.payload(),
            size: tag.size(),
            allocated: tag.is_allocated(),
        })
    }
}

fn decode(tag: Tag) -> (usize, bool) {
    (tag.size(), tag.is_allocated())
}

impl<S: HeapSource> Heap<S> {
    /// Walks the heap in address order.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            mem: self.source.memory(),
            at: self.prologue + WORD,
        }
    }

    pub fn stats(&self) -> HeapStats {
        self.blocks().fold(
            HeapStats {
                heap_size: self.heap_size(),
                ..HeapStats::default()
            },
            |mut stats, info| {
                if info.allocated {
                    stats.allocated_blocks += 1;
                    stats.allocated_bytes += info.size;
                } else {
                    stats.free_blocks += 1;
                    stats.free_bytes += info.size;
                    stats.largest_free = stats.largest_free.max(info.size);
                }
                stats
            },
        )
    }

    /// Checks the whole heap and reports the first problem found.
    ///
    /// - the prologue and epilogue are in place,
    /// - every block is aligned, fits in the heap and has matching tags,
    /// - no two free blocks are adjacent,
    /// - the free list holds exactly the free blocks, with consistent links.
    pub fn verify(&self) -> Result<(), HeapViolation> {
        let mem = self.source.memory();

        ensure!(mem.as_ptr() as usize % ALIGNMENT == 0, MisalignedBaseSnafu);
        ensure!(
            self.prologue + 2 * WORD <= mem.len() && Tag::read(mem, self.prologue) == Tag::SENTINEL,
            BadPrologueSnafu { offset: self.prologue }
        );

        let mut at = self.prologue + WORD;
        let mut free = 0;
        let mut prev_free = false;

        loop {
            ensure!(at + WORD <= mem.len(), TruncatedSnafu { offset: at });

            let block = BlockRef::new(at);
            let header = block.tag(mem);

            if header.is_sentinel() {
                ensure!(
                    header.is_allocated() && at + WORD == mem.len(),
                    MisplacedEpilogueSnafu { offset: at }
                );
                break;
            }

            let size = header.size();
            ensure!(
                size % ALIGNMENT == 0 && block.payload().offset() % ALIGNMENT == 0,
                MisalignedBlockSnafu { offset: at, size }
            );

            let footer_at = at
                .checked_add(WORD + size)
                .filter(|footer| footer + 2 * WORD <= mem.len())
                .context(TruncatedSnafu { offset: at })?;

            let footer = Tag::read(mem, footer_at);
            ensure!(
                footer == header,
                TagMismatchSnafu {
                    offset: at,
                    header: decode(header),
                    footer: decode(footer),
                }
            );

            let is_free = !header.is_allocated();
            ensure!(!(is_free && prev_free), UncoalescedSnafu { offset: at });

            free += usize::from(is_free);
            prev_free = is_free;
            at = block.following(size).header();
        }

        self.verify_free_list(free)
    }

    fn verify_free_list(&self, free: usize) -> Result<(), HeapViolation> {
        let mem = self.source.memory();
        let mut current = self.free_list.head();
        let mut prev = None;
        let mut listed = 0;

        while let Some(block) = current {
            // More entries than free blocks means a cycle or a stray block.
            ensure!(listed < free, ListMismatchSnafu { listed: listed + 1, free });
            ensure!(
                self.block_of(block.payload()).is_some() && block.is_free(mem),
                ListedAllocatedSnafu { offset: block.header() }
            );

            let links = Links::read(mem, block);
            ensure!(links.prev == prev, BrokenLinkSnafu { offset: block.header() });

            listed += 1;
            prev = Some(block);
            current = links.next;
        }

        ensure!(
            listed == free && listed == self.free_list.len(),
            ListMismatchSnafu { listed, free }
        );

        Ok(())
    }

    /// Runs [`Heap::verify`] and logs the violation, if any, together with
    /// `context`. Active in debug builds or with the `heap-check` feature;
    /// otherwise it always returns `true`.
    pub fn check_invariants(&self, context: &str) -> bool {
        if !cfg!(any(debug_assertions, feature = "heap-check")) {
            return true;
        }

        match self.verify() {
            Ok(()) => true,
            Err(violation) => {
                error!("heap check failed ({context}): {violation}");
                false
            }
        }
    }
}
