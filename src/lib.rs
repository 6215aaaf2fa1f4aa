//! # tagalloc
//!
//! A dynamic memory allocator built on boundary tags and an explicit free
//! list, carving blocks out of a single region that only grows at its end,
//! the way a classic `sbrk` based `malloc` does.
//!
//! ## Heap layout
//!
//! Every block has a header and a footer holding the same `(size, allocated)`
//! tag, so we can walk the heap in both directions. The heap is framed by a
//! zero-size allocated *prologue* and *epilogue*, which stop every walk at the
//! edges without any bounds special cases:
//!
//! ```text
//!  0      8                                                         end-8  end
//!  +------+--------+---------+--------+--------+---------+--------+------+
//!  | 0/1  | hdr    | payload | ftr    | hdr    | payload | ftr    | 0/1  |
//!  +------+--------+---------+--------+--------+---------+--------+------+
//!  prologue         allocated                   free               epilogue
//! ```
//!
//! Free blocks reuse the first two words of their payload as `next`/`prev`
//! links of the free list (see `freelist`). Allocated blocks never hold links.
//!
//! ## Algorithm
//!
//! - **Allocation**: first-fit over the free list. Oversized blocks are split
//!   when the remainder can be a block on its own (32 bytes).
//! - **Growth**: when nothing fits, the heap grows by at least one chunk
//!   (4096 bytes by default) and the new space is merged with a trailing free
//!   block, if any.
//! - **Release**: the block is tagged free and immediately merged with its
//!   free neighbors, so no two free blocks are ever adjacent.
//!
//! ## Handles instead of pointers
//!
//! The heap is addressed by offsets into the [`HeapSource`]'s memory, and
//! allocations are returned as [`Payload`] handles. Every access goes through
//! bounds-checked slices, so a corrupted tag can't make the allocator read
//! outside its own region.
//!
//! ## Quick start
//!
//! ```rust
//! use tagalloc::{Heap, MemLib};
//!
//! let mut heap = Heap::new(MemLib::default()).unwrap();
//!
//! let ptr = heap.allocate(100).unwrap().unwrap();
//! heap.payload_mut(ptr).unwrap()[..5].copy_from_slice(b"hello");
//!
//! let ptr = heap.resize(Some(ptr), 1000).unwrap();
//! assert_eq!(&heap.payload(ptr.unwrap()).unwrap()[..5], b"hello");
//!
//! heap.release(ptr);
//! assert!(heap.check_invariants("quick start"));
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded**: a heap is used through `&mut`, wrap it in a lock to
//!   share it.
//! - **Never shrinks**: memory is only returned when the source is dropped.
//! - **Linear search**: allocation is O(n) in the number of free blocks.

mod block;
mod check;
mod coalesce;
mod config;
mod error;
mod extend;
mod freelist;
mod heap;
mod kernel;
mod memlib;
mod place;
mod source;
pub mod utils;

pub use block::Payload;
pub use check::{BlockInfo, Blocks, HeapStats, HeapViolation};
pub use config::{CHUNK_SIZE, HeapConfig};
pub use error::AllocError;
pub use heap::Heap;
pub use kernel::OsHeap;
pub use memlib::{MAX_HEAP, MemLib};
pub use source::HeapSource;
