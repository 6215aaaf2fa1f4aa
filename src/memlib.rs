use std::slice;

use crate::{source::HeapSource, utils::ALIGNMENT};

/// Default limit of a [`MemLib`] heap: 20 MiB.
pub const MAX_HEAP: usize = 20 * (1 << 20);

/// Backing storage unit. Keeps the base of the simulated heap 16-byte aligned.
#[repr(C, align(16))]
#[derive(Clone, Copy)]
struct Line([u8; ALIGNMENT]);

/// Simulated heap living in ordinary process memory.
///
/// It behaves like the program break: [`HeapSource::grow`] hands out the
/// bytes right after the current end, until `max_heap` is reached, after
/// which every growth request fails. Useful for tests and for running many
/// independent heaps in one process.
pub struct MemLib {
    lines: Vec<Line>,
    brk: usize,
    max_heap: usize,
}

impl MemLib {
    pub fn new(max_heap: usize) -> Self {
        Self {
            lines: Vec::new(),
            brk: 0,
            max_heap,
        }
    }

    pub fn max_heap(&self) -> usize {
        self.max_heap
    }
}

impl Default for MemLib {
    fn default() -> Self {
        Self::new(MAX_HEAP)
    }
}

impl HeapSource for MemLib {
    fn grow(&mut self, bytes: usize) -> Option<usize> {
        let old_brk = self.brk;
        let new_brk = old_brk
            .checked_add(bytes)
            .filter(|&brk| brk <= self.max_heap)?;

        let lines = new_brk.div_ceil(ALIGNMENT);
        if lines > self.lines.len() {
            self.lines.resize(lines, Line([0; ALIGNMENT]));
        }

        self.brk = new_brk;
        Some(old_brk)
    }

    fn memory(&self) -> &[u8] {
        // `lines` always covers at least `brk` bytes.
        unsafe { slice::from_raw_parts(self.lines.as_ptr().cast::<u8>(), self.brk) }
    }

    fn memory_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.lines.as_mut_ptr().cast::<u8>(), self.brk) }
    }

    fn size(&self) -> usize {
        self.brk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_returns_previous_break() {
        let mut memlib = MemLib::new(1024);

        assert_eq!(memlib.grow(64), Some(0));
        assert_eq!(memlib.grow(40), Some(64));
        assert_eq!(memlib.size(), 104);
        assert_eq!(memlib.memory().len(), 104);
    }

    #[test]
    fn grow_fails_past_limit() {
        let mut memlib = MemLib::new(128);

        assert_eq!(memlib.grow(96), Some(0));
        assert_eq!(memlib.grow(64), None);
        assert_eq!(memlib.size(), 96);
        assert_eq!(memlib.grow(32), Some(96));
        assert_eq!(memlib.grow(usize::MAX), None);
    }

    #[test]
    fn memory_is_aligned_and_writable() {
        let mut memlib = MemLib::default();
        memlib.grow(4096);

        assert_eq!(memlib.memory().as_ptr() as usize % ALIGNMENT, 0);

        memlib.memory_mut()[4095] = 0xAB;
        assert_eq!(memlib.memory()[4095], 0xAB);
    }

    #[test]
    fn contents_survive_growth() {
        let mut memlib = MemLib::default();
        memlib.grow(32);
        memlib.memory_mut()[..4].copy_from_slice(b"tags");

        memlib.grow(1 << 16);

        assert_eq!(&memlib.memory()[..4], b"tags");
    }
}
