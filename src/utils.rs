//! This file contains the helper functions for the allocator that don't
//! particularly belong to any concrete module of the program.

/// Every payload handed out by the allocator is aligned to this many bytes,
/// and every block footprint is a multiple of it.
pub const ALIGNMENT: usize = 16;

/// It aligns `to_be_aligned` using `aligment`.
///
/// This is used to round request sizes up to [`ALIGNMENT`] and source
/// reservations up to the computer's page size. `aligment` must be a power
/// of two.
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`] but returns `None` instead of wrapping around when
/// `to_be_aligned` is too close to `usize::MAX`.
pub fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    to_be_aligned
        .checked_add(aligment - 1)
        .map(|value| value & !(aligment - 1))
}
