//! The memory the allocator carves blocks out of.

/// A contiguous region that only ever grows at its upper end, like the
/// program break moved by `sbrk`.
///
/// The allocator never shrinks the region and never calls [`grow`] with
/// zero bytes. The start of [`memory`] must be 16-byte aligned and must not
/// move while the region is borrowed.
///
/// [`grow`]: HeapSource::grow
/// [`memory`]: HeapSource::memory
pub trait HeapSource {
    /// Extends the region by `bytes`. Returns the offset of the first new
    /// byte (the old size of the region), or `None` if it can't grow.
    fn grow(&mut self, bytes: usize) -> Option<usize>;

    /// The whole region, from its lowest byte up to the current break.
    fn memory(&self) -> &[u8];

    fn memory_mut(&mut self) -> &mut [u8];

    /// Current size of the region in bytes.
    fn size(&self) -> usize {
        self.memory().len()
    }
}
