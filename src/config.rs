use snafu::ensure;

use crate::{
    block::{MIN_BLOCK_SIZE, OVERHEAD},
    error::{AllocError, InvalidConfigSnafu},
    utils::ALIGNMENT,
};

/// Default amount of bytes the heap grows by when no free block fits.
pub const CHUNK_SIZE: usize = 1 << 12;

/// Tunables of a [`crate::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Minimum number of bytes requested from the source on every extension.
    pub chunk_size: usize,
    /// Bytes requested from the source when the heap is created. This
    /// includes the prologue and epilogue words.
    pub initial_size: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            initial_size: CHUNK_SIZE,
        }
    }
}

impl HeapConfig {
    pub const fn new() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            initial_size: CHUNK_SIZE,
        }
    }

    pub const fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub const fn initial_size(mut self, initial_size: usize) -> Self {
        self.initial_size = initial_size;
        self
    }

    /// Checks that both sizes can frame at least one minimum block.
    ///
    /// An extension writes one block plus the moved epilogue; the initial
    /// region additionally carries the prologue word.
    pub fn validate(&self) -> Result<(), AllocError> {
        ensure!(
            self.chunk_size % ALIGNMENT == 0,
            InvalidConfigSnafu { reason: "chunk size must be a multiple of 16" }
        );
        ensure!(
            self.initial_size % ALIGNMENT == 0,
            InvalidConfigSnafu { reason: "initial size must be a multiple of 16" }
        );
        ensure!(
            self.chunk_size >= MIN_BLOCK_SIZE,
            InvalidConfigSnafu { reason: "chunk size cannot hold a minimum block" }
        );
        ensure!(
            self.initial_size >= MIN_BLOCK_SIZE + OVERHEAD,
            InvalidConfigSnafu { reason: "initial size cannot hold a minimum block" }
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_page_sized_chunks() {
        let config = HeapConfig::default();

        assert_eq!(config, HeapConfig::new());
        assert_eq!(config.chunk_size, 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unaligned_or_tiny_sizes() {
        assert!(HeapConfig::new().chunk_size(100).validate().is_err());
        assert!(HeapConfig::new().initial_size(4100).validate().is_err());
        assert!(HeapConfig::new().chunk_size(16).validate().is_err());
        assert!(HeapConfig::new().initial_size(32).validate().is_err());
        assert!(HeapConfig::new().chunk_size(32).initial_size(48).validate().is_ok());
    }
}
