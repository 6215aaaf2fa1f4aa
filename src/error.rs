use snafu::Snafu;

/// Errors surfaced by the public heap operations.
///
/// A zero-byte request is not an error (it yields `Ok(None)`), and misuse
/// such as releasing a block twice is ignored rather than reported.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    /// The heap source refused to grow.
    #[snafu(display("heap source could not grow by {bytes} bytes"))]
    OutOfMemory { bytes: usize },

    /// The request cannot be rounded up and framed without overflowing.
    #[snafu(display("request of {size} bytes is too large for the heap"))]
    TooLarge { size: usize },

    /// `count * size` of a zeroed allocation overflows.
    #[snafu(display("zeroed allocation of {count} x {size} bytes overflows"))]
    Overflow { count: usize, size: usize },

    /// A handle given to `resize` does not name an allocated block.
    #[snafu(display("offset {offset} is not an allocated block of this heap"))]
    InvalidPointer { offset: usize },

    /// The heap source does not start the heap on a 16 byte boundary.
    #[snafu(display("heap source is misaligned by {offset} bytes"))]
    MisalignedSource { offset: usize },

    #[snafu(display("invalid heap configuration: {reason}"))]
    InvalidConfig { reason: &'static str },
}
