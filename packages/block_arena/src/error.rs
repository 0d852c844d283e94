use thiserror::Error;

/// Errors that can occur when allocating from or releasing storage to a block arena.
///
/// None of these errors leave the arena in a modified state: a failed allocation reserves
/// nothing and a rejected deallocation releases nothing.
#[derive(Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// No run of free contiguous blocks is long enough to satisfy the request.
    #[error(
        "block arena exhausted: no run of {requested_blocks} contiguous free blocks among {capacity} blocks ({free_blocks} free in total)"
    )]
    Exhausted {
        /// Number of contiguous blocks the request needed.
        requested_blocks: usize,

        /// Number of free blocks in the arena, which may be fragmented.
        free_blocks: usize,

        /// Total number of blocks in the arena.
        capacity: usize,
    },

    /// The buffer supplied at construction is not aligned for the element type.
    #[error("buffer at address {address:#x} is not aligned to {required_alignment} bytes")]
    Misaligned {
        /// Address of the first byte of the supplied buffer.
        address: usize,

        /// Alignment required by the element type.
        required_alignment: usize,
    },

    /// The buffer supplied at construction cannot hold even a single block.
    #[error("buffer of {buffer_size} bytes cannot hold a single block of {block_size} bytes")]
    ZeroCapacity {
        /// Size of the supplied buffer in bytes.
        buffer_size: usize,

        /// Size of one block in bytes.
        block_size: usize,
    },

    /// The element type of a rebound view needs stricter alignment than the arena's blocks offer.
    #[error(
        "element alignment of {required_alignment} bytes exceeds the arena block alignment of {block_alignment} bytes"
    )]
    UnsupportedAlignment {
        /// Alignment required by the element type of the rebound view.
        required_alignment: usize,

        /// Alignment guaranteed at every block boundary of the arena.
        block_alignment: usize,
    },

    /// An allocation or deallocation was requested for zero elements.
    #[error("cannot allocate or deallocate zero elements")]
    ZeroCount,

    /// A pointer passed to deallocation does not point into the arena.
    #[error(
        "address {address:#x} is outside the arena range {arena_start:#x}..{arena_end:#x}"
    )]
    OutOfBounds {
        /// The address that was passed in.
        address: usize,

        /// First address managed by the arena.
        arena_start: usize,

        /// One past the last address managed by the arena.
        arena_end: usize,
    },

    /// A pointer passed to deallocation points into the arena but not at the start of a block.
    #[error("offset {offset} into the arena is not a multiple of the block size {block_size}")]
    NotAtBlockBoundary {
        /// Byte offset of the pointer from the start of the arena.
        offset: usize,

        /// Size of one block in bytes.
        block_size: usize,
    },

    /// A pointer passed to deallocation points at a block inside a run rather than at its start.
    #[error("block {block_index} lies inside an allocated run, not at its start")]
    NotRunStart {
        /// Index of the block the pointer refers to.
        block_index: usize,
    },

    /// The run length recorded for a block disagrees with the length computed from the
    /// element count passed to deallocation. This also catches double deallocation.
    #[error(
        "block deallocation mismatch between tracked and calculated sizes: tracked {tracked_blocks} calculated {calculated_blocks}"
    )]
    SizeMismatch {
        /// Run length recorded when the run was allocated (zero if the block is free).
        tracked_blocks: usize,

        /// Run length computed from the element count passed to deallocation.
        calculated_blocks: usize,
    },
}

/// A specialized `Result` type for block arena operations, returning the crate's
/// [`Error`] type as the error value.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);

    #[test]
    fn size_mismatch_message_names_both_sizes() {
        let error = Error::SizeMismatch {
            tracked_blocks: 6,
            calculated_blocks: 4,
        };

        let message = error.to_string();
        assert!(message.contains("tracked 6"));
        assert!(message.contains("calculated 4"));
    }

    #[test]
    fn out_of_bounds_message_uses_hex_addresses() {
        let error = Error::OutOfBounds {
            address: 0x10,
            arena_start: 0x100,
            arena_end: 0x200,
        };

        assert_eq!(
            error.to_string(),
            "address 0x10 is outside the arena range 0x100..0x200"
        );
    }
}
