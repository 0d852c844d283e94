use thiserror::Error;

/// Errors that can occur when adding to, resolving in or removing from a [`SparsePool`].
///
/// [`SparsePool`]: crate::SparsePool
#[derive(Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The pool already holds as many values as its fixed capacity allows.
    #[error("sparse pool is full: all {capacity} slots are in use")]
    Exhausted {
        /// The fixed capacity of the pool.
        capacity: usize,
    },

    /// The handle refers to a key slot the pool does not have.
    #[error("handle key index {key_index} is out of bounds in pool of capacity {capacity}")]
    OutOfBounds {
        /// Key index carried by the handle.
        key_index: usize,

        /// The fixed capacity of the pool.
        capacity: usize,
    },

    /// The value the handle referred to has been removed from the pool.
    #[error("handle for key index {key_index} is stale: its value has been removed")]
    StaleHandle {
        /// Key index carried by the handle.
        key_index: usize,
    },

    /// The arena backing the pool's storage could not satisfy a request.
    #[error(transparent)]
    Arena(#[from] block_arena::Error),
}

/// A specialized `Result` type for sparse pool operations, returning the crate's
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
    fn arena_errors_convert_transparently() {
        let error = Error::from(block_arena::Error::ZeroCount);

        assert_eq!(error, Error::Arena(block_arena::Error::ZeroCount));
        assert_eq!(
            error.to_string(),
            block_arena::Error::ZeroCount.to_string()
        );
    }
}
