use thiserror::Error;

/// Errors that can occur when building a [`ProbeService`] or operating on its probes.
///
/// [`ProbeService`]: crate::ProbeService
#[derive(Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// The buffer cannot hold the service layout once aligned.
    #[error(
        "buffer of {available} bytes is too small for the probe service, which needs {required} bytes"
    )]
    BufferTooSmall {
        /// Bytes needed to place the layout in a buffer with any start address.
        required: usize,

        /// Size of the supplied buffer.
        available: usize,
    },

    /// No probe matched the name used to submit a value.
    #[error("no probe matches the name '{name}'")]
    ProbeNotFound {
        /// The name or name fragment that was looked up.
        name: String,
    },

    /// A probe with the same name is already registered.
    #[error("a probe named '{name}' already exists")]
    DuplicateName {
        /// The name of the rejected probe.
        name: String,
    },

    /// The probe pool rejected the operation.
    #[error(transparent)]
    Pool(#[from] sparse_pool::Error),

    /// One of the service's sub-arenas could not satisfy an allocation.
    #[error(transparent)]
    Arena(#[from] block_arena::Error),
}

/// A specialized `Result` type for probe operations, returning the crate's [`Error`] type as
/// the error value.
pub type Result<T> = std::result::Result<T, Error>;
