//! Error types for proxima.
//!
//! All fallible operations in the crate return [`Result`], with [`Error`]
//! covering index mutation, shard orchestration, and codec failures.

use thiserror::Error;

/// Result type alias for proxima operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in index, manager, and codec operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A supplied vector's length differs from the index dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the index was configured with.
        expected: usize,
        /// Length of the vector that was supplied.
        actual: usize,
    },

    /// An external id already exists in the index or manager.
    #[error("duplicate id '{0}'")]
    DuplicateId(String),

    /// A referenced shard is not resident and no store is configured.
    #[error("shard '{0}' is not loaded and no store is configured")]
    ShardNotLoaded(String),

    /// The store has no value for a referenced shard key.
    #[error("shard '{0}' is missing from the store")]
    ShardMissing(String),

    /// An underlying store call failed.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A shard image does not start with the expected magic number.
    #[error("bad magic number {0:#010x} in shard image")]
    BadMagic(u32),

    /// A shard image was written by an unsupported format version.
    #[error("unsupported shard format version {0}")]
    UnsupportedVersion(u32),

    /// A shard image ended before a region could be read in full.
    #[error("shard image truncated at byte {0}")]
    Truncated(usize),

    /// A shard image is structurally inconsistent (invalid UTF-8 id,
    /// out-of-range neighbor, mismatched region length).
    #[error("corrupted shard image: {0}")]
    Corrupted(String),

    /// A metric name outside the accepted set was supplied.
    #[error("unknown distance metric '{0}'")]
    UnknownMetric(String),

    /// `open` was called without either a store or a dimension.
    #[error("cannot open manager: neither a store nor a dimension was configured")]
    NotOpenable,
}
