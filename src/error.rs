//! Error types for quiver.

use thiserror::Error;

/// Errors that can occur while building or querying an index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// Input buffer length disagrees with the configured shape.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The index has not been trained (and populated) yet.
    #[error("index is not ready: call train() and populate() first")]
    NotTrained,

    /// `train` was called on an index that already holds codebooks.
    #[error("index is already trained")]
    AlreadyTrained,

    /// A subspace of the training corpus has fewer distinct sub-vectors
    /// than the requested number of centroids.
    #[error("subspace {subspace} has only {distinct} distinct sub-vectors, {needed} centroids requested")]
    InsufficientData {
        subspace: usize,
        distinct: usize,
        needed: usize,
    },

    /// A parameter violates its documented range.
    #[error("parameter out of range: {0}")]
    OutOfRange(String),
}

/// Result type alias for quiver operations.
pub type Result<T> = std::result::Result<T, IndexError>;
