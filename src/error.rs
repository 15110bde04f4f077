//! Error type shared by every engine operation.

use std::error::Error as StdError;

use thiserror::Error;

/// Boxed error produced by a caller-supplied row function.
pub type RowError = Box<dyn StdError + Send + Sync + 'static>;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Failures surfaced by the pool, the table builder and the interpolator.
///
/// No variant ever accompanies a partial result: an operation either returns
/// a complete table or polynomial, or one of these errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid shape: {0}")]
    /// Zero width or length, malformed configuration, or an unsupported size.
    InvalidShape(String),
    #[error("row generator failed at row {row}: {source}")]
    /// The caller-supplied row function returned an error.
    RowGeneration {
        /// Index of the row whose generation failed.
        row: usize,
        /// Error reported by the row function.
        #[source]
        source: RowError,
    },
    #[error("pool invariant violated: {0}")]
    /// Double release, release of a foreign buffer, or corrupted bookkeeping.
    InvariantViolation(String),
    #[error("allocation of {elements} field elements failed")]
    /// The system allocator could not provide the requested storage.
    AllocationFailure {
        /// Number of `u64` elements requested.
        elements: usize,
    },
    #[error("io error: {0}")]
    /// Reading a configuration file failed.
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Self::InvalidShape(msg.into())
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}
