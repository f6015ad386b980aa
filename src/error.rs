//! Error types for the pairing store.

use std::path::PathBuf;

/// Errors raised while reading, locking or mutating the pairing store.
///
/// Every variant is fatal for the resolve that raised it. The store is never
/// repaired automatically.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A line of the store violates the `participant_a,participant_b` format.
    #[error("malformed store line {line}: {reason}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What is wrong with the line.
        reason: String,
    },

    /// The store parsed but its records break a pairing invariant.
    #[error("store invariant violated: {0}")]
    InvariantViolation(String),

    /// The advisory lock could not be taken or released.
    #[error("cannot lock store {}: {source}", .path.display())]
    Lock {
        /// Store file the lock applies to.
        path: PathBuf,
        /// Underlying lock error.
        #[source]
        source: std::io::Error,
    },

    /// Any other I/O failure on the store file.
    #[error("{context}: {source}")]
    Io {
        /// What was being done.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
