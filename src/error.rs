//! Error types for the resolution engine.
//!
//! Errors are strongly typed with thiserror so callers can match on the
//! recoverable cases. Ambiguous clusters and edge collisions are not errors:
//! they are logged and reported as data. Malformed names are not errors
//! either; they normalize to an empty key that never matches.

use thiserror::Error;

use crate::person::PersonId;
use crate::storage::StorageError;

/// A cluster could not be merged as given.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Fewer than two members.
    #[error("Cluster has {count} members, need at least 2")]
    TooFewMembers {
        /// Members present.
        count: usize,
    },

    /// The cluster failed its clique check.
    #[error("Cluster is not confirmed; ambiguous clusters are never merged")]
    NotConfirmed,

    /// A member was removed or merged away.
    #[error("Cluster member {id} no longer exists")]
    MissingMember {
        /// The missing member.
        id: PersonId,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum ResolverError {
    /// Store adapter failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Cluster could not be merged.
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// Stopped by a cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// `try_submit` found the ingest queue full.
    #[error("Ingest queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The ingest workers are gone.
    #[error("Ingest workers disconnected")]
    Disconnected,

    /// A worker thread could not be started.
    #[error("Failed to spawn ingest worker: {0}")]
    Spawn(#[from] std::io::Error),

    /// Configuration rejected by `validate`.
    #[error("Invalid configuration: {message}")]
    Config {
        /// What was wrong.
        message: String,
    },
}

impl ResolverError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true for optimistic-concurrency failures raised by the store.
    #[must_use]
    pub const fn is_concurrency(&self) -> bool {
        matches!(
            self,
            Self::Storage(StorageError::StaleRecord { .. } | StorageError::DuplicateKey(_))
        )
    }

    /// Returns true if retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(e) => matches!(
                e,
                StorageError::StaleRecord { .. } | StorageError::DuplicateKey(_)
            ),
            Self::QueueFull { .. } => true,
            Self::Merge(_)
            | Self::Cancelled
            | Self::Disconnected
            | Self::Spawn(_)
            | Self::Config { .. } => false,
        }
    }
}

/// Result type alias for engine operations.
pub type ResolverResult<T> = Result<T, ResolverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_error_messages() {
        let err = MergeError::TooFewMembers { count: 1 };
        assert!(err.to_string().contains("1 members"));

        let err = MergeError::MissingMember { id: PersonId::new(9) };
        assert!(err.to_string().contains('9'));
    }

    #[test]
    fn test_from_storage() {
        let err: ResolverError = StorageError::StaleRecord {
            id: PersonId::new(3),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(err.is_concurrency());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_retryable() {
        let err: ResolverError = MergeError::NotConfirmed.into();
        assert!(!err.is_retryable());
        assert!(!err.is_concurrency());
        assert!(!ResolverError::Cancelled.is_retryable());
        assert!(!ResolverError::config("bad").is_retryable());
    }

    #[test]
    fn test_queue_full_is_retryable() {
        let err = ResolverError::QueueFull { capacity: 8 };
        assert!(err.is_retryable());
        assert!(!err.is_concurrency());
        assert!(err.to_string().contains("capacity 8"));
    }
}
