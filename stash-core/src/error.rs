//! Error types for stash cache operations.
//!
//! The taxonomy has exactly two public kinds: [`PoolError::InvalidArgument`]
//! for caller mistakes and [`PoolError::Operation`] for everything that goes
//! wrong while talking to the storage backend. Callers can distinguish "my
//! input was invalid" from "the storage failed" by matching on the variant.

use thiserror::Error;

/// Caller-supplied input violated a documented constraint.
///
/// Logged at `warning` severity by the pool: the backend is healthy, the
/// caller just handed us something malformed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidArgument {
    /// Cache keys must be non-empty.
    #[error("cache key must be a non-empty string")]
    EmptyKey,

    /// Cache keys must not contain reserved characters.
    #[error("cache key {key:?} contains reserved character {found:?}")]
    ReservedCharacter { key: String, found: char },
}

/// Failures raised by storage backend implementations.
///
/// Backends map their native error types onto these variants; the pool wraps
/// them into [`PoolError::Operation`] before they reach callers.
#[derive(Debug, Error)]
pub enum BackendError {
    /// I/O error from the underlying store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value or entry could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored bytes could not be decoded back into an entry.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Transaction against the store failed.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A lock guarding in-process state was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Any other backend-specific failure.
    #[error("backend failure: {0}")]
    Other(String),
}

/// Severity a failure is logged at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Invalid caller input; the system itself is fine.
    Warning,
    /// The backend failed while executing an operation.
    Alert,
}

/// Top-level error type raised by the cache pool facade.
///
/// Two kinds, one base (this enum). Every public pool operation either
/// returns its documented success boolean or raises one of these; failures
/// are never swallowed at the facade boundary.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The caller's input was rejected before any backend interaction.
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),

    /// A backend failure occurred while executing `operation`.
    ///
    /// Carries the name of the failing top-level operation and preserves
    /// the original failure as the source.
    #[error("cache operation {operation:?} failed")]
    Operation {
        operation: &'static str,
        #[source]
        source: BackendError,
    },
}

impl PoolError {
    /// Wrap a backend failure, recording the top-level operation name.
    pub fn operation(operation: &'static str, source: BackendError) -> Self {
        Self::Operation { operation, source }
    }

    /// Severity this failure should be logged at.
    pub fn severity(&self) -> Severity {
        match self {
            Self::InvalidArgument(_) => Severity::Warning,
            Self::Operation { .. } => Severity::Alert,
        }
    }

    /// Returns true if this is a caller-input failure.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Returns true if this is a backend/operation failure.
    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Operation { .. })
    }
}

/// Result alias used throughout the pool.
pub type PoolResult<T> = Result<T, PoolError>;
