//! Error types for store operations.
//!
//! Every storage failure is wrapped with the offending key (or the scope of
//! the scan) and the backend's own error text, so callers get actionable
//! messages without depending on the backend crate directly.
//!
//! Absence of a key is *not* an error: `get` returns `Ok(None)` for missing
//! or expired entries. The only operation that raises [`KvError::KeyNotFound`]
//! is `touch`, which refuses to resurrect missing or stale entries.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, KvError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum KvError {
    /// Opening the backend database or upgrading its schema failed.
    #[error("failed to open database: {0}")]
    Connection(String),

    /// A write transaction failed. Carries the key (or batch scope) and the
    /// backend error text.
    #[error("failed to write {context}: {reason}")]
    WriteFailed {
        /// The key or batch scope the write was for.
        context: String,
        /// The underlying backend error text.
        reason: String,
    },

    /// A read transaction failed.
    #[error("failed to read {context}: {reason}")]
    ReadFailed {
        /// The key or scan scope the read was for.
        context: String,
        /// The underlying backend error text.
        reason: String,
    },

    /// The key does not exist or has already expired. Only raised by `touch`.
    #[error("key {key:?} does not exist")]
    KeyNotFound {
        /// The key that was not found.
        key: String,
    },

    /// The background sweep aborted; no partial deletes were committed.
    #[error("cleanup failed: {0}")]
    Cleanup(String),

    /// An entry could not be encoded to or decoded from its stored form.
    #[error("failed to serialize entry for key {key:?}: {reason}")]
    Serialization {
        /// The key whose entry could not be (de)serialized.
        key: String,
        /// The serde error text.
        reason: String,
    },

    /// The store has been closed; no further operations are accepted.
    #[error("store is closed")]
    Closed,

    /// An unexpected runtime failure (e.g. a blocking task that could not be
    /// joined). Should not occur in normal operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl KvError {
    /// Returns `true` if this error indicates the key was not found.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, KvError::KeyNotFound { .. })
    }

    /// Returns `true` if this error is a connection-level failure.
    #[inline]
    pub fn is_connection(&self) -> bool {
        matches!(self, KvError::Connection(_))
    }

    /// Returns `true` if the store was closed when the operation ran.
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, KvError::Closed)
    }
}
