//! Storage error types and result alias.
//!
//! Every engine operation returns [`StorageResult<T>`]. Backend adapters report
//! their own narrower [`AdapterError`](crate::adapter::AdapterError), which the
//! engine converts with [`StorageError::from_adapter`].
//!
//! # Error Types
//!
//! - [`StorageError::NotFound`] - Record does not exist, or exists but has expired
//! - [`StorageError::Conflict`] - Id collision on create, or stale concurrency token on upsert
//! - [`StorageError::LockedByAnotherOwner`] - Direct [`Record::unlock`](crate::Record::unlock)
//!   by a caller that does not hold the lock
//! - [`StorageError::ExternalDependency`] - Any other backend failure
//! - [`StorageError::Uninitialized`] - Engine used before `init`
//! - [`StorageError::UnknownBackend`] - Factory asked for a backend type it does not know
//! - [`StorageError::Config`] - Invalid configuration
//!
//! `NotFound` and `Conflict` are expected, recoverable outcomes and are never
//! folded into `ExternalDependency`. `Uninitialized`, `UnknownBackend` and
//! `Config` are structural: retrying cannot fix them.
//!
//! # Example
//!
//! ```
//! use fleetsim_storage::{StorageError, StorageResult};
//!
//! fn lookup(id: &str) -> StorageResult<String> {
//!     Err(StorageError::not_found(id))
//! }
//!
//! assert!(matches!(lookup("p-1"), Err(StorageError::NotFound { .. })));
//! ```

use std::sync::Arc;

use thiserror::Error;

use crate::adapter::AdapterError;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during record store operations.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The record does not exist or has logically expired.
    #[error("Record not found: {id}")]
    NotFound {
        /// Id of the missing record.
        id: String,
    },

    /// The backend rejected a write: either the id already exists (create)
    /// or the presented concurrency token is stale (upsert).
    #[error("Conflict writing record: {id}")]
    Conflict {
        /// Id of the contested record.
        id: String,
    },

    /// An unexpired lock is held by a different owner.
    #[error("Record {id} is locked by another owner ({owner_type}/{owner_id})")]
    LockedByAnotherOwner {
        /// Id of the locked record.
        id: String,
        /// Current lock owner id.
        owner_id: String,
        /// Current lock owner type.
        owner_type: String,
    },

    /// The backend failed for a reason other than not-found or conflict.
    #[error("External dependency error: {message}")]
    ExternalDependency {
        /// Description of the failure.
        message: String,
        /// Whether the backend flagged the failure as retryable
        /// (throttling, timeouts, 5xx).
        transient: bool,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// A data operation was issued before the engine was initialized.
    #[error("Storage engine used before initialization")]
    Uninitialized,

    /// The configured backend type is not recognised.
    #[error("Unknown storage backend type: {name}")]
    UnknownBackend {
        /// The rejected backend type name.
        name: String,
    },

    /// The configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl StorageError {
    /// Creates a new `NotFound` error for the given record id.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a new `Conflict` error for the given record id.
    #[must_use]
    pub fn conflict(id: impl Into<String>) -> Self {
        Self::Conflict { id: id.into() }
    }

    /// Creates a new non-transient `ExternalDependency` error.
    #[must_use]
    pub fn external(message: impl Into<String>) -> Self {
        Self::ExternalDependency { message: message.into(), transient: false, source: None }
    }

    /// Creates a new `ExternalDependency` error with a source error.
    #[must_use]
    pub fn external_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ExternalDependency {
            message: message.into(),
            transient: false,
            source: Some(Arc::new(source)),
        }
    }

    /// Creates a new `UnknownBackend` error.
    #[must_use]
    pub fn unknown_backend(name: impl Into<String>) -> Self {
        Self::UnknownBackend { name: name.into() }
    }

    /// Converts an adapter failure on record `id` into the engine taxonomy.
    ///
    /// `AlreadyExists` and `PreconditionFailed` both surface as
    /// [`Conflict`](Self::Conflict); everything that is not a recognised
    /// status becomes [`ExternalDependency`](Self::ExternalDependency).
    #[must_use]
    pub fn from_adapter(id: &str, err: AdapterError) -> Self {
        match err {
            AdapterError::NotFound => Self::not_found(id),
            AdapterError::AlreadyExists | AdapterError::PreconditionFailed => Self::conflict(id),
            AdapterError::Backend { message, transient, source } => {
                Self::ExternalDependency { message, transient, source }
            },
        }
    }

    /// Returns `true` for programmer or configuration errors that retrying
    /// cannot fix.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::UnknownBackend { .. } | Self::Config(_))
    }

    /// Returns `true` when the backend flagged the failure as retryable.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ExternalDependency { transient: true, .. })
    }
}

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric field is below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Name of the offending field.
        field: &'static str,
        /// The minimum accepted value.
        min: String,
        /// The rejected value.
        value: String,
    },

    /// A required string field is empty.
    #[error("{field} cannot be empty")]
    Empty {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A field holds a value that cannot be used.
    #[error("{field} is invalid: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}
