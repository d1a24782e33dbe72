//! Backend adapter trait definition.
//!
//! A [`BackendAdapter`] is the thin translation layer between the generic
//! record contract and one storage technology. It knows how to encode a
//! [`Record`] physically and how to recognise the backend's "not found",
//! "already exists" and "precondition failed" responses. It does **not**
//! interpret expiration or lock fields: filtering expired records and
//! arbitrating locks is the [`Engine`](crate::Engine)'s job, so every backend
//! presents the same coordination semantics.
//!
//! # Implementing an Adapter
//!
//! 1. Implement [`BackendAdapter`] over the backend's client
//! 2. Assign a fresh concurrency token on every successful write
//! 3. Map backend statuses to [`AdapterError`] variants
//! 4. Provide a [`Connector`](crate::Connector) so the engine can create the adapter lazily
//!
//! See [`MemoryAdapter`](crate::MemoryAdapter) for a reference implementation,
//! and run the [`conformance`](crate::conformance) suite against new adapters.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::{error::BoxError, record::Record};

/// Result type alias for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// The wildcard concurrency token that bypasses the precondition check.
pub const WILDCARD_TOKEN: &str = "*";

/// Identifies a logical collection: a database plus a container or table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionRef {
    /// Database (or storage account namespace).
    pub database: String,
    /// Collection, container or table name.
    pub collection: String,
}

impl CollectionRef {
    /// Creates a new collection reference.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self { database: database.into(), collection: collection.into() }
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database, self.collection)
    }
}

/// Precondition attached to an upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Write unconditionally (the `*` wildcard).
    Any,
    /// Write only if the stored token equals this one.
    IfMatch(String),
}

impl WriteCondition {
    /// Builds a condition from a token, treating empty and `*` as wildcard.
    #[must_use]
    pub fn from_token(token: &str) -> Self {
        if token.is_empty() || token == WILDCARD_TOKEN {
            Self::Any
        } else {
            Self::IfMatch(token.to_owned())
        }
    }

    /// Returns the header-style value: `*` or the token.
    #[must_use]
    pub fn as_header_value(&self) -> &str {
        match self {
            Self::Any => WILDCARD_TOKEN,
            Self::IfMatch(token) => token,
        }
    }

    /// Returns `true` if a record currently holding `stored_token` satisfies
    /// this condition.
    #[must_use]
    pub fn is_satisfied_by(&self, stored_token: &str) -> bool {
        match self {
            Self::Any => true,
            Self::IfMatch(token) => token == stored_token,
        }
    }
}

/// Backend outcomes the engine needs to tell apart.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum AdapterError {
    /// The id (or the collection) does not exist.
    #[error("not found")]
    NotFound,

    /// A create collided with an existing id.
    #[error("already exists")]
    AlreadyExists,

    /// The presented concurrency token did not match the stored one.
    #[error("precondition failed")]
    PreconditionFailed,

    /// Any other failure.
    #[error("{message}")]
    Backend {
        /// Description of the failure.
        message: String,
        /// Whether the failure is worth retrying.
        transient: bool,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl AdapterError {
    /// Creates a non-transient backend failure.
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into(), transient: false, source: None }
    }

    /// Creates a transient backend failure (throttling, timeout, 5xx).
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Backend { message: message.into(), transient: true, source: None }
    }

    /// Creates a backend failure wrapping `source`.
    #[must_use]
    pub fn backend_with_source(
        message: impl Into<String>,
        transient: bool,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend { message: message.into(), transient, source: Some(Arc::new(source)) }
    }
}

/// Record operations a storage technology must provide.
///
/// Adapters are shared between concurrent callers and must be `Send + Sync`.
/// No method may filter by expiration or lock state.
///
/// | Method | Distinguished failure |
/// |--------|-----------------------|
/// | [`create`](BackendAdapter::create) | [`AdapterError::AlreadyExists`] |
/// | [`upsert`](BackendAdapter::upsert) | [`AdapterError::PreconditionFailed`] |
/// | [`read`](BackendAdapter::read) | [`AdapterError::NotFound`] |
/// | [`delete`](BackendAdapter::delete) | [`AdapterError::NotFound`] |
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Short backend name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Provisions the collection if missing. Called once, before any other
    /// operation on the collection.
    async fn ensure_collection_exists(&self, collection: &CollectionRef) -> AdapterResult<()>;

    /// Stores a new record. The returned record carries the first token.
    async fn create(&self, collection: &CollectionRef, record: &Record) -> AdapterResult<Record>;

    /// Stores `record` if `condition` holds. The returned record carries a new
    /// token.
    async fn upsert(
        &self,
        collection: &CollectionRef,
        record: &Record,
        condition: &WriteCondition,
    ) -> AdapterResult<Record>;

    /// Reads a record by id.
    async fn read(&self, collection: &CollectionRef, id: &str) -> AdapterResult<Record>;

    /// Deletes a record by id.
    async fn delete(&self, collection: &CollectionRef, id: &str) -> AdapterResult<()>;

    /// Returns every physically present record, unfiltered.
    async fn list_all(&self, collection: &CollectionRef) -> AdapterResult<Vec<Record>>;

    /// Verifies the backend is reachable.
    async fn health_check(&self) -> AdapterResult<()>;
}

#[async_trait]
impl<T: BackendAdapter + ?Sized> BackendAdapter for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn ensure_collection_exists(&self, collection: &CollectionRef) -> AdapterResult<()> {
        (**self).ensure_collection_exists(collection).await
    }

    async fn create(&self, collection: &CollectionRef, record: &Record) -> AdapterResult<Record> {
        (**self).create(collection, record).await
    }

    async fn upsert(
        &self,
        collection: &CollectionRef,
        record: &Record,
        condition: &WriteCondition,
    ) -> AdapterResult<Record> {
        (**self).upsert(collection, record, condition).await
    }

    async fn read(&self, collection: &CollectionRef, id: &str) -> AdapterResult<Record> {
        (**self).read(collection, id).await
    }

    async fn delete(&self, collection: &CollectionRef, id: &str) -> AdapterResult<()> {
        (**self).delete(collection, id).await
    }

    async fn list_all(&self, collection: &CollectionRef) -> AdapterResult<Vec<Record>> {
        (**self).list_all(collection).await
    }

    async fn health_check(&self) -> AdapterResult<()> {
        (**self).health_check().await
    }
}

/// A type-erased, shareable adapter. This is what the
/// [`EngineFactory`](crate::EngineFactory) hands out.
pub type SharedAdapter = Arc<dyn BackendAdapter>;
