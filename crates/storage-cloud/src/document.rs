//! Document database adapter.
//!
//! Each record is one JSON document in a container. The service stamps an
//! `_etag` on every write, which becomes the record's concurrency token.
//!
//! # Document Layout
//!
//! ```json
//! {
//!   "id": "partition-7",
//!   "data": "{\"node\":\"a\"}",
//!   "expiresAtUtcMs": -1,
//!   "lastModifiedUtcMs": 1760000000000,
//!   "lockOwnerId": "node-a",
//!   "lockOwnerType": "partition",
//!   "lockExpiresAtUtcMs": 1760000030000,
//!   "_etag": "\"00000003-0000\""
//! }
//! ```
//!
//! System properties other than `_etag` (`_rid`, `_ts`, ...) are ignored.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use fleetsim_storage::{
    AdapterError, AdapterResult, BackendAdapter, CollectionRef, Connector, NEVER, Record,
    RecordParts, SharedConnector, StorageConfig, StorageResult, WriteCondition, connector,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    connection_string::{ConnectionString, DocumentAccount},
    error::{Result, ServiceResult},
};

/// Query used to enumerate a container.
pub const SELECT_ALL: &str = "SELECT * FROM c";

/// Client for a document database.
///
/// Implementations wrap the vendor SDK or REST API. Errors carry the HTTP
/// status; the adapter maps them with [`ServiceError::into_adapter_error`](crate::ServiceError::into_adapter_error).
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Creates `database` unless it exists.
    async fn create_database_if_not_exists(&self, database: &str) -> ServiceResult<()>;

    /// Creates `container` with the given provisioned throughput unless it exists.
    async fn create_container_if_not_exists(
        &self,
        database: &str,
        container: &str,
        throughput: u32,
    ) -> ServiceResult<()>;

    /// Reads a document by id.
    async fn read_document(&self, database: &str, container: &str, id: &str) -> ServiceResult<Value>;

    /// Inserts a new document; 409 if the id is taken.
    async fn create_document(
        &self,
        database: &str,
        container: &str,
        document: Value,
    ) -> ServiceResult<Value>;

    /// Inserts or replaces a document. With `if_match`, 412 unless the stored
    /// `_etag` matches.
    async fn upsert_document(
        &self,
        database: &str,
        container: &str,
        document: Value,
        if_match: Option<&str>,
    ) -> ServiceResult<Value>;

    /// Deletes a document by id.
    async fn delete_document(&self, database: &str, container: &str, id: &str) -> ServiceResult<()>;

    /// Runs a SQL query over the container.
    async fn query_documents(
        &self,
        database: &str,
        container: &str,
        query: &str,
    ) -> ServiceResult<Vec<Value>>;

    /// Checks that the account is reachable.
    async fn ping(&self) -> ServiceResult<()>;
}

const fn never() -> i64 {
    NEVER
}

/// Wire form of a [`Record`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordDocument {
    id: String,
    #[serde(rename = "_etag", default, skip_serializing)]
    etag: String,
    #[serde(default)]
    data: String,
    #[serde(default = "never")]
    expires_at_utc_ms: i64,
    #[serde(default)]
    last_modified_utc_ms: i64,
    #[serde(default)]
    lock_owner_id: String,
    #[serde(default)]
    lock_owner_type: String,
    #[serde(default)]
    lock_expires_at_utc_ms: i64,
}

impl From<&Record> for RecordDocument {
    fn from(record: &Record) -> Self {
        let parts = record.clone().into_parts();
        Self {
            id: parts.id,
            etag: String::new(),
            data: parts.data,
            expires_at_utc_ms: parts.expires_at_utc_ms,
            last_modified_utc_ms: parts.last_modified_utc_ms,
            lock_owner_id: parts.lock_owner_id,
            lock_owner_type: parts.lock_owner_type,
            lock_expires_at_utc_ms: parts.lock_expires_at_utc_ms,
        }
    }
}

impl From<RecordDocument> for Record {
    fn from(doc: RecordDocument) -> Self {
        Record::from_parts(RecordParts {
            id: doc.id,
            concurrency_token: doc.etag,
            data: doc.data,
            expires_at_utc_ms: doc.expires_at_utc_ms,
            last_modified_utc_ms: doc.last_modified_utc_ms,
            lock_owner_id: doc.lock_owner_id,
            lock_owner_type: doc.lock_owner_type,
            lock_expires_at_utc_ms: doc.lock_expires_at_utc_ms,
        })
    }
}

fn encode(record: &Record) -> AdapterResult<Value> {
    serde_json::to_value(RecordDocument::from(record))
        .map_err(|e| AdapterError::backend_with_source("failed to encode document", false, e))
}

fn decode(document: Value) -> AdapterResult<Record> {
    serde_json::from_value::<RecordDocument>(document)
        .map(Record::from)
        .map_err(|e| AdapterError::backend_with_source("malformed record document", false, e))
}

/// [`BackendAdapter`] over a [`DocumentService`].
pub struct DocumentAdapter<S: ?Sized> {
    service: Arc<S>,
    throughput: u32,
}

impl<S: ?Sized> Clone for DocumentAdapter<S> {
    fn clone(&self) -> Self {
        Self { service: Arc::clone(&self.service), throughput: self.throughput }
    }
}

impl<S: ?Sized> fmt::Debug for DocumentAdapter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentAdapter").field("throughput", &self.throughput).finish_non_exhaustive()
    }
}

impl<S: DocumentService + ?Sized> DocumentAdapter<S> {
    /// Creates an adapter that provisions new containers with `throughput`.
    pub fn new(service: Arc<S>, throughput: u32) -> Self {
        Self { service, throughput }
    }

    /// The underlying service client.
    #[must_use]
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }
}

#[async_trait]
impl<S: DocumentService + ?Sized> BackendAdapter for DocumentAdapter<S> {
    fn name(&self) -> &'static str {
        "document"
    }

    async fn ensure_collection_exists(&self, collection: &CollectionRef) -> AdapterResult<()> {
        self.service.create_database_if_not_exists(&collection.database).await?;
        self.service
            .create_container_if_not_exists(
                &collection.database,
                &collection.collection,
                self.throughput,
            )
            .await?;
        tracing::debug!(%collection, throughput = self.throughput, "document container ready");
        Ok(())
    }

    async fn create(&self, collection: &CollectionRef, record: &Record) -> AdapterResult<Record> {
        let stored = self
            .service
            .create_document(&collection.database, &collection.collection, encode(record)?)
            .await?;
        decode(stored)
    }

    async fn upsert(
        &self,
        collection: &CollectionRef,
        record: &Record,
        condition: &WriteCondition,
    ) -> AdapterResult<Record> {
        let if_match = match condition {
            WriteCondition::Any => None,
            WriteCondition::IfMatch(token) => Some(token.as_str()),
        };
        let stored = self
            .service
            .upsert_document(&collection.database, &collection.collection, encode(record)?, if_match)
            .await?;
        decode(stored)
    }

    async fn read(&self, collection: &CollectionRef, id: &str) -> AdapterResult<Record> {
        let document =
            self.service.read_document(&collection.database, &collection.collection, id).await?;
        decode(document)
    }

    async fn delete(&self, collection: &CollectionRef, id: &str) -> AdapterResult<()> {
        self.service.delete_document(&collection.database, &collection.collection, id).await?;
        Ok(())
    }

    async fn list_all(&self, collection: &CollectionRef) -> AdapterResult<Vec<Record>> {
        self.service
            .query_documents(&collection.database, &collection.collection, SELECT_ALL)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    async fn health_check(&self) -> AdapterResult<()> {
        self.service.ping().await?;
        Ok(())
    }
}

type BuildDocumentService<S> = dyn Fn(&DocumentAccount) -> Result<Arc<S>> + Send + Sync;

/// Builds a [`DocumentAdapter`] from the configured connection string.
///
/// The connection string must carry `AccountEndpoint` and `AccountKey`. The
/// client itself is produced by a caller-supplied closure, so any SDK can
/// sit behind [`DocumentService`].
pub struct DocumentConnector<S: ?Sized> {
    build: Arc<BuildDocumentService<S>>,
}

impl<S: ?Sized> Clone for DocumentConnector<S> {
    fn clone(&self) -> Self {
        Self { build: Arc::clone(&self.build) }
    }
}

impl<S: ?Sized> fmt::Debug for DocumentConnector<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentConnector").finish_non_exhaustive()
    }
}

impl<S: DocumentService + ?Sized + 'static> DocumentConnector<S> {
    /// Uses `build` to create a client for the parsed account settings.
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(&DocumentAccount) -> Result<Arc<S>> + Send + Sync + 'static,
    {
        Self { build: Arc::new(build) }
    }

    /// Hands every engine the same client. The connection string is still
    /// validated.
    pub fn from_service(service: Arc<S>) -> Self {
        Self::new(move |_| Ok(Arc::clone(&service)))
    }

    /// Erases the connector for [`EngineFactory::register`](fleetsim_storage::EngineFactory::register).
    #[must_use]
    pub fn into_shared(self) -> SharedConnector {
        connector::shared::<DocumentAdapter<S>, _>(self)
    }
}

#[async_trait]
impl<S: DocumentService + ?Sized + 'static> Connector<DocumentAdapter<S>> for DocumentConnector<S> {
    async fn connect(&self, config: &StorageConfig) -> StorageResult<DocumentAdapter<S>> {
        let conn = ConnectionString::parse(config.connection_string())?;
        let account = DocumentAccount::from_connection_string(&conn)?;
        let service = (self.build)(&account)?;
        tracing::debug!(endpoint = account.endpoint(), "document service client built");
        Ok(DocumentAdapter::new(service, config.throughput()))
    }
}
