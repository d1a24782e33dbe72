//! Table service adapter.
//!
//! Each collection is one table. A record is one entity whose partition key
//! is the record id and whose row key is the constant [`RECORD_ROW_KEY`], so
//! every record lives in its own partition.
//!
//! | Record field | Entity property | Type |
//! |--------------|-----------------|------|
//! | `id` | `PartitionKey` | string |
//! | `concurrency_token` | `ETag` | string |
//! | `data` | `Data` | string |
//! | `expires_at_utc_ms` | `ExpiresAtUtcMs` | int64 |
//! | `last_modified_utc_ms` | `LastModifiedUtcMs` | int64 |
//! | `lock_owner_id` | `LockOwnerId` | string |
//! | `lock_owner_type` | `LockOwnerType` | string |
//! | `lock_expires_at_utc_ms` | `LockExpiresAtUtcMs` | int64 |

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use fleetsim_storage::{
    AdapterError, AdapterResult, BackendAdapter, CollectionRef, Connector, NEVER, Record,
    RecordParts, SharedConnector, StorageConfig, StorageResult, WriteCondition, connector,
};

use crate::{
    connection_string::{ConnectionString, TableAccount},
    error::{Result, ServiceResult},
};

/// Row key shared by every record entity.
pub const RECORD_ROW_KEY: &str = "record";

const PROP_DATA: &str = "Data";
const PROP_EXPIRES_AT: &str = "ExpiresAtUtcMs";
const PROP_LAST_MODIFIED: &str = "LastModifiedUtcMs";
const PROP_LOCK_OWNER_ID: &str = "LockOwnerId";
const PROP_LOCK_OWNER_TYPE: &str = "LockOwnerType";
const PROP_LOCK_EXPIRES_AT: &str = "LockExpiresAtUtcMs";

/// A typed entity property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableValue {
    /// `Edm.String`.
    String(String),
    /// `Edm.Int64`.
    Int64(i64),
}

/// A table entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableEntity {
    /// Partition key.
    pub partition_key: String,
    /// Row key.
    pub row_key: String,
    /// Entity tag assigned by the service. Empty on entities not yet written.
    pub etag: String,
    /// Custom properties.
    pub properties: BTreeMap<String, TableValue>,
}

impl TableEntity {
    fn string(&self, name: &'static str) -> AdapterResult<String> {
        match self.properties.get(name) {
            None => Ok(String::new()),
            Some(TableValue::String(value)) => Ok(value.clone()),
            Some(TableValue::Int64(_)) => Err(wrong_type(name, "string")),
        }
    }

    fn int64(&self, name: &'static str, default: i64) -> AdapterResult<i64> {
        match self.properties.get(name) {
            None => Ok(default),
            Some(TableValue::Int64(value)) => Ok(*value),
            Some(TableValue::String(_)) => Err(wrong_type(name, "int64")),
        }
    }
}

fn wrong_type(property: &str, expected: &str) -> AdapterError {
    AdapterError::backend(format!("entity property {property} is not {expected}"))
}

fn encode(record: &Record) -> TableEntity {
    let parts = record.clone().into_parts();
    let properties = BTreeMap::from([
        (PROP_DATA.to_owned(), TableValue::String(parts.data)),
        (PROP_EXPIRES_AT.to_owned(), TableValue::Int64(parts.expires_at_utc_ms)),
        (PROP_LAST_MODIFIED.to_owned(), TableValue::Int64(parts.last_modified_utc_ms)),
        (PROP_LOCK_OWNER_ID.to_owned(), TableValue::String(parts.lock_owner_id)),
        (PROP_LOCK_OWNER_TYPE.to_owned(), TableValue::String(parts.lock_owner_type)),
        (PROP_LOCK_EXPIRES_AT.to_owned(), TableValue::Int64(parts.lock_expires_at_utc_ms)),
    ]);

    TableEntity {
        partition_key: parts.id,
        row_key: RECORD_ROW_KEY.to_owned(),
        etag: String::new(),
        properties,
    }
}

fn decode(entity: TableEntity) -> AdapterResult<Record> {
    Ok(Record::from_parts(RecordParts {
        data: entity.string(PROP_DATA)?,
        expires_at_utc_ms: entity.int64(PROP_EXPIRES_AT, NEVER)?,
        last_modified_utc_ms: entity.int64(PROP_LAST_MODIFIED, 0)?,
        lock_owner_id: entity.string(PROP_LOCK_OWNER_ID)?,
        lock_owner_type: entity.string(PROP_LOCK_OWNER_TYPE)?,
        lock_expires_at_utc_ms: entity.int64(PROP_LOCK_EXPIRES_AT, 0)?,
        id: entity.partition_key,
        concurrency_token: entity.etag,
    }))
}

/// Filter selecting every record entity in a table.
fn record_filter() -> String {
    format!("RowKey eq '{RECORD_ROW_KEY}'")
}

/// Client for a table service.
#[async_trait]
pub trait TableService: Send + Sync {
    /// Creates `table` unless it exists.
    async fn create_table_if_not_exists(&self, table: &str) -> ServiceResult<()>;

    /// Reads an entity.
    async fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> ServiceResult<TableEntity>;

    /// Inserts a new entity; `EntityAlreadyExists` if the keys are taken.
    async fn insert_entity(&self, table: &str, entity: TableEntity) -> ServiceResult<TableEntity>;

    /// Inserts or replaces an entity. With `if_match` this is a conditional
    /// replace: `ResourceNotFound` if the entity is missing,
    /// `UpdateConditionNotSatisfied` if its tag differs.
    async fn upsert_entity(
        &self,
        table: &str,
        entity: TableEntity,
        if_match: Option<&str>,
    ) -> ServiceResult<TableEntity>;

    /// Deletes an entity.
    async fn delete_entity(&self, table: &str, partition_key: &str, row_key: &str)
    -> ServiceResult<()>;

    /// Returns entities matching an OData filter.
    async fn query_entities(&self, table: &str, filter: &str) -> ServiceResult<Vec<TableEntity>>;

    /// Checks that the account is reachable.
    async fn ping(&self) -> ServiceResult<()>;
}

/// [`BackendAdapter`] over a [`TableService`].
///
/// Tables have no database level; [`CollectionRef::database`] is ignored.
pub struct TableAdapter<S: ?Sized> {
    service: Arc<S>,
}

impl<S: ?Sized> Clone for TableAdapter<S> {
    fn clone(&self) -> Self {
        Self { service: Arc::clone(&self.service) }
    }
}

impl<S: ?Sized> fmt::Debug for TableAdapter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableAdapter").finish_non_exhaustive()
    }
}

impl<S: TableService + ?Sized> TableAdapter<S> {
    /// Creates an adapter over `service`.
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }

    /// The underlying service client.
    #[must_use]
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }
}

#[async_trait]
impl<S: TableService + ?Sized> BackendAdapter for TableAdapter<S> {
    fn name(&self) -> &'static str {
        "table"
    }

    async fn ensure_collection_exists(&self, collection: &CollectionRef) -> AdapterResult<()> {
        self.service.create_table_if_not_exists(&collection.collection).await?;
        tracing::debug!(table = %collection.collection, "table ready");
        Ok(())
    }

    async fn create(&self, collection: &CollectionRef, record: &Record) -> AdapterResult<Record> {
        let stored = self.service.insert_entity(&collection.collection, encode(record)).await?;
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
        let result =
            self.service.upsert_entity(&collection.collection, encode(record), if_match).await;

        match result {
            Ok(stored) => decode(stored),
            // A conditional replace of a vanished entity is a lost race, not a miss.
            Err(err) if if_match.is_some() => match err.into_adapter_error() {
                AdapterError::NotFound => Err(AdapterError::PreconditionFailed),
                other => Err(other),
            },
            Err(err) => Err(err.into()),
        }
    }

    async fn read(&self, collection: &CollectionRef, id: &str) -> AdapterResult<Record> {
        let entity = self.service.get_entity(&collection.collection, id, RECORD_ROW_KEY).await?;
        decode(entity)
    }

    async fn delete(&self, collection: &CollectionRef, id: &str) -> AdapterResult<()> {
        self.service.delete_entity(&collection.collection, id, RECORD_ROW_KEY).await?;
        Ok(())
    }

    async fn list_all(&self, collection: &CollectionRef) -> AdapterResult<Vec<Record>> {
        self.service
            .query_entities(&collection.collection, &record_filter())
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

type BuildTableService<S> = dyn Fn(&TableAccount) -> Result<Arc<S>> + Send + Sync;

/// Builds a [`TableAdapter`] from the configured connection string.
///
/// The connection string needs `TableEndpoint`, or `AccountName` and
/// `AccountKey`.
pub struct TableConnector<S: ?Sized> {
    build: Arc<BuildTableService<S>>,
}

impl<S: ?Sized> Clone for TableConnector<S> {
    fn clone(&self) -> Self {
        Self { build: Arc::clone(&self.build) }
    }
}

impl<S: ?Sized> fmt::Debug for TableConnector<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableConnector").finish_non_exhaustive()
    }
}

impl<S: TableService + ?Sized + 'static> TableConnector<S> {
    /// Uses `build` to create a client for the parsed account settings.
    pub fn new<F>(build: F) -> Self
    where
        F: Fn(&TableAccount) -> Result<Arc<S>> + Send + Sync + 'static,
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
        connector::shared::<TableAdapter<S>, _>(self)
    }
}

#[async_trait]
impl<S: TableService + ?Sized + 'static> Connector<TableAdapter<S>> for TableConnector<S> {
    async fn connect(&self, config: &StorageConfig) -> StorageResult<TableAdapter<S>> {
        let conn = ConnectionString::parse(config.connection_string())?;
        let account = TableAccount::from_connection_string(&conn)?;
        let service = (self.build)(&account)?;
        tracing::debug!(endpoint = account.endpoint(), "table service client built");
        Ok(TableAdapter::new(service))
    }
}
