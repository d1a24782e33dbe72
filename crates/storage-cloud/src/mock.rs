//! In-process stand-ins for the document and table services.
//!
//! The mocks follow the services' observable behavior closely enough to run
//! the engine [`conformance`](fleetsim_storage::conformance) suite: writes
//! are atomic, every write assigns a new entity tag, and conditional writes
//! fail with the same statuses and codes the real services return.
//!
//! Both mocks count calls per [`MockOp`] and can be told to fail the next
//! call of an operation with a given [`ServiceError`].

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    document::DocumentService,
    error::{
        CODE_ENTITY_ALREADY_EXISTS, CODE_RESOURCE_NOT_FOUND, CODE_UPDATE_CONDITION_NOT_SATISFIED,
        ServiceError, ServiceResult,
    },
    table::{TableEntity, TableService},
};

/// A mocked service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// Database, container or table creation.
    Provision,
    /// Point read.
    Read,
    /// Insert.
    Create,
    /// Insert-or-replace.
    Upsert,
    /// Point delete.
    Delete,
    /// Query or scan.
    Query,
    /// Reachability check.
    Ping,
}

/// Call counting and failure injection shared by both mocks.
#[derive(Debug, Default)]
struct Instrumentation {
    calls: HashMap<MockOp, usize>,
    failures: HashMap<MockOp, VecDeque<ServiceError>>,
}

impl Instrumentation {
    fn enter(&mut self, op: MockOp) -> ServiceResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Document service
// ============================================================================

#[derive(Debug, Default)]
struct Container {
    throughput: u32,
    documents: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct DocumentState {
    databases: BTreeSet<String>,
    containers: HashMap<(String, String), Container>,
    etag_sequence: u64,
    instrumentation: Instrumentation,
}

impl DocumentState {
    fn container(&mut self, database: &str, container: &str) -> ServiceResult<&mut Container> {
        self.containers
            .get_mut(&(database.to_owned(), container.to_owned()))
            .ok_or_else(|| ServiceError::not_found(format!("container {database}/{container}")))
    }

    fn next_etag(&mut self) -> String {
        self.etag_sequence += 1;
        format!("\"{:08x}-0000\"", self.etag_sequence)
    }
}

fn document_id(document: &Value) -> ServiceResult<String> {
    document
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| ServiceError::new(400, "document has no string id"))
}

fn document_etag(document: &Value) -> Option<&str> {
    document.get("_etag").and_then(Value::as_str)
}

fn stamp(mut document: Value, etag: String) -> Value {
    if let Value::Object(fields) = &mut document {
        fields.insert("_etag".to_owned(), Value::String(etag));
    }
    document
}

/// An in-memory [`DocumentService`].
#[derive(Debug, Default)]
pub struct MockDocumentService {
    state: Mutex<DocumentState>,
}

impl MockDocumentService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next call of `op` with `err`. Queued failures are consumed
    /// in order.
    pub fn fail_next(&self, op: MockOp, err: ServiceError) {
        self.state.lock().instrumentation.failures.entry(op).or_default().push_back(err);
    }

    /// Number of calls made to `op`, including failed ones.
    #[must_use]
    pub fn calls(&self, op: MockOp) -> usize {
        self.state.lock().instrumentation.calls.get(&op).copied().unwrap_or(0)
    }

    /// Provisioned throughput of a container, if it exists.
    #[must_use]
    pub fn throughput(&self, database: &str, container: &str) -> Option<u32> {
        let state = self.state.lock();
        state.containers.get(&(database.to_owned(), container.to_owned())).map(|c| c.throughput)
    }

    /// The stored document, exactly as the service holds it.
    #[must_use]
    pub fn document(&self, database: &str, container: &str, id: &str) -> Option<Value> {
        let state = self.state.lock();
        state
            .containers
            .get(&(database.to_owned(), container.to_owned()))
            .and_then(|c| c.documents.get(id).cloned())
    }

    /// Stores a raw document, bypassing the adapter.
    pub fn put_raw(&self, database: &str, container: &str, document: Value) {
        let mut state = self.state.lock();
        let etag = state.next_etag();
        let Ok(id) = document_id(&document) else {
            return;
        };
        state
            .containers
            .entry((database.to_owned(), container.to_owned()))
            .or_default()
            .documents
            .insert(id, stamp(document, etag));
    }
}

#[async_trait]
impl DocumentService for MockDocumentService {
    async fn create_database_if_not_exists(&self, database: &str) -> ServiceResult<()> {
        let mut state = self.state.lock();
        state.instrumentation.enter(MockOp::Provision)?;
        state.databases.insert(database.to_owned());
        Ok(())
    }

    async fn create_container_if_not_exists(
        &self,
        database: &str,
        container: &str,
        throughput: u32,
    ) -> ServiceResult<()> {
        let mut state = self.state.lock();
        state.instrumentation.enter(MockOp::Provision)?;
        if !state.databases.contains(database) {
            return Err(ServiceError::not_found(format!("database {database}")));
        }
        state
            .containers
            .entry((database.to_owned(), container.to_owned()))
            .or_insert_with(|| Container { throughput, documents: BTreeMap::new() });
        Ok(())
    }

    async fn read_document(&self, database: &str, container: &str, id: &str) -> ServiceResult<Value> {
        let mut state = self.state.lock();
        state.instrumentation.enter(MockOp::Read)?;
        state
            .container(database, container)?
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceError::not_found(format!("document {id}")))
    }

    async fn create_document(
        &self,
        database: &str,
        container: &str,
        document: Value,
    ) -> ServiceResult<Value> {
        let mut state = self.state.lock();
        state.instrumentation.enter(MockOp::Create)?;
        let id = document_id(&document)?;
        let etag = state.next_etag();
        let documents = &mut state.container(database, container)?.documents;

        if documents.contains_key(&id) {
            return Err(ServiceError::conflict(format!("document {id} exists")));
        }
        let stored = stamp(document, etag);
        documents.insert(id, stored.clone());
        Ok(stored)
    }

    async fn upsert_document(
        &self,
        database: &str,
        container: &str,
        document: Value,
        if_match: Option<&str>,
    ) -> ServiceResult<Value> {
        let mut state = self.state.lock();
        state.instrumentation.enter(MockOp::Upsert)?;
        let id = document_id(&document)?;
        let etag = state.next_etag();
        let documents = &mut state.container(database, container)?.documents;

        if let Some(expected) = if_match {
            let current = documents.get(&id).and_then(document_etag);
            if current != Some(expected) {
                return Err(ServiceError::precondition_failed(format!("etag mismatch on {id}")));
            }
        }
        let stored = stamp(document, etag);
        documents.insert(id, stored.clone());
        Ok(stored)
    }

    async fn delete_document(&self, database: &str, container: &str, id: &str) -> ServiceResult<()> {
        let mut state = self.state.lock();
        state.instrumentation.enter(MockOp::Delete)?;
        state
            .container(database, container)?
            .documents
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ServiceError::not_found(format!("document {id}")))
    }

    async fn query_documents(
        &self,
        database: &str,
        container: &str,
        query: &str,
    ) -> ServiceResult<Vec<Value>> {
        let mut state = self.state.lock();
        state.instrumentation.enter(MockOp::Query)?;
        if !query.trim().eq_ignore_ascii_case(crate::document::SELECT_ALL) {
            return Err(ServiceError::new(400, format!("unsupported query: {query}")));
        }
        Ok(state.container(database, container)?.documents.values().cloned().collect())
    }

    async fn ping(&self) -> ServiceResult<()> {
        self.state.lock().instrumentation.enter(MockOp::Ping)
    }
}

// ============================================================================
// Table service
// ============================================================================

type Table = BTreeMap<(String, String), TableEntity>;

#[derive(Debug, Default)]
struct TableState {
    tables: HashMap<String, Table>,
    etag_sequence: u64,
    instrumentation: Instrumentation,
}

impl TableState {
    fn table(&mut self, name: &str) -> ServiceResult<&mut Table> {
        self.tables.get_mut(name).ok_or_else(|| {
            ServiceError::not_found(format!("table {name}")).with_code("TableNotFound")
        })
    }

    fn next_etag(&mut self) -> String {
        self.etag_sequence += 1;
        format!("W/\"datetime'{:020}'\"", self.etag_sequence)
    }
}

fn entity_not_found(partition_key: &str) -> ServiceError {
    ServiceError::not_found(format!("entity {partition_key}")).with_code(CODE_RESOURCE_NOT_FOUND)
}

/// An in-memory [`TableService`].
#[derive(Debug, Default)]
pub struct MockTableService {
    state: Mutex<TableState>,
}

impl MockTableService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next call of `op` with `err`.
    pub fn fail_next(&self, op: MockOp, err: ServiceError) {
        self.state.lock().instrumentation.failures.entry(op).or_default().push_back(err);
    }

    /// Number of calls made to `op`, including failed ones.
    #[must_use]
    pub fn calls(&self, op: MockOp) -> usize {
        self.state.lock().instrumentation.calls.get(&op).copied().unwrap_or(0)
    }

    /// Returns `true` if `table` has been created.
    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.state.lock().tables.contains_key(table)
    }

    /// The stored entity, exactly as the service holds it.
    #[must_use]
    pub fn entity(&self, table: &str, partition_key: &str, row_key: &str) -> Option<TableEntity> {
        let state = self.state.lock();
        state
            .tables
            .get(table)
            .and_then(|t| t.get(&(partition_key.to_owned(), row_key.to_owned())).cloned())
    }

    /// Number of entities in `table`.
    #[must_use]
    pub fn len(&self, table: &str) -> usize {
        self.state.lock().tables.get(table).map_or(0, BTreeMap::len)
    }

    /// Returns `true` if `table` holds no entities.
    #[must_use]
    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

/// Supports `RowKey eq '<value>'`, the only filter the adapter issues.
fn row_key_filter(filter: &str) -> ServiceResult<&str> {
    filter
        .trim()
        .strip_prefix("RowKey eq '")
        .and_then(|rest| rest.strip_suffix('\''))
        .ok_or_else(|| ServiceError::new(400, format!("unsupported filter: {filter}")))
}

#[async_trait]
impl TableService for MockTableService {
    async fn create_table_if_not_exists(&self, table: &str) -> ServiceResult<()> {
        let mut state = self.state.lock();
        state.instrumentation.enter(MockOp::Provision)?;
        state.tables.entry(table.to_owned()).or_default();
        Ok(())
    }

    async fn get_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> ServiceResult<TableEntity> {
        let mut state = self.state.lock();
        state.instrumentation.enter(MockOp::Read)?;
        state
            .table(table)?
            .get(&(partition_key.to_owned(), row_key.to_owned()))
            .cloned()
            .ok_or_else(|| entity_not_found(partition_key))
    }

    async fn insert_entity(&self, table: &str, entity: TableEntity) -> ServiceResult<TableEntity> {
        let mut state = self.state.lock();
        state.instrumentation.enter(MockOp::Create)?;
        let etag = state.next_etag();
        let rows = state.table(table)?;
        let key = (entity.partition_key.clone(), entity.row_key.clone());

        if rows.contains_key(&key) {
            return Err(ServiceError::conflict(format!("entity {} exists", key.0))
                .with_code(CODE_ENTITY_ALREADY_EXISTS));
        }
        let stored = TableEntity { etag, ..entity };
        rows.insert(key, stored.clone());
        Ok(stored)
    }

    async fn upsert_entity(
        &self,
        table: &str,
        entity: TableEntity,
        if_match: Option<&str>,
    ) -> ServiceResult<TableEntity> {
        let mut state = self.state.lock();
        state.instrumentation.enter(MockOp::Upsert)?;
        let etag = state.next_etag();
        let rows = state.table(table)?;
        let key = (entity.partition_key.clone(), entity.row_key.clone());

        if let Some(expected) = if_match {
            match rows.get(&key) {
                None => return Err(entity_not_found(&key.0)),
                Some(current) if expected != "*" && current.etag != expected => {
                    return Err(ServiceError::precondition_failed(format!("etag mismatch on {}", key.0))
                        .with_code(CODE_UPDATE_CONDITION_NOT_SATISFIED));
                },
                Some(_) => {},
            }
        }
        let stored = TableEntity { etag, ..entity };
        rows.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> ServiceResult<()> {
        let mut state = self.state.lock();
        state.instrumentation.enter(MockOp::Delete)?;
        state
            .table(table)?
            .remove(&(partition_key.to_owned(), row_key.to_owned()))
            .map(|_| ())
            .ok_or_else(|| entity_not_found(partition_key))
    }

    async fn query_entities(&self, table: &str, filter: &str) -> ServiceResult<Vec<TableEntity>> {
        let mut state = self.state.lock();
        state.instrumentation.enter(MockOp::Query)?;
        let row_key = row_key_filter(filter)?;
        Ok(state.table(table)?.values().filter(|e| e.row_key == row_key).cloned().collect())
    }

    async fn ping(&self) -> ServiceResult<()> {
        self.state.lock().instrumentation.enter(MockOp::Ping)
    }
}
