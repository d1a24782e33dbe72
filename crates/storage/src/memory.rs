//! In-memory backend adapter.
//!
//! [`MemoryAdapter`] keeps every collection in a [`BTreeMap`] behind a
//! [`parking_lot::RwLock`]. It honours the full adapter contract, including
//! conditional writes, so engines built on it coordinate exactly like engines
//! built on a cloud backend. Clones share the same data: several engines on
//! clones of one adapter behave like several worker nodes on one store.
//!
//! # Example
//!
//! ```
//! use fleetsim_storage::{Engine, MemoryAdapter, StorageConfig};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let config = StorageConfig::builder().storage_type("memory").collection("nodes").build()?;
//! let engine = Engine::new(MemoryAdapter::new());
//! engine.init(config)?;
//!
//! let stored = engine.create(engine.build_record_with_data("node-1", "{}")).await?;
//! assert!(!stored.concurrency_token().is_empty());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; everything is lost when the last clone drops
//! - Expired records are never removed by the adapter itself

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use fail::fail_point;
use parking_lot::RwLock;
use rand::Rng;

use crate::{
    adapter::{AdapterError, AdapterResult, BackendAdapter, CollectionRef, WriteCondition},
    config::StorageConfig,
    connector::Connector,
    error::StorageResult,
    record::Record,
};

type Collection = BTreeMap<String, Record>;

/// In-memory implementation of [`BackendAdapter`].
#[derive(Clone, Default)]
pub struct MemoryAdapter {
    collections: Arc<RwLock<HashMap<CollectionRef, Collection>>>,
    sequence: Arc<AtomicU64>,
}

impl std::fmt::Debug for MemoryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAdapter")
            .field("collections", &self.collections.read().len())
            .finish_non_exhaustive()
    }
}

impl MemoryAdapter {
    /// Creates an empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if a record with `id` is physically stored, expired or not.
    #[must_use]
    pub fn contains(&self, collection: &CollectionRef, id: &str) -> bool {
        self.collections.read().get(collection).is_some_and(|c| c.contains_key(id))
    }

    /// Returns the number of physically stored records in `collection`.
    #[must_use]
    pub fn len(&self, collection: &CollectionRef) -> usize {
        self.collections.read().get(collection).map_or(0, BTreeMap::len)
    }

    /// Returns `true` if `collection` holds no records.
    #[must_use]
    pub fn is_empty(&self, collection: &CollectionRef) -> bool {
        self.len(collection) == 0
    }

    /// Generates a token that differs from every token issued before it.
    fn next_token(&self) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let salt: u32 = rand::rng().random();
        format!("\"{seq:016x}-{salt:08x}\"")
    }

    fn missing_collection(collection: &CollectionRef) -> AdapterError {
        AdapterError::backend(format!("collection {collection} does not exist"))
    }
}

#[async_trait]
impl BackendAdapter for MemoryAdapter {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_collection_exists(&self, collection: &CollectionRef) -> AdapterResult<()> {
        self.collections.write().entry(collection.clone()).or_default();
        Ok(())
    }

    async fn create(&self, collection: &CollectionRef, record: &Record) -> AdapterResult<Record> {
        let mut collections = self.collections.write();
        let records =
            collections.get_mut(collection).ok_or_else(|| Self::missing_collection(collection))?;

        if records.contains_key(record.id()) {
            return Err(AdapterError::AlreadyExists);
        }

        let mut stored = record.clone();
        stored.set_concurrency_token(self.next_token());
        records.insert(stored.id().to_owned(), stored.clone());
        Ok(stored)
    }

    async fn upsert(
        &self,
        collection: &CollectionRef,
        record: &Record,
        condition: &WriteCondition,
    ) -> AdapterResult<Record> {
        fail_point!("memory-adapter-upsert", |_| {
            Err(AdapterError::transient("injected failure in memory upsert"))
        });

        let mut collections = self.collections.write();
        let records =
            collections.get_mut(collection).ok_or_else(|| Self::missing_collection(collection))?;

        if let WriteCondition::IfMatch(_) = condition {
            match records.get(record.id()) {
                Some(current) if condition.is_satisfied_by(current.concurrency_token()) => {},
                // A conditional write against a vanished record cannot match.
                _ => return Err(AdapterError::PreconditionFailed),
            }
        }

        let mut stored = record.clone();
        stored.set_concurrency_token(self.next_token());
        records.insert(stored.id().to_owned(), stored.clone());
        Ok(stored)
    }

    async fn read(&self, collection: &CollectionRef, id: &str) -> AdapterResult<Record> {
        fail_point!("memory-adapter-read", |_| {
            Err(AdapterError::transient("injected failure in memory read"))
        });

        let collections = self.collections.read();
        let records =
            collections.get(collection).ok_or_else(|| Self::missing_collection(collection))?;
        records.get(id).cloned().ok_or(AdapterError::NotFound)
    }

    async fn delete(&self, collection: &CollectionRef, id: &str) -> AdapterResult<()> {
        fail_point!("memory-adapter-delete", |_| {
            Err(AdapterError::transient("injected failure in memory delete"))
        });

        let mut collections = self.collections.write();
        let records =
            collections.get_mut(collection).ok_or_else(|| Self::missing_collection(collection))?;
        records.remove(id).map(|_| ()).ok_or(AdapterError::NotFound)
    }

    async fn list_all(&self, collection: &CollectionRef) -> AdapterResult<Vec<Record>> {
        let collections = self.collections.read();
        let records =
            collections.get(collection).ok_or_else(|| Self::missing_collection(collection))?;
        Ok(records.values().cloned().collect())
    }

    async fn health_check(&self) -> AdapterResult<()> {
        // Acquiring the read lock proves we are not deadlocked.
        let _unused = self.collections.read();
        Ok(())
    }
}

/// Every engine connected through the same adapter shares its data.
#[async_trait]
impl Connector<MemoryAdapter> for MemoryAdapter {
    async fn connect(&self, _config: &StorageConfig) -> StorageResult<MemoryAdapter> {
        Ok(self.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn coll() -> CollectionRef {
        CollectionRef::new("db", "c")
    }

    async fn adapter() -> MemoryAdapter {
        let adapter = MemoryAdapter::new();
        adapter.ensure_collection_exists(&coll()).await.unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_create_assigns_token() {
        let adapter = adapter().await;
        let stored = adapter.create(&coll(), &Record::with_data("a", "1")).await.unwrap();
        assert!(!stored.concurrency_token().is_empty());
        assert_eq!(adapter.read(&coll(), "a").await.unwrap(), stored);
    }

    #[tokio::test]
    async fn test_create_collision() {
        let adapter = adapter().await;
        adapter.create(&coll(), &Record::new("a")).await.unwrap();
        let err = adapter.create(&coll(), &Record::new("a")).await.unwrap_err();
        assert!(matches!(err, AdapterError::AlreadyExists));
    }

    #[tokio::test]
    async fn test_upsert_checks_token() {
        let adapter = adapter().await;
        let v1 = adapter.create(&coll(), &Record::with_data("a", "1")).await.unwrap();

        let cond = WriteCondition::from_token(v1.concurrency_token());
        let v2 = adapter.upsert(&coll(), &Record::with_data("a", "2"), &cond).await.unwrap();
        assert_ne!(v1.concurrency_token(), v2.concurrency_token());

        let err = adapter.upsert(&coll(), &Record::with_data("a", "3"), &cond).await.unwrap_err();
        assert!(matches!(err, AdapterError::PreconditionFailed));
        assert_eq!(adapter.read(&coll(), "a").await.unwrap().data(), "2");
    }

    #[tokio::test]
    async fn test_conditional_upsert_on_missing_record_fails() {
        let adapter = adapter().await;
        let cond = WriteCondition::IfMatch("\"stale\"".into());
        let err = adapter.upsert(&coll(), &Record::new("ghost"), &cond).await.unwrap_err();
        assert!(matches!(err, AdapterError::PreconditionFailed));
        assert!(!adapter.contains(&coll(), "ghost"));
    }

    #[tokio::test]
    async fn test_wildcard_upsert_inserts() {
        let adapter = adapter().await;
        let stored =
            adapter.upsert(&coll(), &Record::new("fresh"), &WriteCondition::Any).await.unwrap();
        assert!(!stored.concurrency_token().is_empty());
        assert_eq!(adapter.len(&coll()), 1);
    }

    #[tokio::test]
    async fn test_delete_reports_not_found() {
        let adapter = adapter().await;
        adapter.create(&coll(), &Record::new("a")).await.unwrap();
        adapter.delete(&coll(), "a").await.unwrap();
        assert!(matches!(adapter.delete(&coll(), "a").await, Err(AdapterError::NotFound)));
        assert!(adapter.is_empty(&coll()));
    }

    #[tokio::test]
    async fn test_missing_collection_is_backend_error() {
        let adapter = MemoryAdapter::new();
        let err = adapter.read(&coll(), "a").await.unwrap_err();
        assert!(matches!(err, AdapterError::Backend { .. }));
    }

    #[tokio::test]
    async fn test_list_all_is_unfiltered() {
        let adapter = adapter().await;
        let mut expired = Record::new("old");
        expired.set_expires_at_utc_ms(1);
        adapter.create(&coll(), &expired).await.unwrap();
        adapter.create(&coll(), &Record::new("new")).await.unwrap();
        assert_eq!(adapter.list_all(&coll()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_clone_shares_data() {
        let a = adapter().await;
        let b = a.clone();
        a.create(&coll(), &Record::new("shared")).await.unwrap();
        assert!(b.contains(&coll(), "shared"));
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let adapter = adapter().await;
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let stored =
                adapter.upsert(&coll(), &Record::new("a"), &WriteCondition::Any).await.unwrap();
            assert!(seen.insert(stored.concurrency_token().to_owned()));
        }
    }
}
