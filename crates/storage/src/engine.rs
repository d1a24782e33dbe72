//! The record store engine.
//!
//! [`Engine`] layers expiration filtering and lease locking on top of any
//! [`BackendAdapter`]. The engine never holds a per-record mutex: every
//! coordination decision is settled by a conditional write, so engines in
//! different processes that share a backend coordinate exactly like engines
//! in one process.
//!
//! # Lifecycle
//!
//! 1. [`Engine::new`] stores a [`Connector`]; nothing is contacted yet
//! 2. [`Engine::init`] validates and publishes the configuration (first call wins)
//! 3. The first data operation connects the adapter and provisions the collection
//!
//! # Error policy
//!
//! Direct CRUD surfaces [`StorageError::NotFound`], [`StorageError::Conflict`]
//! and [`StorageError::ExternalDependency`] to the caller. The lock paths
//! collapse lost races and backend failures on the write into `Ok(false)`,
//! because contention is the normal case when many workers race for the same
//! record. Cleanup of expired records is best effort: failures are logged and
//! counted, never returned.

use std::{fmt, sync::Arc};

use futures_util::future::join_all;
use tokio::sync::OnceCell;

use crate::{
    adapter::{AdapterError, BackendAdapter, CollectionRef, WriteCondition},
    clock::now_utc_ms,
    config::{LockRetryConfig, StorageConfig},
    connector::Connector,
    error::{StorageError, StorageResult},
    init::{InitGate, InitState},
    metrics::{EngineMetrics, MetricsSnapshot},
    record::Record,
    retry,
};

/// Settings published by [`Engine::init`].
#[derive(Debug)]
struct Bound {
    config: StorageConfig,
    collection: CollectionRef,
}

/// One failed delete inside [`Engine::delete_multi`].
#[derive(Debug, Clone)]
pub struct BulkDeleteFailure {
    /// The id that could not be deleted.
    pub id: String,
    /// Why.
    pub error: StorageError,
}

/// Outcome of [`Engine::delete_multi`].
#[derive(Debug, Clone, Default)]
pub struct BulkDeleteStats {
    /// Number of ids submitted.
    pub requested: usize,
    /// Ids that are gone after the call, including ones that were already absent.
    pub deleted: usize,
    /// Ids whose delete failed.
    pub failures: Vec<BulkDeleteFailure>,
}

impl BulkDeleteStats {
    /// Returns `true` if every id was deleted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.deleted == self.requested
    }
}

/// Record store bound to one collection of one backend.
pub struct Engine<A> {
    connector: Arc<dyn Connector<A>>,
    bound: InitGate<Bound>,
    adapter: OnceCell<A>,
    metrics: EngineMetrics,
}

impl<A> fmt::Debug for Engine<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.bound.state())
            .field("connected", &self.adapter.initialized())
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

impl<A: BackendAdapter + 'static> Engine<A> {
    /// Creates an uninitialized engine that will obtain its adapter from
    /// `connector`.
    pub fn new(connector: impl Connector<A> + 'static) -> Self {
        Self {
            connector: Arc::new(connector),
            bound: InitGate::new(),
            adapter: OnceCell::new(),
            metrics: EngineMetrics::new(),
        }
    }

    /// Binds the engine to the configured collection.
    ///
    /// Idempotent: the first call wins and later calls return `Ok(())`
    /// without looking at their argument. A call that races the first one
    /// returns only after the winner's configuration is visible.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] if the first configuration offered is
    /// invalid. The engine stays uninitialized in that case.
    pub fn init(&self, config: StorageConfig) -> StorageResult<()> {
        if self.bound.state() != InitState::Uninitialized {
            // A concurrent first call may still be publishing.
            self.bound.wait_ready();
            tracing::debug!("storage engine already initialized");
            return Ok(());
        }

        config.validate()?;
        let collection = config.collection_ref();
        if self.bound.initialize(Bound { config, collection }) {
            tracing::debug!("storage engine initialized");
        }
        Ok(())
    }

    /// Returns `true` once [`init`](Self::init) has completed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.bound.state() == InitState::Ready
    }

    /// Returns the configuration the engine was initialized with.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Uninitialized`] before [`init`](Self::init).
    pub fn config(&self) -> StorageResult<&StorageConfig> {
        self.bound().map(|b| &b.config)
    }

    /// Returns the collection this engine is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Uninitialized`] before [`init`](Self::init).
    pub fn collection(&self) -> StorageResult<&CollectionRef> {
        self.bound().map(|b| &b.collection)
    }

    /// Returns a snapshot of the engine counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Builds an unattached record. No I/O.
    #[must_use]
    pub fn build_record(&self, id: impl Into<String>) -> Record {
        Record::new(id)
    }

    /// Builds an unattached record carrying `data`. No I/O.
    #[must_use]
    pub fn build_record_with_data(&self, id: impl Into<String>, data: impl Into<String>) -> Record {
        Record::with_data(id, data)
    }

    /// Reads a live record.
    ///
    /// An expired record is deleted on the spot (best effort) and reported as
    /// not found.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the record is absent or expired
    /// - [`StorageError::ExternalDependency`] on backend failure
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StorageResult<Record> {
        let (adapter, collection) = self.connected().await?;
        self.metrics.record_get();

        let record = adapter.read(collection, id).await.map_err(|e| self.classify(id, e))?;
        if record.is_expired() {
            self.purge_expired(adapter, collection, id).await;
            self.metrics.record_not_found();
            return Err(StorageError::not_found(id));
        }
        Ok(record)
    }

    /// Returns `true` if a live record with `id` exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ExternalDependency`] on backend failure.
    #[tracing::instrument(skip(self))]
    pub async fn exists(&self, id: &str) -> StorageResult<bool> {
        match self.get(id).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns every live record in the collection, in no particular order.
    ///
    /// Expired records found during the scan are deleted (best effort).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ExternalDependency`] if the scan fails.
    #[tracing::instrument(skip(self))]
    pub async fn get_all(&self) -> StorageResult<Vec<Record>> {
        let (adapter, collection) = self.connected().await?;
        self.metrics.record_scan();

        let records = adapter.list_all(collection).await.map_err(|e| self.classify("*", e))?;
        let now_ms = now_utc_ms();
        let (expired, live): (Vec<_>, Vec<_>) =
            records.into_iter().partition(|r| r.is_expired_at(now_ms));

        for record in &expired {
            self.purge_expired(adapter, collection, record.id()).await;
        }
        if !expired.is_empty() {
            tracing::debug!(expired = expired.len(), live = live.len(), "filtered expired records");
        }
        Ok(live)
    }

    /// Stores a new record and returns it with its first concurrency token.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`] if the id already exists
    /// - [`StorageError::ExternalDependency`] on backend failure
    #[tracing::instrument(skip(self, record), fields(id = %record.id()))]
    pub async fn create(&self, mut record: Record) -> StorageResult<Record> {
        let (adapter, collection) = self.connected().await?;
        record.touch();

        let stored =
            adapter.create(collection, &record).await.map_err(|e| self.classify(record.id(), e))?;
        self.metrics.record_create();
        Ok(stored)
    }

    /// Writes `record` conditioned on the token it carries.
    ///
    /// A record with an empty token is written unconditionally.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`] if the stored token differs
    /// - [`StorageError::ExternalDependency`] on backend failure
    #[tracing::instrument(skip(self, record), fields(id = %record.id()))]
    pub async fn upsert(&self, record: Record) -> StorageResult<Record> {
        let condition = WriteCondition::from_token(record.concurrency_token());
        self.write(record, &condition).await
    }

    /// Writes `record` conditioned on an explicit `token`.
    ///
    /// Lets a caller that mutated a record keep the token it originally read.
    /// An empty token (or `*`) writes unconditionally.
    ///
    /// # Errors
    ///
    /// Same as [`upsert`](Self::upsert).
    #[tracing::instrument(skip(self, record, token), fields(id = %record.id()))]
    pub async fn upsert_with_token(&self, record: Record, token: &str) -> StorageResult<Record> {
        self.write(record, &WriteCondition::from_token(token)).await
    }

    /// Deletes a record. Deleting an absent record succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ExternalDependency`] on backend failure.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StorageResult<()> {
        let (adapter, collection) = self.connected().await?;
        self.delete_one(adapter, collection, id).await
    }

    /// Deletes many records, keeping at most `max_pending_operations`
    /// deletes in flight.
    ///
    /// Deletes are issued in waves; each wave is awaited in full before the
    /// next starts. Individual failures are collected in the returned stats
    /// and do not stop the remaining waves.
    ///
    /// # Errors
    ///
    /// Returns an error only if the engine cannot reach its adapter at all.
    #[tracing::instrument(skip(self, ids))]
    pub async fn delete_multi<I, S>(&self, ids: I) -> StorageResult<BulkDeleteStats>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (adapter, collection) = self.connected().await?;
        let bound = self.bound()?.config.max_pending_operations();
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();

        let mut stats = BulkDeleteStats { requested: ids.len(), ..BulkDeleteStats::default() };
        for wave in ids.chunks(bound) {
            let results = join_all(wave.iter().map(|id| async move {
                (id, self.delete_one(adapter, collection, id).await)
            }))
            .await;

            for (id, result) in results {
                match result {
                    Ok(()) => stats.deleted += 1,
                    Err(error) => {
                        tracing::warn!(id = %id, error = %error, "bulk delete failed for record");
                        stats.failures.push(BulkDeleteFailure { id: id.clone(), error });
                    },
                }
            }
        }

        tracing::debug!(
            requested = stats.requested,
            deleted = stats.deleted,
            failed = stats.failures.len(),
            "bulk delete finished"
        );
        Ok(stats)
    }

    /// Tries to take the lock on record `id` for `duration_seconds`.
    ///
    /// Returns `Ok(true)` if the caller now holds the lock (re-locking an
    /// owned lock extends it). Returns `Ok(false)` if another owner holds an
    /// unexpired lock, or if reading or writing the record failed at the
    /// backend. Callers retry on `false`.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the record does not exist
    /// - [`StorageError::Uninitialized`] or [`StorageError::Config`] if the
    ///   engine cannot reach a backend at all
    #[tracing::instrument(skip(self))]
    pub async fn try_to_lock(
        &self,
        id: &str,
        owner_id: &str,
        owner_type: &str,
        duration_seconds: u64,
    ) -> StorageResult<bool> {
        let Some(mut record) = self.read_for_lock(id, "lock").await? else {
            self.metrics.record_lock_failed();
            return Ok(false);
        };

        let now_ms = now_utc_ms();
        if record.is_locked_by_others_at(owner_id, owner_type, now_ms) {
            tracing::debug!(
                holder_id = record.lock_owner_id(),
                holder_type = record.lock_owner_type(),
                "record locked by another owner"
            );
            self.metrics.record_lock_contended();
            return Ok(false);
        }

        record.touch_at(now_ms);
        record.lock_at(owner_id, owner_type, duration_seconds, now_ms);

        match self.write_conditional(record).await {
            Ok(_) => {
                self.metrics.record_lock_acquired();
                Ok(true)
            },
            Err(e) => {
                self.log_lost_write("lock", &e);
                self.metrics.record_lock_failed();
                Ok(false)
            },
        }
    }

    /// Tries to release the caller's lock on record `id`.
    ///
    /// Returns `Ok(true)` if the record ends up unlocked (including when it
    /// was not locked at all). Returns `Ok(false)` if another owner holds an
    /// unexpired lock, or if reading or writing the record failed at the
    /// backend.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotFound`] if the record does not exist
    /// - [`StorageError::Uninitialized`] or [`StorageError::Config`] if the
    ///   engine cannot reach a backend at all
    #[tracing::instrument(skip(self))]
    pub async fn try_to_unlock(
        &self,
        id: &str,
        owner_id: &str,
        owner_type: &str,
    ) -> StorageResult<bool> {
        let Some(mut record) = self.read_for_lock(id, "unlock").await? else {
            self.metrics.record_unlock_refused();
            return Ok(false);
        };

        let now_ms = now_utc_ms();
        if !record.is_locked_at(now_ms) {
            self.metrics.record_unlock();
            return Ok(true);
        }

        if !record.can_unlock_at(owner_id, owner_type, now_ms) {
            tracing::debug!(
                holder_id = record.lock_owner_id(),
                holder_type = record.lock_owner_type(),
                "unlock refused, record locked by another owner"
            );
            self.metrics.record_unlock_refused();
            return Ok(false);
        }

        record.touch_at(now_ms);
        if let Err(e) = record.unlock_at(owner_id, owner_type, now_ms) {
            self.log_lost_write("unlock", &e);
            self.metrics.record_unlock_refused();
            return Ok(false);
        }

        match self.write_conditional(record).await {
            Ok(_) => {
                self.metrics.record_unlock();
                Ok(true)
            },
            Err(e) => {
                self.log_lost_write("unlock", &e);
                self.metrics.record_unlock_refused();
                Ok(false)
            },
        }
    }

    /// Calls [`try_to_lock`](Self::try_to_lock) until it wins or `policy`
    /// runs out of attempts, sleeping with exponential backoff and jitter
    /// between attempts.
    ///
    /// Pass `engine.config()?.lock_retry()` to use the configured policy.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`try_to_lock`](Self::try_to_lock).
    #[tracing::instrument(skip(self, policy), fields(max_attempts = policy.max_attempts))]
    pub async fn lock_with_retry(
        &self,
        id: &str,
        owner_id: &str,
        owner_type: &str,
        duration_seconds: u64,
        policy: &LockRetryConfig,
    ) -> StorageResult<bool> {
        retry::retry_until_acquired(policy, || {
            self.try_to_lock(id, owner_id, owner_type, duration_seconds)
        })
        .await
    }

    /// Connects if necessary and checks that the backend responds.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Uninitialized`] before [`init`](Self::init)
    /// - [`StorageError::ExternalDependency`] if the backend is unhealthy
    #[tracing::instrument(skip(self))]
    pub async fn health_check(&self) -> StorageResult<()> {
        let (adapter, _) = self.connected().await?;
        adapter.health_check().await.map_err(|e| match e {
            AdapterError::Backend { .. } => StorageError::from_adapter("", e),
            other => StorageError::external_with_source("health check failed", other),
        })
    }

    fn bound(&self) -> StorageResult<&Bound> {
        self.bound.get().ok_or(StorageError::Uninitialized)
    }

    /// Returns the adapter, connecting and provisioning the collection on
    /// first use. Concurrent first callers share one connection attempt.
    async fn connected(&self) -> StorageResult<(&A, &CollectionRef)> {
        let bound = self.bound()?;
        let adapter = self
            .adapter
            .get_or_try_init(|| async {
                let adapter = self.connector.connect(&bound.config).await?;
                adapter
                    .ensure_collection_exists(&bound.collection)
                    .await
                    .map_err(|e| provisioning_error(&bound.collection, e))?;
                tracing::info!(
                    backend = adapter.name(),
                    collection = %bound.collection,
                    "storage adapter connected"
                );
                Ok::<_, StorageError>(adapter)
            })
            .await?;
        Ok((adapter, &bound.collection))
    }

    async fn write(&self, mut record: Record, condition: &WriteCondition) -> StorageResult<Record> {
        let (adapter, collection) = self.connected().await?;
        record.touch();

        let stored = adapter
            .upsert(collection, &record, condition)
            .await
            .map_err(|e| self.classify(record.id(), e))?;
        self.metrics.record_upsert();
        Ok(stored)
    }

    /// Writes a record conditioned on the token read with it. Used by the
    /// lock paths, which have already stamped the record.
    async fn write_conditional(&self, record: Record) -> StorageResult<Record> {
        let (adapter, collection) = self.connected().await?;
        let condition = WriteCondition::from_token(record.concurrency_token());

        let stored = adapter
            .upsert(collection, &record, &condition)
            .await
            .map_err(|e| self.classify(record.id(), e))?;
        self.metrics.record_upsert();
        Ok(stored)
    }

    async fn delete_one(&self, adapter: &A, collection: &CollectionRef, id: &str) -> StorageResult<()> {
        self.metrics.record_delete();
        match adapter.delete(collection, id).await {
            Ok(()) | Err(AdapterError::NotFound) => Ok(()),
            Err(e) => Err(self.classify(id, e)),
        }
    }

    async fn purge_expired(&self, adapter: &A, collection: &CollectionRef, id: &str) {
        self.metrics.record_delete();
        match adapter.delete(collection, id).await {
            Ok(()) => {
                self.metrics.record_expired_purged();
                tracing::debug!(id, "deleted expired record");
            },
            // Someone else purged it first.
            Err(AdapterError::NotFound) => {},
            Err(e) => {
                self.metrics.record_cleanup_failure();
                tracing::warn!(id, error = %e, "failed to delete expired record");
            },
        }
    }

    /// Converts an adapter error and counts it.
    fn classify(&self, id: &str, err: AdapterError) -> StorageError {
        let err = StorageError::from_adapter(id, err);
        match &err {
            StorageError::NotFound { .. } => self.metrics.record_not_found(),
            StorageError::Conflict { .. } => self.metrics.record_conflict(),
            _ => self.metrics.record_backend_error(),
        }
        err
    }

    /// Reads the record a lock operation works on. Backend failures yield
    /// `None` so the caller reports `false`; a missing record and structural
    /// errors propagate.
    async fn read_for_lock(
        &self,
        id: &str,
        operation: &'static str,
    ) -> StorageResult<Option<Record>> {
        match self.get(id).await {
            Ok(record) => Ok(Some(record)),
            Err(e @ StorageError::NotFound { .. }) => Err(e),
            Err(e) if e.is_structural() => Err(e),
            Err(e) => {
                tracing::warn!(operation, error = %e, "lock read failed");
                Ok(None)
            },
        }
    }

    fn log_lost_write(&self, operation: &'static str, err: &StorageError) {
        match err {
            StorageError::Conflict { .. } | StorageError::NotFound { .. } => {
                tracing::debug!(operation, error = %err, "lost race on conditional write");
            },
            _ => tracing::warn!(operation, error = %err, "conditional write failed"),
        }
    }
}

/// Wraps a provisioning failure with the collection name, keeping the
/// backend's retryability.
fn provisioning_error(collection: &CollectionRef, err: AdapterError) -> StorageError {
    match err {
        AdapterError::Backend { message, transient, source } => StorageError::ExternalDependency {
            message: format!("failed to provision collection {collection}: {message}"),
            transient,
            source,
        },
        other => StorageError::external_with_source(
            format!("failed to provision collection {collection}"),
            other,
        ),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdapter;

    fn config() -> StorageConfig {
        StorageConfig::builder().storage_type("memory").collection("partitions").build().unwrap()
    }

    fn engine() -> Engine<MemoryAdapter> {
        let engine = Engine::new(MemoryAdapter::new());
        engine.init(config()).unwrap();
        engine
    }

    #[tokio::test]
    async fn test_uninitialized_engine_refuses_operations() {
        let engine = Engine::new(MemoryAdapter::new());
        assert!(!engine.is_initialized());
        assert!(matches!(engine.get("a").await, Err(StorageError::Uninitialized)));
        assert!(matches!(engine.delete_multi(["a"]).await, Err(StorageError::Uninitialized)));
        assert!(matches!(engine.collection(), Err(StorageError::Uninitialized)));
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let engine = engine();
        let other = StorageConfig::builder().storage_type("memory").collection("other").build().unwrap();
        engine.init(other).unwrap();
        assert_eq!(engine.collection().unwrap().collection, "partitions");
    }

    #[tokio::test]
    async fn test_invalid_config_leaves_engine_uninitialized() {
        let engine = Engine::new(MemoryAdapter::new());
        let mut config = config();
        config.max_pending_operations = 0;
        assert!(matches!(engine.init(config), Err(StorageError::Config(_))));
        assert!(!engine.is_initialized());
        engine.init(self::config()).unwrap();
        assert!(engine.is_initialized());
    }

    #[tokio::test]
    async fn test_build_record_does_no_io() {
        let engine = Engine::new(MemoryAdapter::new());
        let record = engine.build_record_with_data("p-1", "{}");
        assert_eq!(record.id(), "p-1");
        assert!(record.concurrency_token().is_empty());
        assert_eq!(engine.metrics(), MetricsSnapshot::default());
    }

    #[tokio::test]
    async fn test_create_stamps_last_modified() {
        let engine = engine();
        let before = now_utc_ms();
        let stored = engine.create(engine.build_record("a")).await.unwrap();
        assert!(stored.last_modified_utc_ms() >= before);
    }

    #[tokio::test]
    async fn test_upsert_with_empty_token_is_unconditional() {
        let engine = engine();
        engine.create(engine.build_record_with_data("a", "1")).await.unwrap();
        let stored = engine.upsert_with_token(engine.build_record_with_data("a", "2"), "").await.unwrap();
        assert_eq!(stored.data(), "2");
    }

    #[tokio::test]
    async fn test_relock_by_owner_extends() {
        let engine = engine();
        engine.create(engine.build_record("a")).await.unwrap();
        assert!(engine.try_to_lock("a", "n1", "partition", 5).await.unwrap());
        let first = engine.get("a").await.unwrap().lock_expires_at_utc_ms();
        assert!(engine.try_to_lock("a", "n1", "partition", 50).await.unwrap());
        let second = engine.get("a").await.unwrap().lock_expires_at_utc_ms();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_unlock_of_unlocked_record_succeeds() {
        let engine = engine();
        engine.create(engine.build_record("a")).await.unwrap();
        assert!(engine.try_to_unlock("a", "anyone", "partition").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_missing_record_is_not_found() {
        let engine = engine();
        let err = engine.try_to_lock("ghost", "n1", "partition", 5).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_metrics_track_lock_outcomes() {
        let engine = engine();
        engine.create(engine.build_record("a")).await.unwrap();
        assert!(engine.try_to_lock("a", "n1", "partition", 30).await.unwrap());
        assert!(!engine.try_to_lock("a", "n2", "partition", 30).await.unwrap());
        assert!(!engine.try_to_unlock("a", "n2", "partition").await.unwrap());

        let m = engine.metrics();
        assert_eq!(m.creates, 1);
        assert_eq!(m.locks_acquired, 1);
        assert_eq!(m.locks_contended, 1);
        assert_eq!(m.unlocks_refused, 1);
        assert_eq!(m.lock_attempts(), 2);
    }

    #[tokio::test]
    async fn test_health_check() {
        let engine = engine();
        engine.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_bulk_delete_stats() {
        let engine = engine();
        for id in ["a", "b", "c"] {
            engine.create(engine.build_record(id)).await.unwrap();
        }
        let stats = engine.delete_multi(["a", "b", "c", "missing"]).await.unwrap();
        assert_eq!(stats.requested, 4);
        assert_eq!(stats.deleted, 4);
        assert!(stats.is_complete());
        assert!(engine.get_all().await.unwrap().is_empty());
    }

    #[test]
    fn test_racing_init_calls_all_see_configuration() {
        let engine = Engine::new(MemoryAdapter::new());
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    engine.init(config()).unwrap();
                    assert!(engine.is_initialized());
                    assert!(engine.collection().is_ok());
                });
            }
        });
    }

    #[tokio::test]
    async fn test_lock_before_init_is_uninitialized() {
        let engine = Engine::new(MemoryAdapter::new());
        assert!(matches!(
            engine.try_to_lock("a", "node-a", "device", 30).await,
            Err(StorageError::Uninitialized)
        ));
        assert!(matches!(
            engine.try_to_unlock("a", "node-a", "device").await,
            Err(StorageError::Uninitialized)
        ));
    }
}
