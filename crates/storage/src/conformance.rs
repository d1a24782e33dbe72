//! Conformance test suite for [`BackendAdapter`] implementations.
//!
//! Every function takes a freshly initialized [`Engine`] over the adapter
//! under test and checks one part of the record-store contract. Because the
//! engine owns expiration and locking, an adapter that passes this suite
//! gives callers exactly the coordination guarantees of every other adapter.
//!
//! # Usage
//!
//! ```no_run
//! use fleetsim_storage::{conformance, testutil::memory_engine};
//!
//! #[tokio::test]
//! async fn stale_token_is_conflict() {
//!     conformance::token_stale_write_is_conflict(&memory_engine("c")).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | CRUD | create/get/delete semantics and field round-trip |
//! | Token | optimistic concurrency |
//! | Expiration | expired records read as absent and are purged |
//! | Locking | lease acquisition, contention, expiry, release |
//! | Bulk | bounded bulk delete |
//! | Concurrent | racing writers and lockers |

use std::time::Duration;

use futures_util::future::join_all;

use crate::{
    adapter::BackendAdapter, assert_conflict, assert_not_found, clock::now_utc_ms, engine::Engine,
    error::StorageError,
};

const OWNER_TYPE: &str = "partition";

// ============================================================================
// CRUD
// ============================================================================

/// `get` on an id that was never written is `NotFound`.
pub async fn crud_get_missing_is_not_found<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    assert_not_found!(engine.get("crud-missing").await);
    assert!(!engine.exists("crud-missing").await.expect("exists"));
}

/// Every logical field survives `create` followed by `get`.
pub async fn crud_create_then_get_roundtrips_fields<A: BackendAdapter + 'static>(
    engine: &Engine<A>,
) {
    let mut record = engine.build_record_with_data("crud-roundtrip", r#"{"zone":"eu-1","n":7}"#);
    let expires_at = now_utc_ms() + 3_600_000;
    record.set_expires_at_utc_ms(expires_at);
    record.lock("nodeA", OWNER_TYPE, 600);
    let lock_expires_at = record.lock_expires_at_utc_ms();

    let stored = engine.create(record).await.expect("create");
    let read = engine.get("crud-roundtrip").await.expect("get");

    assert_eq!(read, stored);
    assert_eq!(read.data(), r#"{"zone":"eu-1","n":7}"#);
    assert_eq!(read.expires_at_utc_ms(), expires_at);
    assert_eq!(read.lock_owner_id(), "nodeA");
    assert_eq!(read.lock_owner_type(), OWNER_TYPE);
    assert_eq!(read.lock_expires_at_utc_ms(), lock_expires_at);
    assert!(read.last_modified_utc_ms() > 0);
}

/// `create` on an existing id is `Conflict` and leaves the stored record alone.
pub async fn crud_create_duplicate_is_conflict<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    engine.create(engine.build_record_with_data("crud-dup", "first")).await.expect("create");
    assert_conflict!(engine.create(engine.build_record_with_data("crud-dup", "second")).await);
    assert_eq!(engine.get("crud-dup").await.expect("get").data(), "first");
}

/// `delete` removes the record; deleting it again still succeeds.
pub async fn crud_delete_is_idempotent<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    engine.create(engine.build_record("crud-delete")).await.expect("create");
    engine.delete("crud-delete").await.expect("first delete");
    engine.delete("crud-delete").await.expect("second delete");
    engine.delete("crud-never-existed").await.expect("delete of missing id");
    assert_not_found!(engine.get("crud-delete").await);
}

/// An empty payload is valid and round-trips as empty.
pub async fn crud_empty_payload<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    engine.create(engine.build_record("crud-empty")).await.expect("create");
    assert_eq!(engine.get("crud-empty").await.expect("get").data(), "");
}

/// `get_all` returns every live record.
pub async fn crud_get_all_returns_live_records<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    for i in 0..3 {
        engine.create(engine.build_record(format!("crud-all-{i}"))).await.expect("create");
    }
    let ids: Vec<String> =
        engine.get_all().await.expect("get_all").into_iter().map(|r| r.id().to_owned()).collect();
    for i in 0..3 {
        assert!(ids.contains(&format!("crud-all-{i}")), "missing crud-all-{i} in {ids:?}");
    }
}

// ============================================================================
// Token
// ============================================================================

/// Writes hand back a non-empty token that changes on every write.
pub async fn token_changes_on_every_write<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    let v1 = engine.create(engine.build_record_with_data("tok-seq", "1")).await.expect("create");
    assert!(!v1.concurrency_token().is_empty());

    let mut next = v1.clone();
    next.set_data("2");
    let v2 = engine.upsert(next).await.expect("upsert");

    assert_ne!(v1.concurrency_token(), v2.concurrency_token());
    assert_eq!(engine.get("tok-seq").await.expect("get").concurrency_token(), v2.concurrency_token());
}

/// An upsert carrying a token that someone else already superseded is a
/// `Conflict`, and the other writer's data survives.
pub async fn token_stale_write_is_conflict<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    engine.create(engine.build_record_with_data("tok-stale", "0")).await.expect("create");
    let mut mine = engine.get("tok-stale").await.expect("get");
    let mut theirs = engine.get("tok-stale").await.expect("get");

    theirs.set_data("theirs");
    engine.upsert(theirs).await.expect("out-of-band upsert");

    mine.set_data("mine");
    assert_conflict!(engine.upsert(mine).await);
    assert_eq!(engine.get("tok-stale").await.expect("get").data(), "theirs");
}

/// `upsert_with_token` checks the supplied token, not the record's own.
pub async fn token_explicit_token_is_checked<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    let stored =
        engine.create(engine.build_record_with_data("tok-explicit", "0")).await.expect("create");
    let token = stored.concurrency_token().to_owned();

    let mut edited = stored;
    edited.set_concurrency_token("");
    edited.set_data("1");
    let v2 = engine.upsert_with_token(edited.clone(), &token).await.expect("upsert");

    edited.set_data("2");
    assert_conflict!(engine.upsert_with_token(edited, &token).await);
    assert_eq!(engine.get("tok-explicit").await.expect("get").concurrency_token(), v2.concurrency_token());
}

/// A record without a token (or with the `*` wildcard) is written
/// unconditionally, creating it if needed.
pub async fn token_wildcard_is_unconditional<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    engine.upsert(engine.build_record_with_data("tok-wild", "a")).await.expect("insert");
    engine.upsert(engine.build_record_with_data("tok-wild", "b")).await.expect("overwrite");
    engine
        .upsert_with_token(engine.build_record_with_data("tok-wild", "c"), "*")
        .await
        .expect("wildcard overwrite");
    assert_eq!(engine.get("tok-wild").await.expect("get").data(), "c");
}

// ============================================================================
// Expiration
// ============================================================================

/// An expired record reads as `NotFound` and is physically deleted, so
/// re-creating the id succeeds.
pub async fn expiration_read_purges_record<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    let mut record = engine.build_record("exp-read");
    record.set_expires_at_utc_ms(now_utc_ms() - 1_000);
    engine.create(record).await.expect("create");

    let purged_before = engine.metrics().expired_purged;
    assert_not_found!(engine.get("exp-read").await);
    assert_eq!(engine.metrics().expired_purged, purged_before + 1);

    engine.create(engine.build_record("exp-read")).await.expect("re-create after purge");
}

/// `exists` is `false` for an expired record.
pub async fn expiration_exists_is_false<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    let mut record = engine.build_record("exp-exists");
    record.set_expires_at_utc_ms(now_utc_ms() - 1);
    engine.create(record).await.expect("create");
    assert!(!engine.exists("exp-exists").await.expect("exists"));
}

/// `get_all` omits expired records and purges them.
pub async fn expiration_get_all_filters<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    let mut expired = engine.build_record("exp-all-old");
    expired.set_expires_at_utc_ms(now_utc_ms() - 1);
    engine.create(expired).await.expect("create expired");

    let mut live = engine.build_record("exp-all-new");
    live.expires_in_seconds(3_600);
    engine.create(live).await.expect("create live");

    let ids: Vec<String> =
        engine.get_all().await.expect("get_all").into_iter().map(|r| r.id().to_owned()).collect();
    assert!(ids.contains(&"exp-all-new".to_owned()));
    assert!(!ids.contains(&"exp-all-old".to_owned()));

    engine.create(engine.build_record("exp-all-old")).await.expect("id reusable after purge");
}

/// A record that expires shortly becomes invisible once the deadline passes.
pub async fn expiration_after_deadline<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    let mut record = engine.build_record("exp-deadline");
    record.expires_in_seconds(1);
    engine.create(record).await.expect("create");
    assert!(engine.exists("exp-deadline").await.expect("exists"));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(!engine.exists("exp-deadline").await.expect("exists"));
}

// ============================================================================
// Locking
// ============================================================================

/// Only one owner holds the lock; the holder may re-lock.
pub async fn lock_is_mutually_exclusive<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    engine.create(engine.build_record("lock-mutex")).await.expect("create");

    assert!(engine.try_to_lock("lock-mutex", "nodeA", OWNER_TYPE, 60).await.expect("lock A"));
    assert!(!engine.try_to_lock("lock-mutex", "nodeB", OWNER_TYPE, 60).await.expect("lock B"));
    assert!(engine.try_to_lock("lock-mutex", "nodeA", OWNER_TYPE, 60).await.expect("re-lock A"));

    let record = engine.get("lock-mutex").await.expect("get");
    assert!(record.is_locked_by("nodeA", OWNER_TYPE));
}

/// A contended lock attempt writes nothing.
pub async fn lock_contended_attempt_does_not_write<A: BackendAdapter + 'static>(
    engine: &Engine<A>,
) {
    engine.create(engine.build_record("lock-nowrite")).await.expect("create");
    assert!(engine.try_to_lock("lock-nowrite", "nodeA", OWNER_TYPE, 60).await.expect("lock"));
    let before = engine.get("lock-nowrite").await.expect("get");

    assert!(!engine.try_to_lock("lock-nowrite", "nodeB", OWNER_TYPE, 60).await.expect("lock"));
    let after = engine.get("lock-nowrite").await.expect("get");
    assert_eq!(before.concurrency_token(), after.concurrency_token());
}

/// Locking an id that does not exist is `NotFound`, not `false`.
pub async fn lock_missing_record_is_not_found<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    assert_not_found!(engine.try_to_lock("lock-ghost", "nodeA", OWNER_TYPE, 5).await);
}

/// A lock is released automatically once its duration passes.
pub async fn lock_expiry_releases<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    engine.create(engine.build_record("lock-expiry")).await.expect("create");
    assert!(engine.try_to_lock("lock-expiry", "nodeA", OWNER_TYPE, 1).await.expect("lock A"));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(engine.try_to_lock("lock-expiry", "nodeB", OWNER_TYPE, 1).await.expect("lock B"));
}

/// Only the holder can unlock an unexpired lock; a refused unlock leaves the
/// lock fields untouched.
pub async fn lock_unlock_requires_ownership<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    engine.create(engine.build_record("lock-unlock")).await.expect("create");
    assert!(engine.try_to_lock("lock-unlock", "nodeA", OWNER_TYPE, 60).await.expect("lock"));
    let locked = engine.get("lock-unlock").await.expect("get");

    assert!(!engine.try_to_unlock("lock-unlock", "nodeB", OWNER_TYPE).await.expect("unlock B"));
    let unchanged = engine.get("lock-unlock").await.expect("get");
    assert_eq!(unchanged, locked);

    assert!(engine.try_to_unlock("lock-unlock", "nodeA", OWNER_TYPE).await.expect("unlock A"));
    let released = engine.get("lock-unlock").await.expect("get");
    assert!(!released.is_locked());
    assert!(engine.try_to_lock("lock-unlock", "nodeB", OWNER_TYPE, 60).await.expect("lock B"));
}

/// The owner type is part of the owner's identity.
pub async fn lock_owner_type_distinguishes_owners<A: BackendAdapter + 'static>(
    engine: &Engine<A>,
) {
    engine.create(engine.build_record("lock-type")).await.expect("create");
    assert!(engine.try_to_lock("lock-type", "node1", "partition", 60).await.expect("lock"));
    assert!(!engine.try_to_lock("lock-type", "node1", "device", 60).await.expect("lock"));
}

// ============================================================================
// Bulk
// ============================================================================

/// `delete_multi` removes every id, including more ids than the in-flight
/// bound and ids that do not exist.
pub async fn bulk_delete_removes_all<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    let bound = engine.config().expect("config").max_pending_operations();
    let count = bound * 2 + 3;
    let ids: Vec<String> = (0..count).map(|i| format!("bulk-{i}")).collect();
    for id in &ids {
        engine.create(engine.build_record(id.clone())).await.expect("create");
    }

    let mut targets = ids.clone();
    targets.push("bulk-missing".to_owned());
    let stats = engine.delete_multi(targets).await.expect("delete_multi");

    assert!(stats.is_complete(), "{stats:?}");
    assert_eq!(stats.deleted, count + 1);
    for id in &ids {
        assert!(!engine.exists(id).await.expect("exists"), "{id} survived");
    }
}

// ============================================================================
// Concurrent
// ============================================================================

/// Of many owners racing for one unlocked record, exactly one wins.
pub async fn concurrent_lockers_have_one_winner<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    engine.create(engine.build_record("race-lock")).await.expect("create");

    let owners: Vec<String> = (0..8).map(|i| format!("node{i}")).collect();
    let results = join_all(
        owners.iter().map(|owner| engine.try_to_lock("race-lock", owner, OWNER_TYPE, 60)),
    )
    .await;

    let winners: Vec<&String> = owners
        .iter()
        .zip(&results)
        .filter(|(_, r)| matches!(r, Ok(true)))
        .map(|(owner, _)| owner)
        .collect();
    assert_eq!(winners.len(), 1, "results: {results:?}");

    let record = engine.get("race-lock").await.expect("get");
    assert!(record.is_locked_by(winners[0], OWNER_TYPE));
}

/// Of many writers presenting the same token, exactly one succeeds.
pub async fn concurrent_writers_one_succeeds<A: BackendAdapter + 'static>(engine: &Engine<A>) {
    let base = engine.create(engine.build_record("race-write")).await.expect("create");

    let attempts = (0..8).map(|i| {
        let mut record = base.clone();
        record.set_data(format!("writer-{i}"));
        engine.upsert(record)
    });
    let results = join_all(attempts).await;

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let conflicts =
        results.iter().filter(|r| matches!(r, Err(StorageError::Conflict { .. }))).count();
    assert_eq!(ok, 1, "results: {results:?}");
    assert_eq!(conflicts, 7);
}

/// Runs the whole suite, calling `fresh` for a new engine before each check.
///
/// ```no_run
/// use fleetsim_storage::{conformance, testutil::memory_engine};
///
/// #[tokio::test]
/// async fn memory_conformance() {
///     conformance::run_all(|| memory_engine("conformance")).await;
/// }
/// ```
pub async fn run_all<A, F>(fresh: F)
where
    A: BackendAdapter + 'static,
    F: Fn() -> Engine<A>,
{
    // CRUD
    crud_get_missing_is_not_found(&fresh()).await;
    crud_create_then_get_roundtrips_fields(&fresh()).await;
    crud_create_duplicate_is_conflict(&fresh()).await;
    crud_delete_is_idempotent(&fresh()).await;
    crud_empty_payload(&fresh()).await;
    crud_get_all_returns_live_records(&fresh()).await;

    // Token
    token_changes_on_every_write(&fresh()).await;
    token_stale_write_is_conflict(&fresh()).await;
    token_explicit_token_is_checked(&fresh()).await;
    token_wildcard_is_unconditional(&fresh()).await;

    // Expiration
    expiration_read_purges_record(&fresh()).await;
    expiration_exists_is_false(&fresh()).await;
    expiration_get_all_filters(&fresh()).await;
    expiration_after_deadline(&fresh()).await;

    // Locking
    lock_is_mutually_exclusive(&fresh()).await;
    lock_contended_attempt_does_not_write(&fresh()).await;
    lock_missing_record_is_not_found(&fresh()).await;
    lock_expiry_releases(&fresh()).await;
    lock_unlock_requires_ownership(&fresh()).await;
    lock_owner_type_distinguishes_owners(&fresh()).await;

    // Bulk
    bulk_delete_removes_all(&fresh()).await;

    // Concurrent
    concurrent_lockers_have_one_winner(&fresh()).await;
    concurrent_writers_one_succeeds(&fresh()).await;
}
