//! Lease locking across engines that share one backend, the way worker
//! nodes share a cloud collection.

#![allow(clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use fleetsim_storage::{
    Engine, LockRetryConfig, MemoryAdapter, StorageError,
    testutil::{memory_config, memory_engine, memory_engine_on},
};

const PARTITION: &str = "partition";

fn nodes(count: usize) -> (MemoryAdapter, Vec<Arc<Engine<MemoryAdapter>>>) {
    let adapter = MemoryAdapter::new();
    let engines =
        (0..count).map(|_| Arc::new(memory_engine_on(&adapter, memory_config("partitions")))).collect();
    (adapter, engines)
}

#[tokio::test]
async fn partition_claim_handover_after_lock_expiry() {
    let engine = memory_engine("partitions");
    engine.create(engine.build_record_with_data("p-7", "{}")).await.expect("create");

    assert!(engine.try_to_lock("p-7", "nodeA", PARTITION, 5).await.expect("lock A"));
    assert!(!engine.try_to_lock("p-7", "nodeB", PARTITION, 5).await.expect("lock B while held"));

    tokio::time::sleep(Duration::from_secs(6)).await;

    assert!(engine.try_to_lock("p-7", "nodeB", PARTITION, 5).await.expect("lock B after expiry"));
    let record = engine.get("p-7").await.expect("get");
    assert!(record.is_locked_by("nodeB", PARTITION));
    assert_eq!(record.data(), "{}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn nodes_racing_for_one_partition_have_one_winner() {
    let (_adapter, engines) = nodes(8);
    engines[0].create(engines[0].build_record("p-1")).await.expect("create");

    let handles: Vec<_> = engines
        .iter()
        .enumerate()
        .map(|(i, engine)| {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                let owner = format!("node{i}");
                let won = engine.try_to_lock("p-1", &owner, PARTITION, 60).await.expect("lock");
                (owner, won)
            })
        })
        .collect();

    let mut winners = Vec::new();
    for handle in handles {
        let (owner, won) = handle.await.expect("task panicked");
        if won {
            winners.push(owner);
        }
    }

    assert_eq!(winners.len(), 1, "winners: {winners:?}");
    let record = engines[1].get("p-1").await.expect("get");
    assert!(record.is_locked_by(&winners[0], PARTITION));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_partition_is_claimed_exactly_once() {
    let (_adapter, engines) = nodes(4);
    let partitions: Vec<String> = (0..20).map(|i| format!("p-{i}")).collect();
    for id in &partitions {
        engines[0].create(engines[0].build_record(id.clone())).await.expect("create");
    }

    let handles: Vec<_> = engines
        .iter()
        .enumerate()
        .map(|(i, engine)| {
            let engine = Arc::clone(engine);
            let partitions = partitions.clone();
            tokio::spawn(async move {
                let owner = format!("node{i}");
                let mut claimed = Vec::new();
                for id in partitions {
                    if engine.try_to_lock(&id, &owner, PARTITION, 60).await.expect("lock") {
                        claimed.push(id);
                    }
                }
                claimed
            })
        })
        .collect();

    let mut all_claimed = Vec::new();
    for handle in handles {
        all_claimed.extend(handle.await.expect("task panicked"));
    }
    all_claimed.sort();
    let mut expected = partitions.clone();
    expected.sort();
    assert_eq!(all_claimed, expected);
}

#[tokio::test]
async fn lock_survives_payload_updates_by_holder() {
    let engine = memory_engine("partitions");
    engine.create(engine.build_record("p-2")).await.expect("create");
    assert!(engine.try_to_lock("p-2", "nodeA", PARTITION, 60).await.expect("lock"));

    let mut record = engine.get("p-2").await.expect("get");
    let token = record.concurrency_token().to_owned();
    record.set_data(r#"{"devices":12}"#);
    engine.upsert_with_token(record, &token).await.expect("holder update");

    let record = engine.get("p-2").await.expect("get");
    assert!(record.is_locked_by("nodeA", PARTITION));
    assert!(!engine.try_to_lock("p-2", "nodeB", PARTITION, 60).await.expect("lock B"));
}

#[tokio::test]
async fn unlock_by_other_node_is_refused() {
    let (_adapter, engines) = nodes(2);
    engines[0].create(engines[0].build_record("p-3")).await.expect("create");
    assert!(engines[0].try_to_lock("p-3", "nodeA", PARTITION, 60).await.expect("lock"));

    assert!(!engines[1].try_to_unlock("p-3", "nodeB", PARTITION).await.expect("unlock B"));
    assert!(engines[1].get("p-3").await.expect("get").is_locked_by("nodeA", PARTITION));

    assert!(engines[0].try_to_unlock("p-3", "nodeA", PARTITION).await.expect("unlock A"));
    assert!(engines[1].try_to_lock("p-3", "nodeB", PARTITION, 60).await.expect("lock B"));
}

#[tokio::test]
async fn unlock_of_expired_foreign_lock_succeeds() {
    let engine = memory_engine("partitions");
    engine.create(engine.build_record("p-4")).await.expect("create");
    assert!(engine.try_to_lock("p-4", "nodeA", PARTITION, 1).await.expect("lock"));

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(engine.try_to_unlock("p-4", "nodeB", PARTITION).await.expect("unlock"));
}

#[tokio::test]
async fn unlock_missing_record_is_not_found() {
    let engine = memory_engine("partitions");
    let err = engine.try_to_unlock("ghost", "nodeA", PARTITION).await.expect_err("missing");
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[tokio::test]
async fn lock_of_expired_record_is_not_found() {
    let engine = memory_engine("partitions");
    let mut record = engine.build_record("p-5");
    record.set_expires_at_utc_ms(1);
    engine.create(record).await.expect("create");

    let err = engine.try_to_lock("p-5", "nodeA", PARTITION, 5).await.expect_err("expired");
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[tokio::test]
async fn lock_with_retry_waits_for_expiry() {
    let engine = memory_engine("partitions");
    engine.create(engine.build_record("p-6")).await.expect("create");
    assert!(engine.try_to_lock("p-6", "nodeA", PARTITION, 1).await.expect("lock A"));

    let policy = LockRetryConfig::builder()
        .max_attempts(10)
        .initial_backoff(Duration::from_millis(200))
        .max_backoff(Duration::from_millis(400))
        .build();
    let acquired =
        engine.lock_with_retry("p-6", "nodeB", PARTITION, 5, &policy).await.expect("retry");

    assert!(acquired);
    assert!(engine.get("p-6").await.expect("get").is_locked_by("nodeB", PARTITION));
    assert!(engine.metrics().locks_contended >= 1);
}

#[tokio::test]
async fn lock_with_retry_gives_up() {
    let engine = memory_engine("partitions");
    engine.create(engine.build_record("p-8")).await.expect("create");
    assert!(engine.try_to_lock("p-8", "nodeA", PARTITION, 60).await.expect("lock A"));

    let policy = LockRetryConfig::builder()
        .max_attempts(3)
        .initial_backoff(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(20))
        .build();
    let acquired =
        engine.lock_with_retry("p-8", "nodeB", PARTITION, 5, &policy).await.expect("retry");

    assert!(!acquired);
    assert_eq!(engine.metrics().locks_contended, 3);
}

#[tokio::test]
async fn lock_with_configured_policy() {
    let engine = memory_engine("partitions");
    engine.create(engine.build_record("p-9")).await.expect("create");

    let policy = engine.config().expect("config").lock_retry().clone();
    assert!(engine.lock_with_retry("p-9", "nodeA", PARTITION, 5, &policy).await.expect("retry"));
}
