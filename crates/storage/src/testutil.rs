//! Shared test utilities for engine and adapter testing.
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! fleetsim-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use fleetsim_storage::testutil::{make_id, memory_engine};
//! ```

use crate::{
    config::StorageConfig,
    engine::Engine,
    error::{StorageError, StorageResult},
    memory::MemoryAdapter,
};

/// Creates a deterministic record id such as `"p:000042"`.
#[must_use]
pub fn make_id(prefix: &str, idx: usize) -> String {
    format!("{prefix}:{idx:06}")
}

/// Creates a memory configuration for `collection`.
///
/// # Panics
///
/// Panics if `collection` is empty.
#[must_use]
pub fn memory_config(collection: &str) -> StorageConfig {
    StorageConfig::builder()
        .storage_type("memory")
        .collection(collection)
        .build()
        .expect("valid memory config")
}

/// Creates an initialized engine over a fresh [`MemoryAdapter`].
#[must_use]
pub fn memory_engine(collection: &str) -> Engine<MemoryAdapter> {
    memory_engine_on(&MemoryAdapter::new(), memory_config(collection))
}

/// Creates an initialized engine sharing `adapter` with other engines, the
/// way several worker nodes share one backend.
///
/// # Panics
///
/// Panics if `config` is invalid.
#[must_use]
pub fn memory_engine_on(adapter: &MemoryAdapter, config: StorageConfig) -> Engine<MemoryAdapter> {
    let engine = Engine::new(adapter.clone());
    engine.init(config).expect("memory engine init");
    engine
}

/// Creates a memory engine holding `count` records with ids from
/// [`make_id`] and an empty JSON object as payload.
///
/// # Panics
///
/// Panics if any create fails (should not happen with `MemoryAdapter`).
pub async fn populated_engine(prefix: &str, count: usize) -> Engine<MemoryAdapter> {
    let engine = memory_engine("populated");
    for i in 0..count {
        engine
            .create(engine.build_record_with_data(make_id(prefix, i), "{}"))
            .await
            .expect("populate create failed");
    }
    engine
}

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use fleetsim_storage::{assert_conflict, StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::conflict("p-1"));
/// assert_conflict!(result);
/// ```
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        match $result {
            ref result => assert!(
                matches!(result, Err($crate::error::StorageError::Conflict { .. })),
                "expected StorageError::Conflict, got: {:?}",
                result,
            ),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            ref result => assert!(
                matches!(result, Err($crate::error::StorageError::Conflict { .. })),
                "{}: expected StorageError::Conflict, got: {:?}",
                $msg,
                result,
            ),
        }
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::NotFound`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use fleetsim_storage::{assert_not_found, StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::not_found("p-1"));
/// assert_not_found!(result);
/// ```
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {
        match $result {
            ref result => assert!(
                matches!(result, Err($crate::error::StorageError::NotFound { .. })),
                "expected StorageError::NotFound, got: {:?}",
                result,
            ),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            ref result => assert!(
                matches!(result, Err($crate::error::StorageError::NotFound { .. })),
                "{}: expected StorageError::NotFound, got: {:?}",
                $msg,
                result,
            ),
        }
    };
}

/// Assert that a [`StorageResult`] is `Ok` and return the inner value.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use fleetsim_storage::{assert_storage_ok, StorageResult};
///
/// let result: StorageResult<i32> = Ok(42);
/// assert_eq!(assert_storage_ok!(result), 42);
/// ```
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Returns `true` if `result` is a conflict.
pub fn is_conflict<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::Conflict { .. }))
}

/// Returns `true` if `result` is a not-found error.
pub fn is_not_found<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::NotFound { .. }))
}
