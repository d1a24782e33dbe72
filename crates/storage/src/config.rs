//! Engine and factory configuration.
//!
//! [`StorageConfig`] carries everything needed to pick a backend and bind an
//! engine to one collection. It can be built in code through the validating
//! builder or deserialized from a configuration file; deserialized values are
//! validated when the engine is initialized.
//!
//! # Example
//!
//! ```
//! use fleetsim_storage::StorageConfig;
//!
//! let config = StorageConfig::builder()
//!     .storage_type("memory")
//!     .collection("partitions")
//!     .build()?;
//!
//! assert_eq!(config.database(), "fleetsim");
//! assert_eq!(config.max_pending_operations(), 25);
//! # Ok::<(), fleetsim_storage::ConfigError>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::{adapter::CollectionRef, error::ConfigError};

/// Default database name.
pub const DEFAULT_DATABASE: &str = "fleetsim";

/// Default provisioned throughput hint (request units).
pub const DEFAULT_THROUGHPUT: u32 = 400;

/// Default bound on concurrently pending operations in bulk deletes.
pub const DEFAULT_MAX_PENDING_OPERATIONS: usize = 25;

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Backend type selector (`memory`, `document`, `table`).
    pub(crate) storage_type: String,

    /// Backend connection string. Contains the account key.
    #[serde(default)]
    pub(crate) connection_string: Zeroizing<String>,

    /// Database name.
    #[serde(default = "default_database")]
    pub(crate) database: String,

    /// Collection, container or table name.
    pub(crate) collection: String,

    /// Provisioned throughput hint, used when the collection is created.
    #[serde(default = "default_throughput")]
    pub(crate) throughput: u32,

    /// Maximum number of deletes in flight during a bulk delete.
    #[serde(default = "default_max_pending_operations")]
    pub(crate) max_pending_operations: usize,

    /// Backoff used by [`Engine::lock_with_retry`](crate::Engine::lock_with_retry).
    #[serde(default)]
    pub(crate) lock_retry: LockRetryConfig,
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_owned()
}

fn default_throughput() -> u32 {
    DEFAULT_THROUGHPUT
}

fn default_max_pending_operations() -> usize {
    DEFAULT_MAX_PENDING_OPERATIONS
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("storage_type", &self.storage_type)
            .field("connection_string", &"<redacted>")
            .field("database", &self.database)
            .field("collection", &self.collection)
            .field("throughput", &self.throughput)
            .field("max_pending_operations", &self.max_pending_operations)
            .field("lock_retry", &self.lock_retry)
            .finish()
    }
}

#[bon::bon]
impl StorageConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if:
    /// - `storage_type`, `database` or `collection` is empty
    /// - `max_pending_operations` is zero
    #[builder]
    pub fn new(
        #[builder(into)] storage_type: String,
        #[builder(into, default)] connection_string: String,
        #[builder(into, default = default_database())] database: String,
        #[builder(into)] collection: String,
        #[builder(default = DEFAULT_THROUGHPUT)] throughput: u32,
        #[builder(default = DEFAULT_MAX_PENDING_OPERATIONS)] max_pending_operations: usize,
        #[builder(default)] lock_retry: LockRetryConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            storage_type,
            connection_string: Zeroizing::new(connection_string),
            database,
            collection,
            throughput,
            max_pending_operations,
            lock_retry,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the builder enforces. Deserialized configs are
    /// validated by the engine on `init`.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_type.trim().is_empty() {
            return Err(ConfigError::Empty { field: "storage_type" });
        }
        if self.database.is_empty() {
            return Err(ConfigError::Empty { field: "database" });
        }
        if self.collection.is_empty() {
            return Err(ConfigError::Empty { field: "collection" });
        }
        if self.max_pending_operations == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "max_pending_operations",
                min: "1".into(),
                value: "0".into(),
            });
        }
        self.lock_retry.validate()
    }

    /// Returns the backend type selector.
    #[must_use]
    pub fn storage_type(&self) -> &str {
        &self.storage_type
    }

    /// Returns the connection string.
    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Returns the database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the collection name.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns the database and collection as a [`CollectionRef`].
    #[must_use]
    pub fn collection_ref(&self) -> CollectionRef {
        CollectionRef::new(self.database.clone(), self.collection.clone())
    }

    /// Returns the provisioned throughput hint.
    #[must_use]
    pub fn throughput(&self) -> u32 {
        self.throughput
    }

    /// Returns the bulk-delete concurrency bound.
    #[must_use]
    pub fn max_pending_operations(&self) -> usize {
        self.max_pending_operations
    }

    /// Returns the lock retry policy.
    #[must_use]
    pub fn lock_retry(&self) -> &LockRetryConfig {
        &self.lock_retry
    }
}

/// Backoff policy for contended lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockRetryConfig {
    /// Total number of lock attempts, including the first.
    #[serde(default = "default_max_attempts")]
    #[builder(default = default_max_attempts())]
    pub max_attempts: u32,

    /// Backoff after the first lost attempt.
    #[serde(with = "humantime_serde", default = "default_initial_backoff")]
    #[builder(default = default_initial_backoff())]
    pub initial_backoff: Duration,

    /// Upper bound on the backoff between attempts.
    #[serde(with = "humantime_serde", default = "default_max_backoff")]
    #[builder(default = default_max_backoff())]
    pub max_backoff: Duration,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> Duration {
    Duration::from_millis(100)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(5)
}

impl Default for LockRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl LockRetryConfig {
    /// Checks that at least one attempt is made.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `max_attempts` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "lock_retry.max_attempts",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config =
            StorageConfig::builder().storage_type("memory").collection("nodes").build().unwrap();

        assert_eq!(config.storage_type(), "memory");
        assert_eq!(config.connection_string(), "");
        assert_eq!(config.database(), DEFAULT_DATABASE);
        assert_eq!(config.collection(), "nodes");
        assert_eq!(config.throughput(), DEFAULT_THROUGHPUT);
        assert_eq!(config.max_pending_operations(), DEFAULT_MAX_PENDING_OPERATIONS);
        assert_eq!(config.lock_retry(), &LockRetryConfig::default());
        assert_eq!(config.collection_ref(), CollectionRef::new("fleetsim", "nodes"));
    }

    #[test]
    fn test_validation_empty_collection() {
        let err =
            StorageConfig::builder().storage_type("memory").collection("").build().unwrap_err();
        assert_eq!(err, ConfigError::Empty { field: "collection" });
    }

    #[test]
    fn test_validation_blank_storage_type() {
        let err = StorageConfig::builder().storage_type("  ").collection("c").build().unwrap_err();
        assert_eq!(err, ConfigError::Empty { field: "storage_type" });
    }

    #[test]
    fn test_validation_zero_pending_operations() {
        let err = StorageConfig::builder()
            .storage_type("memory")
            .collection("c")
            .max_pending_operations(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("max_pending_operations"), "{err}");
    }

    #[test]
    fn test_validation_zero_lock_attempts() {
        let err = StorageConfig::builder()
            .storage_type("memory")
            .collection("c")
            .lock_retry(LockRetryConfig::builder().max_attempts(0).build())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("lock_retry.max_attempts"), "{err}");
    }

    #[test]
    fn test_debug_redacts_connection_string() {
        let config = StorageConfig::builder()
            .storage_type("document")
            .connection_string("AccountEndpoint=https://x/;AccountKey=c2VjcmV0;")
            .collection("c")
            .build()
            .unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("c2VjcmV0"), "{debug}");
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_deserialization_with_defaults() {
        let json = r#"{
            "storage_type": "table",
            "connection_string": "AccountName=dev;AccountKey=a2V5",
            "collection": "secrets",
            "lock_retry": { "initial_backoff": "250ms" }
        }"#;

        let config: StorageConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.database(), DEFAULT_DATABASE);
        assert_eq!(config.throughput(), DEFAULT_THROUGHPUT);
        assert_eq!(config.max_pending_operations(), DEFAULT_MAX_PENDING_OPERATIONS);
        assert_eq!(config.lock_retry().initial_backoff, Duration::from_millis(250));
        assert_eq!(config.lock_retry().max_backoff, default_max_backoff());
    }

    #[test]
    fn test_deserialization_rejects_unknown_fields() {
        let json = r#"{ "storage_type": "memory", "collection": "c", "region": "eu" }"#;
        assert!(serde_json::from_str::<StorageConfig>(json).is_err());
    }

    #[test]
    fn test_lock_retry_builder_partial_overrides() {
        let config = LockRetryConfig::builder().max_attempts(10).build();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.initial_backoff, default_initial_backoff());
        assert_eq!(config.max_backoff, default_max_backoff());
    }
}
