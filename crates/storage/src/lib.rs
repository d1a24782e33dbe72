//! Coordination record store for the fleet simulator.
//!
//! Simulated devices, partitions and node assignments are kept as
//! [`Record`]s: an id, an opaque payload, a backend-issued concurrency token,
//! an optional expiration and an optional lease lock. Many worker processes
//! share one store and coordinate through it without any in-process locking.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Simulation workers                          │
//! │     (partition claiming, device state, node heartbeats)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 EngineFactory                               │
//! │        (storage_type → Connector → Engine)                  │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 Engine<A>                                   │
//! │  expiration filtering · lease locking · bounded bulk delete │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 BackendAdapter trait                        │
//! │  create · upsert(if-match) · read · delete · list_all       │
//! ├──────────────┬──────────────────────────────────────────────┤
//! │ MemoryAdapter│  DocumentAdapter / TableAdapter              │
//! │  (testing)   │  (fleetsim-storage-cloud)                    │
//! └──────────────┴──────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use fleetsim_storage::{EngineFactory, StorageConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StorageConfig::builder().storage_type("memory").collection("partitions").build()?;
//!     let engine = EngineFactory::new().create(&config)?;
//!
//!     engine.create(engine.build_record_with_data("p-7", "{}")).await?;
//!
//!     // Workers race for the partition; exactly one wins.
//!     assert!(engine.try_to_lock("p-7", "nodeA", "partition", 5).await?);
//!     assert!(!engine.try_to_lock("p-7", "nodeB", "partition", 5).await?);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Available Backends
//!
//! | Backend | Use Case | Persistence |
//! |---------|----------|-------------|
//! | [`MemoryAdapter`] | Testing, local simulation | No |
//! | `DocumentAdapter` (in `fleetsim-storage-cloud`) | Document database | Yes |
//! | `TableAdapter` (in `fleetsim-storage-cloud`) | Table service | Yes |
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`BackendAdapter`] trait
//! 2. Implement [`Connector`] so engines can create the adapter lazily
//! 3. Map backend statuses to [`AdapterError`]
//! 4. Run the [`conformance`] suite against it
//!
//! # Error Handling
//!
//! All engine operations return [`StorageResult<T>`]. Lost lock races are not
//! errors: `try_to_lock` and `try_to_unlock` answer `Ok(false)`.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` and `conformance` modules (engine factories, assertion
//!   macros, the adapter conformance suite). Enable this in `[dev-dependencies]` for integration
//!   tests.
//! - **`failpoints`**: Compiles the `fail` crate's fail points into the memory adapter and the
//!   lock retry loop.

#![deny(unsafe_code)]

pub mod adapter;
pub mod clock;
pub mod config;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod connector;
pub mod engine;
pub mod error;
pub mod factory;
pub mod init;
pub mod memory;
pub mod metrics;
pub mod record;
mod retry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

// Re-export primary types at crate root for convenience
pub use adapter::{
    AdapterError, AdapterResult, BackendAdapter, CollectionRef, SharedAdapter, WILDCARD_TOKEN,
    WriteCondition,
};
pub use clock::NEVER;
pub use config::{LockRetryConfig, StorageConfig};
pub use connector::{Connector, SharedConnector};
pub use engine::{BulkDeleteFailure, BulkDeleteStats, Engine};
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use factory::{BackendKind, EngineFactory};
pub use memory::MemoryAdapter;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use record::{Record, RecordParts};
pub use zeroize::Zeroizing;
