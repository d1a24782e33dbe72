//! Document database and table service adapters for the fleetsim record store.
//!
//! Both adapters are written against a small service-client trait
//! ([`DocumentService`], [`TableService`]) rather than a particular SDK, so
//! the HTTP stack is the application's choice. Plug a client in through the
//! matching connector and register it with the
//! [`EngineFactory`](fleetsim_storage::EngineFactory):
//!
//! ```no_run
//! # use std::sync::Arc;
//! use fleetsim_storage::{BackendKind, EngineFactory, StorageConfig};
//! use fleetsim_storage_cloud::{DocumentConnector, DocumentService};
//!
//! # fn run<S: DocumentService + 'static>(client: Arc<S>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut factory = EngineFactory::new();
//! factory.register(BackendKind::Document, DocumentConnector::from_service(client).into_shared());
//!
//! let config = StorageConfig::builder()
//!     .storage_type("cosmosdb")
//!     .connection_string("AccountEndpoint=https://fleet.documents.example:443/;AccountKey=a2V5;")
//!     .collection("partitions")
//!     .build()?;
//! let engine = factory.create(&config)?;
//! # let _ = engine;
//! # Ok(())
//! # }
//! ```
//!
//! The connection string is parsed when the engine first touches the
//! backend; a malformed one surfaces as
//! [`StorageError::Config`](fleetsim_storage::StorageError::Config) from that
//! operation.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables [`MockDocumentService`] and [`MockTableService`].

#![deny(unsafe_code)]

pub mod connection_string;
pub mod document;
pub mod error;
#[cfg(any(test, feature = "testutil"))]
pub mod mock;
pub mod table;

pub use connection_string::{ConnectionString, DocumentAccount, TableAccount};
pub use document::{DocumentAdapter, DocumentConnector, DocumentService};
pub use error::{CloudStorageError, Result, ServiceError, ServiceResult};
#[cfg(any(test, feature = "testutil"))]
pub use mock::{MockDocumentService, MockOp, MockTableService};
pub use table::{TableAdapter, TableConnector, TableEntity, TableService, TableValue};
