//! Runtime backend selection.
//!
//! [`EngineFactory`] maps a configured backend type to a registered
//! [`Connector`](crate::Connector) and hands out initialized engines over a
//! [`SharedAdapter`]. It holds no records itself.
//!
//! # Backend Types
//!
//! | [`BackendKind`] | Accepted names | Registered by |
//! |-----------------|----------------|---------------|
//! | [`Memory`](BackendKind::Memory) | `memory` | [`EngineFactory::new`] |
//! | [`Document`](BackendKind::Document) | `document`, `cosmosdb`, `cosmos`, `sql` | `fleetsim-storage-cloud` |
//! | [`Table`](BackendKind::Table) | `table`, `tablestorage` | `fleetsim-storage-cloud` |
//!
//! Names are matched case-insensitively.
//!
//! # Usage
//!
//! ```
//! use fleetsim_storage::{EngineFactory, StorageConfig};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let factory = EngineFactory::new();
//! let config = StorageConfig::builder().storage_type("Memory").collection("nodes").build()?;
//!
//! let engine = factory.create(&config)?;
//! engine.create(engine.build_record("node-1")).await?;
//! assert!(engine.exists("node-1").await?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use crate::{
    adapter::SharedAdapter,
    config::StorageConfig,
    connector::{self, SharedConnector},
    engine::Engine,
    error::{ConfigError, StorageError, StorageResult},
    memory::MemoryAdapter,
};

/// Backend technologies the factory can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// In-process [`MemoryAdapter`].
    Memory,
    /// Document database with ETag preconditions.
    Document,
    /// Wide-column table service.
    Table,
}

impl BackendKind {
    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Document => "document",
            Self::Table => "table",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "document" | "cosmosdb" | "cosmos" | "sql" => Ok(Self::Document),
            "table" | "tablestorage" => Ok(Self::Table),
            _ => Err(StorageError::unknown_backend(s)),
        }
    }
}

/// Builds engines for configured backend types.
#[derive(Clone)]
pub struct EngineFactory {
    connectors: HashMap<BackendKind, SharedConnector>,
}

impl fmt::Debug for EngineFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.connectors.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        f.debug_struct("EngineFactory").field("registered", &kinds).finish()
    }
}

impl Default for EngineFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineFactory {
    /// Creates a factory with the in-memory backend registered.
    ///
    /// All memory engines created by one factory share a single
    /// [`MemoryAdapter`].
    #[must_use]
    pub fn new() -> Self {
        Self::empty().with_connector(
            BackendKind::Memory,
            connector::shared::<MemoryAdapter, _>(MemoryAdapter::new()),
        )
    }

    /// Creates a factory with nothing registered.
    #[must_use]
    pub fn empty() -> Self {
        Self { connectors: HashMap::new() }
    }

    /// Registers (or replaces) the connector for `kind`.
    pub fn register(&mut self, kind: BackendKind, connector: SharedConnector) -> &mut Self {
        if self.connectors.insert(kind, connector).is_some() {
            tracing::debug!(backend = %kind, "replaced registered connector");
        }
        self
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_connector(mut self, kind: BackendKind, connector: SharedConnector) -> Self {
        self.register(kind, connector);
        self
    }

    /// Returns `true` if a connector is registered for `kind`.
    #[must_use]
    pub fn is_registered(&self, kind: BackendKind) -> bool {
        self.connectors.contains_key(&kind)
    }

    /// Creates and initializes an engine for `config`.
    ///
    /// The backend is not contacted until the engine's first data operation.
    ///
    /// # Errors
    ///
    /// - [`StorageError::UnknownBackend`] if `storage_type` is not a known backend
    /// - [`StorageError::Config`] if the type is known but has no registered
    ///   connector, or if `config` is invalid
    #[tracing::instrument(skip(self, config), fields(storage_type = config.storage_type()))]
    pub fn create(&self, config: &StorageConfig) -> StorageResult<Engine<SharedAdapter>> {
        let kind: BackendKind = config.storage_type().parse()?;
        let connector = self.connectors.get(&kind).ok_or_else(|| ConfigError::Invalid {
            field: "storage_type",
            reason: format!("no connector registered for backend '{kind}'"),
        })?;

        let engine = Engine::new(Arc::clone(connector));
        engine.init(config.clone())?;
        tracing::debug!(backend = %kind, collection = config.collection(), "storage engine created");
        Ok(engine)
    }
}
