//! Lazy adapter construction.
//!
//! An [`Engine`](crate::Engine) does not open a backend connection when it is
//! created. On the first data operation it asks its [`Connector`] for an
//! adapter, provisions the collection, and caches the result.

use std::{fmt, marker::PhantomData, sync::Arc};

use async_trait::async_trait;

use crate::{
    adapter::{BackendAdapter, SharedAdapter},
    config::StorageConfig,
    error::StorageResult,
};

/// Creates an adapter from configuration.
#[async_trait]
pub trait Connector<A>: Send + Sync {
    /// Builds a connected adapter.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`](crate::StorageError::Config) for bad
    /// connection settings, or
    /// [`StorageError::ExternalDependency`](crate::StorageError::ExternalDependency)
    /// if the backend cannot be reached.
    async fn connect(&self, config: &StorageConfig) -> StorageResult<A>;
}

#[async_trait]
impl<A, C> Connector<A> for Arc<C>
where
    A: Send + 'static,
    C: Connector<A> + ?Sized,
{
    async fn connect(&self, config: &StorageConfig) -> StorageResult<A> {
        (**self).connect(config).await
    }
}

/// Wraps a typed connector so it produces a [`SharedAdapter`].
///
/// This is how concrete connectors enter the
/// [`EngineFactory`](crate::EngineFactory) registry.
pub struct Erased<C, A> {
    inner: C,
    _adapter: PhantomData<fn() -> A>,
}

impl<C, A> Erased<C, A> {
    /// Wraps `inner`.
    pub fn new(inner: C) -> Self {
        Self { inner, _adapter: PhantomData }
    }
}

impl<C: fmt::Debug, A> fmt::Debug for Erased<C, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Erased").field(&self.inner).finish()
    }
}

#[async_trait]
impl<C, A> Connector<SharedAdapter> for Erased<C, A>
where
    A: BackendAdapter + 'static,
    C: Connector<A>,
{
    async fn connect(&self, config: &StorageConfig) -> StorageResult<SharedAdapter> {
        let adapter = self.inner.connect(config).await?;
        Ok(Arc::new(adapter))
    }
}

/// Type-erased connector stored in the factory registry.
pub type SharedConnector = Arc<dyn Connector<SharedAdapter>>;

/// Erases `connector` into a [`SharedConnector`].
pub fn shared<A, C>(connector: C) -> SharedConnector
where
    A: BackendAdapter + 'static,
    C: Connector<A> + 'static,
{
    Arc::new(Erased::<C, A>::new(connector))
}
