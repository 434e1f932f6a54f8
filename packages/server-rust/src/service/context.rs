use std::any::Any;
use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{Delivery, Endpoint};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::events::EventBus;
use super::registry::ServiceRegistry;
use crate::cache::{CacheError, CacheLayer};
use crate::messaging::{MessageHandler, MessagingError, MessagingFabric};
use crate::network::ShutdownController;
use crate::resolver::{ResolutionError, Resolver};

// ---------------------------------------------------------------------------
// Service trait
// ---------------------------------------------------------------------------

/// A unit of application logic booted by the orchestrator.
///
/// `configure` runs for every enabled service before any `init`; within a
/// phase services run concurrently and must not depend on each other's
/// progress. `shutdown` runs in reverse declaration order. The `Any` bound
/// enables typed lookup through [`ServiceContext::service`].
#[async_trait]
pub trait Service: Send + Sync + Any {
    async fn configure(&self, _ctx: &ServiceContext, _config: &serde_json::Value) -> anyhow::Result<()> {
        Ok(())
    }

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Infrastructure
// ---------------------------------------------------------------------------

/// Process-wide handles shared by every service.
#[derive(Debug)]
pub struct Infrastructure {
    pub base_dir: PathBuf,
    pub fabric: Arc<MessagingFabric>,
    pub cache: Arc<CacheLayer>,
    pub resolver: Arc<Resolver>,
    pub events: Arc<EventBus>,
    pub registry: Arc<ServiceRegistry>,
    pub lifecycle: Arc<ShutdownController>,
}

// ---------------------------------------------------------------------------
// ServiceContext
// ---------------------------------------------------------------------------

/// What a service sees of the node: its own name plus the shared infrastructure.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    name: Arc<str>,
    infra: Arc<Infrastructure>,
}

impl ServiceContext {
    #[must_use]
    pub fn new(name: &str, infra: Arc<Infrastructure>) -> Self {
        Self {
            name: Arc::from(name),
            infra,
        }
    }

    /// Name the service was declared under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.infra.base_dir
    }

    #[must_use]
    pub fn fabric(&self) -> &Arc<MessagingFabric> {
        &self.infra.fabric
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.infra.cache
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.infra.resolver
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.infra.events
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.infra.registry
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Arc<ShutdownController> {
        &self.infra.lifecycle
    }

    /// Another registered service, by name and concrete type.
    #[must_use]
    pub fn service<T: Service>(&self, name: &str) -> Option<Arc<T>> {
        self.infra.registry.get::<T>(name)
    }

    /// # Errors
    ///
    /// See [`MessagingFabric::publish`].
    pub async fn publish(&self, topic: &str, body: impl AsRef<[u8]>) -> Result<(), MessagingError> {
        self.infra.fabric.publish(topic, body).await
    }

    /// # Errors
    ///
    /// See [`MessagingFabric::publish_deferred`].
    pub async fn publish_deferred(
        &self,
        topic: &str,
        body: impl AsRef<[u8]>,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        self.infra.fabric.publish_deferred(topic, body, delay).await
    }

    /// # Errors
    ///
    /// See [`MessagingFabric::publish_json`].
    pub async fn publish_json<T: Serialize>(&self, topic: &str, payload: &T) -> Result<(), MessagingError> {
        self.infra.fabric.publish_json(topic, payload).await
    }

    /// Subscribes a closure with acknowledge-always semantics.
    ///
    /// # Errors
    ///
    /// See [`MessagingFabric::listen`].
    pub async fn listen<F, Fut, E>(&self, topic: &str, channel: &str, f: F) -> Result<(), MessagingError>
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.infra.fabric.listen(topic, channel, f).await
    }

    /// Subscribes a handler that chooses each message's disposition.
    ///
    /// # Errors
    ///
    /// See [`MessagingFabric::subscribe`].
    pub async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), MessagingError> {
        self.infra.fabric.subscribe(topic, channel, handler).await
    }

    /// Remote call through the cache: returns the cached result for `key`
    /// or performs `call` and caches what it returns.
    ///
    /// # Errors
    ///
    /// The call's error, or a cache error converted into `E`.
    pub async fn cached_call<T, E, F, Fut>(
        &self,
        key: &str,
        expiration_secs: Option<u64>,
        call: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.infra
            .cache
            .get_cache_or_store(key, expiration_secs, call)
            .await
    }

    /// # Errors
    ///
    /// See [`Resolver::resolve`].
    pub async fn resolve(&self, logical_name: &str, fallback_host: &str) -> Result<Endpoint, ResolutionError> {
        self.infra.resolver.resolve(logical_name, fallback_host).await
    }
}
