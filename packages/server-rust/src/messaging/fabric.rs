//! Process-wide messaging facade: one supervised publisher plus any number
//! of subscriptions, with topic and channel names normalized on the way in.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fleet_core::{normalize_channel, normalize_topic, Delivery, Endpoint};
use serde::Serialize;
use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, info};

use super::error::MessagingError;
use super::event::BusEvent;
use super::memory::MemoryBus;
use super::nsq::NsqTransport;
use super::publisher::{LinkState, Publisher};
use super::subscriber::{self, auto_ack, MessageHandler, Subscription};
use super::transport::{BusTransport, ReaderSpec};
use crate::config::{BusConfig, TransportKind};
use crate::resolver::Resolver;

const EVENT_CAPACITY: usize = 256;

pub struct MessagingFabric {
    transport: Arc<dyn BusTransport>,
    resolver: Arc<Resolver>,
    config: BusConfig,
    publisher: OnceCell<Arc<Publisher>>,
    discovery: OnceCell<Endpoint>,
    subscriptions: parking_lot::Mutex<Vec<Subscription>>,
    events: broadcast::Sender<BusEvent>,
}

impl std::fmt::Debug for MessagingFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingFabric")
            .field("transport", &self.transport.name())
            .field("publisher", &self.publisher_state())
            .field("subscriptions", &self.subscriptions.lock().len())
            .finish_non_exhaustive()
    }
}

impl MessagingFabric {
    #[must_use]
    pub fn new(transport: Arc<dyn BusTransport>, resolver: Arc<Resolver>, config: BusConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport,
            resolver,
            config,
            publisher: OnceCell::new(),
            discovery: OnceCell::new(),
            subscriptions: parking_lot::Mutex::new(Vec::new()),
            events,
        }
    }

    /// Builds the fabric with the transport named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the nsq transport cannot be constructed.
    pub fn from_config(config: BusConfig, resolver: Arc<Resolver>) -> Result<Self, MessagingError> {
        let transport: Arc<dyn BusTransport> = match config.transport {
            TransportKind::Nsq => Arc::new(NsqTransport::new(&config)?),
            TransportKind::Memory => Arc::new(MemoryBus::new()),
        };
        Ok(Self::new(transport, resolver, config))
    }

    /// Establishes the process publisher. Later calls are no-ops.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::Resolution` if the broker cannot be resolved.
    /// An unreachable broker is not an error; the publisher keeps retrying.
    pub async fn connect_publisher(&self) -> Result<(), MessagingError> {
        self.publisher
            .get_or_try_init(|| {
                Publisher::connect(
                    Arc::clone(&self.transport),
                    Arc::clone(&self.resolver),
                    self.config.nsqd.clone(),
                    self.config.reconnect.clone(),
                    self.events.clone(),
                )
            })
            .await?;
        Ok(())
    }

    /// Resolves the discovery endpoint once and caches it.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::Resolution` on lookup failure; the next call
    /// tries again.
    pub async fn discovery(&self) -> Result<Endpoint, MessagingError> {
        let endpoint = self
            .discovery
            .get_or_try_init(|| async {
                let lookupd = &self.config.nsqlookupd;
                self.resolver
                    .resolve(&lookupd.logical_name, &lookupd.host)
                    .await
            })
            .await?;
        Ok(endpoint.clone())
    }

    fn publisher(&self) -> Result<&Arc<Publisher>, MessagingError> {
        self.publisher.get().ok_or(MessagingError::ConnectionClosed)
    }

    /// Sends `body` to `topic` (lower-cased before sending).
    ///
    /// # Errors
    ///
    /// Invalid topic names, `ConnectionClosed` while the publisher is down
    /// or not yet connected, and broker send failures. Nothing is retried.
    pub async fn publish(&self, topic: &str, body: impl AsRef<[u8]>) -> Result<(), MessagingError> {
        let topic = normalize_topic(topic)?;
        self.publisher()?.send(&topic, body.as_ref(), None).await
    }

    /// Sends `body` to `topic`, visible to consumers after `delay`.
    ///
    /// # Errors
    ///
    /// Same as [`MessagingFabric::publish`].
    pub async fn publish_deferred(
        &self,
        topic: &str,
        body: impl AsRef<[u8]>,
        delay: Duration,
    ) -> Result<(), MessagingError> {
        let topic = normalize_topic(topic)?;
        self.publisher()?
            .send(&topic, body.as_ref(), Some(delay))
            .await
    }

    /// Serializes `payload` as JSON and publishes it.
    ///
    /// # Errors
    ///
    /// Serialization failures plus everything [`MessagingFabric::publish`] returns.
    pub async fn publish_json<T: Serialize>(&self, topic: &str, payload: &T) -> Result<(), MessagingError> {
        let body = serde_json::to_vec(payload)?;
        self.publish(topic, body).await
    }

    /// Starts a reader on (`topic`, `channel`) feeding `handler`.
    ///
    /// # Errors
    ///
    /// Invalid names, or a discovery endpoint that cannot be resolved.
    pub async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), MessagingError> {
        let spec = ReaderSpec {
            topic: normalize_topic(topic)?,
            channel: normalize_channel(channel)?,
            max_in_flight: self.config.max_in_flight,
        };
        let discovery = self.discovery().await?;
        debug!(topic = %spec.topic, channel = %spec.channel, lookupd = %discovery, "subscribing");
        let subscription = subscriber::spawn(
            Arc::clone(&self.transport),
            discovery,
            spec,
            handler,
            self.events.clone(),
        );
        self.subscriptions.lock().push(subscription);
        Ok(())
    }

    /// Subscribes a closure; every message is acknowledged after it runs,
    /// whether or not it fails.
    ///
    /// # Errors
    ///
    /// Same as [`MessagingFabric::subscribe`].
    pub async fn listen<F, Fut, E>(&self, topic: &str, channel: &str, f: F) -> Result<(), MessagingError>
    where
        F: Fn(Delivery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.subscribe(topic, channel, Arc::new(auto_ack(f))).await
    }

    /// Receiver for connection lifecycle events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    /// `None` until [`MessagingFabric::connect_publisher`] succeeded.
    #[must_use]
    pub fn publisher_state(&self) -> Option<LinkState> {
        self.publisher.get().map(|p| p.state())
    }

    /// Subscriptions whose reader task is still running.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions
            .lock()
            .iter()
            .filter(|s| !s.is_finished())
            .count()
    }

    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Cancels every subscription and stops the publisher.
    pub async fn shutdown(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in &subscriptions {
            subscription.cancel();
        }
        if let Some(publisher) = self.publisher.get() {
            publisher.shutdown().await;
        }
        info!(cancelled = subscriptions.len(), "messaging fabric stopped");
    }
}
