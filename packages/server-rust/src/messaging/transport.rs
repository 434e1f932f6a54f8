//! Transport seam between the fabric and a concrete message bus.

use std::time::Duration;

use async_trait::async_trait;
use fleet_core::{Delivery, Endpoint};
use tokio::sync::oneshot;

use super::error::MessagingError;

/// Outbound half of a bus connection. Calls are serialized by the owner.
#[async_trait]
pub trait BusWriter: Send {
    /// Sends `body` to an already normalized `topic`.
    async fn publish(&mut self, topic: &str, body: &[u8]) -> Result<(), MessagingError>;

    /// Sends `body` so that it becomes visible to consumers after `delay`.
    async fn publish_deferred(
        &mut self,
        topic: &str,
        body: &[u8],
        delay: Duration,
    ) -> Result<(), MessagingError>;
}

/// A freshly opened writer plus a signal that resolves (with either value)
/// once the transport notices the connection is gone.
pub struct WriterLink {
    pub writer: Box<dyn BusWriter>,
    pub closed: oneshot::Receiver<()>,
}

impl std::fmt::Debug for WriterLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterLink").finish_non_exhaustive()
    }
}

/// Inbound half bound to one (topic, channel) pair.
#[async_trait]
pub trait BusReader: Send {
    /// Next delivered message, or `None` once every underlying connection closed.
    async fn next(&mut self) -> Option<Delivery>;

    /// Acknowledges a delivery.
    async fn finish(&mut self, delivery: &Delivery) -> Result<(), MessagingError>;

    /// Returns a delivery to the broker for redelivery after `delay`.
    async fn requeue(&mut self, delivery: &Delivery, delay: Duration)
        -> Result<(), MessagingError>;
}

/// What a reader subscribes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderSpec {
    pub topic: String,
    pub channel: String,
    pub max_in_flight: u32,
}

/// Factory for bus connections.
#[async_trait]
pub trait BusTransport: Send + Sync + 'static {
    /// Opens the outbound connection to a broker endpoint.
    async fn open_writer(&self, endpoint: &Endpoint) -> Result<WriterLink, MessagingError>;

    /// Opens a reader, finding producers through the discovery endpoint.
    /// May wait until at least one producer for the topic exists.
    async fn open_reader(
        &self,
        discovery: &Endpoint,
        spec: &ReaderSpec,
    ) -> Result<Box<dyn BusReader>, MessagingError>;

    /// Short identifier for logs.
    fn name(&self) -> &'static str;
}
