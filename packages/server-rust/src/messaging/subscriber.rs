//! Subscriptions: one reader per (topic, channel) with a handler driving
//! acknowledgement.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use async_trait::async_trait;
use fleet_core::{Delivery, Disposition, Endpoint};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::event::{BusEvent, BusEventKind};
use super::transport::{BusTransport, ReaderSpec};

/// Decides what happens to each delivered message.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> Disposition;
}

/// Handler that runs a closure and acknowledges the message whatever the
/// closure returns. Errors are logged, never redelivered.
pub struct AutoAck<F> {
    f: F,
}

/// Wraps `f` so every delivery is finished after `f` completes.
pub fn auto_ack<F, Fut, E>(f: F) -> AutoAck<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send,
    E: Display + Send,
{
    AutoAck { f }
}

#[async_trait]
impl<F, Fut, E> MessageHandler for AutoAck<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send,
    E: Display + Send,
{
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        if let Err(e) = (self.f)(delivery.clone()).await {
            warn!(
                topic = %delivery.topic,
                channel = %delivery.channel,
                id = %delivery.id,
                error = %e,
                "message handler failed, acknowledging anyway"
            );
        }
        Disposition::Finish
    }
}

/// Handle to a running subscription.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    channel: String,
    task: JoinHandle<()>,
}

impl Subscription {
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Whether the reader has ended (closed by the broker or cancelled).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the reader task.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

/// Spawns the reader task for `spec`.
pub(crate) fn spawn(
    transport: Arc<dyn BusTransport>,
    discovery: Endpoint,
    spec: ReaderSpec,
    handler: Arc<dyn MessageHandler>,
    events: broadcast::Sender<BusEvent>,
) -> Subscription {
    let topic = spec.topic.clone();
    let channel = spec.channel.clone();
    let task = tokio::spawn(run_reader(transport, discovery, spec, handler, events));
    Subscription {
        topic,
        channel,
        task,
    }
}

async fn run_reader(
    transport: Arc<dyn BusTransport>,
    discovery: Endpoint,
    spec: ReaderSpec,
    handler: Arc<dyn MessageHandler>,
    events: broadcast::Sender<BusEvent>,
) {
    let emit = |kind| {
        let _ = events.send(BusEvent::subscriber(&spec.topic, &spec.channel, kind));
    };

    let mut reader = match transport.open_reader(&discovery, &spec).await {
        Ok(reader) => reader,
        Err(e) => {
            warn!(topic = %spec.topic, channel = %spec.channel, error = %e, "failed to open reader");
            emit(BusEventKind::Error(e.to_string()));
            emit(BusEventKind::Closed);
            return;
        }
    };
    info!(topic = %spec.topic, channel = %spec.channel, transport = transport.name(), "reader ready");
    emit(BusEventKind::Ready);

    while let Some(delivery) = reader.next().await {
        metrics::counter!(crate::telemetry::BUS_DELIVERIES).increment(1);
        debug!(topic = %delivery.topic, channel = %delivery.channel, id = %delivery.id, attempts = delivery.attempts, "message received");

        let ack = match handler.handle(&delivery).await {
            Disposition::Finish => reader.finish(&delivery).await,
            Disposition::Requeue { delay } => reader.requeue(&delivery, delay).await,
        };
        if let Err(e) = ack {
            warn!(topic = %spec.topic, channel = %spec.channel, id = %delivery.id, error = %e, "failed to acknowledge message");
            emit(BusEventKind::Error(e.to_string()));
        }
    }

    info!(topic = %spec.topic, channel = %spec.channel, "reader closed");
    emit(BusEventKind::Closed);
}

/// Handler built from a closure that picks the disposition itself.
pub struct FnHandler<F> {
    f: F,
}

/// Wraps `f` as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Disposition> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Disposition> + Send,
{
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        (self.f)(delivery.clone()).await
    }
}
