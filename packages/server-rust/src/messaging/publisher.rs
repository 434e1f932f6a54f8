//! Supervised publisher connection.
//!
//! The publisher owns at most one live writer. When the transport reports
//! the connection closed, or a send fails with a connection-loss error, the
//! writer is dropped and a supervisor task reconnects: it re-resolves the
//! broker endpoint for every attempt, spaces attempts with capped
//! exponential backoff and honours the circuit breaker's cool-down. Retries
//! never stop until [`Publisher::shutdown`].
//!
//! Sends made while no writer is installed fail immediately with
//! [`MessagingError::ConnectionClosed`]; nothing is queued.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use fleet_core::Endpoint;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::MessagingError;
use super::event::{BusEvent, BusEventKind};
use super::stopped;
use super::transport::{BusTransport, BusWriter, WriterLink};
use crate::config::{BackendConfig, ReconnectConfig};
use crate::resilience::{Backoff, CircuitBreaker};
use crate::resolver::Resolver;

/// Observable state of the publisher link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// A connection attempt is pending.
    Connecting,
    /// A writer is installed and sends go through.
    Ready,
    /// No writer; the supervisor will retry unless shut down.
    Closed,
}

pub struct Publisher {
    transport: Arc<dyn BusTransport>,
    resolver: Arc<Resolver>,
    backend: BackendConfig,
    reconnect: ReconnectConfig,
    state: ArcSwap<LinkState>,
    /// `Some` exactly while the state is `Ready`. Both change under this lock.
    writer: tokio::sync::Mutex<Option<Box<dyn BusWriter>>>,
    generation: AtomicU64,
    lost: Notify,
    shutdown: watch::Sender<bool>,
    events: broadcast::Sender<BusEvent>,
    supervisor: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("backend", &self.backend)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Publisher {
    /// Resolves the broker and starts the supervised connection.
    ///
    /// A failed first connect is logged and retried in the background; the
    /// publisher is returned in the `Closed` state.
    ///
    /// # Errors
    ///
    /// Returns `MessagingError::Resolution` if the broker endpoint cannot be
    /// resolved at all.
    pub async fn connect(
        transport: Arc<dyn BusTransport>,
        resolver: Arc<Resolver>,
        backend: BackendConfig,
        reconnect: ReconnectConfig,
        events: broadcast::Sender<BusEvent>,
    ) -> Result<Arc<Self>, MessagingError> {
        let endpoint = resolver
            .resolve(&backend.logical_name, &backend.host)
            .await?;
        let (shutdown, _) = watch::channel(false);
        let publisher = Arc::new(Self {
            transport,
            resolver,
            backend,
            reconnect,
            state: ArcSwap::from_pointee(LinkState::Connecting),
            writer: tokio::sync::Mutex::new(None),
            generation: AtomicU64::new(0),
            lost: Notify::new(),
            shutdown,
            events,
            supervisor: parking_lot::Mutex::new(None),
        });

        match publisher.transport.open_writer(&endpoint).await {
            Ok(link) => publisher.install(link, &endpoint).await,
            Err(e) => {
                warn!(nsqd = %endpoint, error = %e, "initial publisher connect failed, retrying in background");
                publisher.state.store(Arc::new(LinkState::Closed));
                publisher.emit(BusEventKind::Error(e.to_string()));
            }
        }

        let handle = tokio::spawn(Arc::clone(&publisher).supervise());
        *publisher.supervisor.lock() = Some(handle);
        Ok(publisher)
    }

    #[must_use]
    pub fn state(&self) -> LinkState {
        **self.state.load()
    }

    /// Publishes `body` to an already normalized topic, optionally deferred.
    ///
    /// # Errors
    ///
    /// `ConnectionClosed` while no writer is installed, otherwise whatever the
    /// writer reports. Connection-loss errors also hand the link to the
    /// supervisor.
    pub async fn send(
        &self,
        topic: &str,
        body: &[u8],
        delay: Option<Duration>,
    ) -> Result<(), MessagingError> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            metrics::counter!(crate::telemetry::BUS_PUBLISH_FAILURES).increment(1);
            return Err(MessagingError::ConnectionClosed);
        };

        let result = match delay {
            Some(delay) => writer.publish_deferred(topic, body, delay).await,
            None => writer.publish(topic, body).await,
        };
        match result {
            Ok(()) => {
                metrics::counter!(crate::telemetry::BUS_PUBLISHED).increment(1);
                Ok(())
            }
            Err(e) => {
                metrics::counter!(crate::telemetry::BUS_PUBLISH_FAILURES).increment(1);
                if e.is_connection_loss() {
                    *guard = None;
                    self.mark_closed(&e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Stops the supervisor and drops the writer. Idempotent.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let mut guard = self.writer.lock().await;
        if guard.take().is_some() {
            self.emit(BusEventKind::Closed);
        }
        self.state.store(Arc::new(LinkState::Closed));
        debug!("publisher stopped");
    }

    // -----------------------------------------------------------------------
    // Link management
    // -----------------------------------------------------------------------

    fn emit(&self, kind: BusEventKind) {
        let _ = self.events.send(BusEvent::publisher(kind));
    }

    /// Caller holds the writer lock and has already cleared it.
    fn mark_closed(&self, reason: &str) {
        if self.state() == LinkState::Ready {
            self.state.store(Arc::new(LinkState::Closed));
            warn!(reason, "publisher connection lost");
            self.emit(BusEventKind::Closed);
            self.lost.notify_one();
        }
    }

    async fn install(self: &Arc<Self>, link: WriterLink, endpoint: &Endpoint) {
        let WriterLink { writer, closed } = link;
        let generation = {
            let mut guard = self.writer.lock().await;
            *guard = Some(writer);
            self.state.store(Arc::new(LinkState::Ready));
            self.generation.fetch_add(1, Ordering::AcqRel) + 1
        };
        info!(nsqd = %endpoint, "publisher ready");
        self.emit(BusEventKind::Ready);

        let weak = Arc::downgrade(self);
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = closed => {}
                () = stopped(&mut shutdown) => return,
            }
            if let Some(publisher) = weak.upgrade() {
                publisher.link_closed(generation).await;
            }
        });
    }

    /// Transport-side close of the link installed as `generation`.
    async fn link_closed(&self, generation: u64) {
        let mut guard = self.writer.lock().await;
        if self.generation.load(Ordering::Acquire) == generation && guard.is_some() {
            *guard = None;
            self.mark_closed("transport closed the connection");
        }
    }

    async fn try_connect(&self) -> Result<(WriterLink, Endpoint), MessagingError> {
        let endpoint = self
            .resolver
            .resolve(&self.backend.logical_name, &self.backend.host)
            .await?;
        let link = self.transport.open_writer(&endpoint).await?;
        Ok((link, endpoint))
    }

    async fn supervise(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut backoff = Backoff::new(&self.reconnect);
        let breaker = CircuitBreaker::new("nsqd-publisher", &self.reconnect);

        loop {
            if *shutdown.borrow() {
                break;
            }
            if self.state() == LinkState::Ready {
                tokio::select! {
                    () = self.lost.notified() => continue,
                    () = stopped(&mut shutdown) => break,
                }
            }

            let delay = breaker.wait_time().max(backoff.next_delay());
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = stopped(&mut shutdown) => break,
            }
            if !breaker.wait_time().is_zero() {
                continue;
            }

            self.state.store(Arc::new(LinkState::Connecting));
            metrics::counter!(crate::telemetry::BUS_RECONNECT_ATTEMPTS).increment(1);
            match self.try_connect().await {
                Ok((link, endpoint)) => {
                    breaker.record_success();
                    backoff.reset();
                    self.install(link, &endpoint).await;
                }
                Err(e) => {
                    breaker.record_failure();
                    self.state.store(Arc::new(LinkState::Closed));
                    warn!(attempt = backoff.attempts(), error = %e, "publisher reconnect failed");
                    self.emit(BusEventKind::Error(e.to_string()));
                }
            }
        }
        debug!("publisher supervisor exited");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use fleet_core::MapEnv;

    use super::*;
    use crate::messaging::memory::MemoryBus;
    use crate::resolver::{DnsLookup, HostLookup};

    struct NoLookup;

    #[async_trait]
    impl HostLookup for NoLookup {
        async fn lookup(&self, _host: &str) -> std::io::Result<Vec<std::net::SocketAddr>> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such host"))
        }
    }

    fn reconnect() -> ReconnectConfig {
        ReconnectConfig {
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
            multiplier: 2.0,
            jitter: 0.0,
            failure_threshold: 100,
            open_timeout_ms: 1_000,
        }
    }

    async fn start(bus: &MemoryBus) -> Arc<Publisher> {
        let (events, _) = broadcast::channel(64);
        Publisher::connect(
            Arc::new(bus.clone()),
            Arc::new(Resolver::new(Arc::new(MapEnv::new()), Arc::new(DnsLookup))),
            BackendConfig::new("NSQD", "127.0.0.1:4150"),
            reconnect(),
            events,
        )
        .await
        .unwrap()
    }

    async fn wait_for_state(publisher: &Publisher, want: LinkState) {
        for _ in 0..1_000 {
            if publisher.state() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("publisher never reached {want:?}, stuck in {:?}", publisher.state());
    }

    #[tokio::test(start_paused = true)]
    async fn connects_and_publishes() {
        let bus = MemoryBus::new();
        let publisher = start(&bus).await;
        assert_eq!(publisher.state(), LinkState::Ready);

        publisher.send("orders", b"x", None).await.unwrap();
        assert_eq!(bus.stats().published, 1);
        assert_eq!(bus.writer_endpoints(), vec![Endpoint::new("127.0.0.1", "4150")]);
        publisher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn publish_during_outage_fails_then_link_recovers() {
        let bus = MemoryBus::new();
        let publisher = start(&bus).await;

        bus.refuse_writers(true);
        bus.sever_writers();
        wait_for_state(&publisher, LinkState::Closed).await;
        let err = publisher.send("orders", b"x", None).await.unwrap_err();
        assert!(matches!(err, MessagingError::ConnectionClosed));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_ne!(publisher.state(), LinkState::Ready);

        bus.refuse_writers(false);
        wait_for_state(&publisher, LinkState::Ready).await;
        publisher.send("orders", b"y", None).await.unwrap();

        assert_eq!(bus.stats().published, 1);
        assert_eq!(bus.stats().writer_connects, 2);
        // One endpoint per connect attempt, each resolved afresh.
        assert!(bus.writer_endpoints().len() >= 3);
        publisher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_first_connect_is_retried_in_background() {
        let bus = MemoryBus::new();
        bus.refuse_writers(true);
        let publisher = start(&bus).await;
        assert_ne!(publisher.state(), LinkState::Ready);

        bus.refuse_writers(false);
        wait_for_state(&publisher, LinkState::Ready).await;
        publisher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn severed_link_emits_closed_then_ready() {
        let bus = MemoryBus::new();
        let (events, mut rx) = broadcast::channel(64);
        let publisher = Publisher::connect(
            Arc::new(bus.clone()),
            Arc::new(Resolver::new(Arc::new(MapEnv::new()), Arc::new(DnsLookup))),
            BackendConfig::new("NSQD", "127.0.0.1:4150"),
            reconnect(),
            events,
        )
        .await
        .unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, BusEventKind::Ready);

        bus.sever_writers();
        assert_eq!(rx.recv().await.unwrap().kind, BusEventKind::Closed);
        assert_eq!(rx.recv().await.unwrap().kind, BusEventKind::Ready);
        publisher.shutdown().await;
    }

    #[tokio::test]
    async fn unresolvable_broker_is_fatal() {
        let (events, _) = broadcast::channel(8);
        let err = Publisher::connect(
            Arc::new(MemoryBus::new()),
            Arc::new(Resolver::new(Arc::new(MapEnv::new()), Arc::new(NoLookup))),
            BackendConfig::new("NSQD", "nsqd:4150"),
            reconnect(),
            events,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MessagingError::Resolution(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_reconnecting() {
        let bus = MemoryBus::new();
        let publisher = start(&bus).await;
        bus.refuse_writers(true);
        bus.sever_writers();
        wait_for_state(&publisher, LinkState::Closed).await;

        publisher.shutdown().await;
        let attempts = bus.writer_endpoints().len();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(bus.writer_endpoints().len(), attempts);
        assert_eq!(publisher.state(), LinkState::Closed);
    }
}
