//! In-process broker with nsqd-like semantics.
//!
//! Every channel of a topic receives its own copy of each message and the
//! readers of one channel compete for it. Messages published to a topic
//! that has no channel yet are held and handed to the first channel opened.
//! Fault hooks let tests sever writers, refuse new writer connections and
//! close every reader.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use fleet_core::{Delivery, Endpoint, MessageId};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use super::error::MessagingError;
use super::transport::{BusReader, BusTransport, BusWriter, ReaderSpec, WriterLink};

/// Counters exposed for assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub finished: u64,
    pub requeued: u64,
    pub writer_connects: u64,
}

#[derive(Clone)]
struct ChannelQueue {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Delivery>>>,
}

impl ChannelQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

#[derive(Default)]
struct TopicState {
    backlog: Vec<Delivery>,
    channels: HashMap<String, ChannelQueue>,
}

struct WriterHandle {
    severed: Arc<AtomicBool>,
    closed_tx: oneshot::Sender<()>,
}

struct BusInner {
    topics: DashMap<String, TopicState>,
    next_id: AtomicU64,
    published: AtomicU64,
    finished: AtomicU64,
    requeued: AtomicU64,
    writer_connects: AtomicU64,
    refuse_writers: AtomicBool,
    writers: Mutex<Vec<WriterHandle>>,
    writer_endpoints: Mutex<Vec<Endpoint>>,
    reader_generation: watch::Sender<u64>,
}

impl BusInner {
    fn next_id(&self) -> MessageId {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = format!("{n:016x}");
        let mut id = [0u8; 16];
        id.copy_from_slice(&text.as_bytes()[text.len() - 16..]);
        MessageId(id)
    }

    /// Fans a message out to every channel of `topic`, or holds it.
    fn deliver(&self, topic: &str, body: Vec<u8>) {
        let template = Delivery {
            id: self.next_id(),
            topic: topic.to_string(),
            channel: String::new(),
            attempts: 1,
            timestamp_ns: now_ns(),
            body,
            source: 0,
        };
        let mut state = self.topics.entry(topic.to_string()).or_default();
        if state.channels.is_empty() {
            state.backlog.push(template);
            return;
        }
        for (channel, queue) in &state.channels {
            let mut copy = template.clone();
            copy.channel.clone_from(channel);
            let _ = queue.tx.send(copy);
        }
    }

    /// Returns the queue for a channel, creating it (and draining the
    /// topic backlog into it) on first use.
    fn channel_queue(&self, topic: &str, channel: &str) -> ChannelQueue {
        let mut state = self.topics.entry(topic.to_string()).or_default();
        if let Some(queue) = state.channels.get(channel) {
            return queue.clone();
        }
        let queue = ChannelQueue::new();
        for mut held in std::mem::take(&mut state.backlog) {
            held.channel = channel.to_string();
            let _ = queue.tx.send(held);
        }
        state.channels.insert(channel.to_string(), queue.clone());
        queue
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}

/// Cloneable handle to a shared in-process broker.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    #[must_use]
    pub fn new() -> Self {
        let (reader_generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(BusInner {
                topics: DashMap::new(),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                finished: AtomicU64::new(0),
                requeued: AtomicU64::new(0),
                writer_connects: AtomicU64::new(0),
                refuse_writers: AtomicBool::new(false),
                writers: Mutex::new(Vec::new()),
                writer_endpoints: Mutex::new(Vec::new()),
                reader_generation,
            }),
        }
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            finished: self.inner.finished.load(Ordering::Relaxed),
            requeued: self.inner.requeued.load(Ordering::Relaxed),
            writer_connects: self.inner.writer_connects.load(Ordering::Relaxed),
        }
    }

    /// Messages held for a topic that has no channel yet.
    #[must_use]
    pub fn backlog_len(&self, topic: &str) -> usize {
        self.inner.topics.get(topic).map_or(0, |t| t.backlog.len())
    }

    /// Endpoints writers have been opened against, in order.
    #[must_use]
    pub fn writer_endpoints(&self) -> Vec<Endpoint> {
        self.inner.writer_endpoints.lock().clone()
    }

    /// Drops every open writer connection. Their `closed` signals fire and
    /// further sends on them fail with `ConnectionClosed`.
    pub fn sever_writers(&self) {
        let handles = std::mem::take(&mut *self.inner.writers.lock());
        debug!(count = handles.len(), "severing memory bus writers");
        for handle in handles {
            handle.severed.store(true, Ordering::Release);
            drop(handle.closed_tx);
        }
    }

    /// While set, `open_writer` fails with a connect error.
    pub fn refuse_writers(&self, refuse: bool) {
        self.inner.refuse_writers.store(refuse, Ordering::Release);
    }

    /// Ends every reader opened so far; their `next` returns `None`.
    pub fn close_readers(&self) {
        self.inner.reader_generation.send_modify(|g| *g += 1);
    }
}

#[async_trait]
impl BusTransport for MemoryBus {
    async fn open_writer(&self, endpoint: &Endpoint) -> Result<WriterLink, MessagingError> {
        self.inner.writer_endpoints.lock().push(endpoint.clone());
        if self.inner.refuse_writers.load(Ordering::Acquire) {
            return Err(MessagingError::Connect {
                endpoint: endpoint.address(),
                reason: "connection refused".to_string(),
            });
        }
        let severed = Arc::new(AtomicBool::new(false));
        let (closed_tx, closed) = oneshot::channel();
        self.inner.writers.lock().push(WriterHandle {
            severed: Arc::clone(&severed),
            closed_tx,
        });
        self.inner.writer_connects.fetch_add(1, Ordering::Relaxed);
        Ok(WriterLink {
            writer: Box::new(MemoryWriter {
                bus: Arc::clone(&self.inner),
                severed,
            }),
            closed,
        })
    }

    async fn open_reader(
        &self,
        _discovery: &Endpoint,
        spec: &ReaderSpec,
    ) -> Result<Box<dyn BusReader>, MessagingError> {
        let queue = self.inner.channel_queue(&spec.topic, &spec.channel);
        let generation = self.inner.reader_generation.subscribe();
        let opened_at = *generation.borrow();
        Ok(Box::new(MemoryReader {
            bus: Arc::clone(&self.inner),
            queue,
            generation,
            opened_at,
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryWriter {
    bus: Arc<BusInner>,
    severed: Arc<AtomicBool>,
}

impl MemoryWriter {
    fn check_open(&self) -> Result<(), MessagingError> {
        if self.severed.load(Ordering::Acquire) {
            Err(MessagingError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BusWriter for MemoryWriter {
    async fn publish(&mut self, topic: &str, body: &[u8]) -> Result<(), MessagingError> {
        self.check_open()?;
        self.bus.published.fetch_add(1, Ordering::Relaxed);
        self.bus.deliver(topic, body.to_vec());
        Ok(())
    }

    async fn publish_deferred(
        &mut self,
        topic: &str,
        body: &[u8],
        delay: Duration,
    ) -> Result<(), MessagingError> {
        self.check_open()?;
        self.bus.published.fetch_add(1, Ordering::Relaxed);
        let bus = Arc::clone(&self.bus);
        let topic = topic.to_string();
        let body = body.to_vec();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            bus.deliver(&topic, body);
        });
        Ok(())
    }
}

struct MemoryReader {
    bus: Arc<BusInner>,
    queue: ChannelQueue,
    generation: watch::Receiver<u64>,
    opened_at: u64,
}

#[async_trait]
impl BusReader for MemoryReader {
    async fn next(&mut self) -> Option<Delivery> {
        let opened_at = self.opened_at;
        if *self.generation.borrow() > opened_at {
            return None;
        }
        let rx = Arc::clone(&self.queue.rx);
        let generation = &mut self.generation;
        tokio::select! {
            () = async move {
                let _ = generation.wait_for(|g| *g > opened_at).await;
            } => None,
            delivery = async move { rx.lock().await.recv().await } => delivery,
        }
    }

    async fn finish(&mut self, _delivery: &Delivery) -> Result<(), MessagingError> {
        self.bus.finished.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn requeue(&mut self, delivery: &Delivery, delay: Duration) -> Result<(), MessagingError> {
        self.bus.requeued.fetch_add(1, Ordering::Relaxed);
        let mut again = delivery.clone();
        again.attempts = again.attempts.saturating_add(1);
        let tx = self.queue.tx.clone();
        if delay.is_zero() {
            let _ = tx.send(again);
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(again);
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(topic: &str, channel: &str) -> ReaderSpec {
        ReaderSpec {
            topic: topic.to_string(),
            channel: channel.to_string(),
            max_in_flight: 1,
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint::new("memory", "0")
    }

    #[tokio::test]
    async fn every_channel_gets_a_copy() {
        let bus = MemoryBus::new();
        let mut a = bus.open_reader(&endpoint(), &spec("orders", "billing")).await.unwrap();
        let mut b = bus.open_reader(&endpoint(), &spec("orders", "audit")).await.unwrap();
        let mut link = bus.open_writer(&endpoint()).await.unwrap();

        link.writer.publish("orders", b"one").await.unwrap();

        let got_a = a.next().await.unwrap();
        let got_b = b.next().await.unwrap();
        assert_eq!(got_a.body, b"one");
        assert_eq!(got_a.channel, "billing");
        assert_eq!(got_b.channel, "audit");
        assert_eq!(got_a.id, got_b.id);
        assert_eq!(got_a.attempts, 1);
    }

    #[tokio::test]
    async fn messages_before_any_channel_are_held() {
        let bus = MemoryBus::new();
        let mut link = bus.open_writer(&endpoint()).await.unwrap();
        link.writer.publish("orders", b"early").await.unwrap();
        assert_eq!(bus.backlog_len("orders"), 1);

        let mut reader = bus.open_reader(&endpoint(), &spec("orders", "billing")).await.unwrap();
        assert_eq!(reader.next().await.unwrap().body, b"early");
        assert_eq!(bus.backlog_len("orders"), 0);
    }

    #[tokio::test]
    async fn message_ids_are_sixteen_hex_chars() {
        let bus = MemoryBus::new();
        let mut reader = bus.open_reader(&endpoint(), &spec("t", "c")).await.unwrap();
        let mut link = bus.open_writer(&endpoint()).await.unwrap();
        link.writer.publish("t", b"x").await.unwrap();
        assert_eq!(reader.next().await.unwrap().id.to_string(), "0000000000000001");
    }

    #[tokio::test]
    async fn requeue_redelivers_with_bumped_attempts() {
        let bus = MemoryBus::new();
        let mut reader = bus.open_reader(&endpoint(), &spec("t", "c")).await.unwrap();
        let mut link = bus.open_writer(&endpoint()).await.unwrap();
        link.writer.publish("t", b"x").await.unwrap();

        let first = reader.next().await.unwrap();
        reader.requeue(&first, Duration::ZERO).await.unwrap();
        let second = reader.next().await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.attempts, 2);

        reader.finish(&second).await.unwrap();
        let stats = bus.stats();
        assert_eq!(stats.requeued, 1);
        assert_eq!(stats.finished, 1);
        assert_eq!(stats.published, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_publish_waits_for_delay() {
        let bus = MemoryBus::new();
        let mut reader = bus.open_reader(&endpoint(), &spec("t", "c")).await.unwrap();
        let mut link = bus.open_writer(&endpoint()).await.unwrap();
        link.writer
            .publish_deferred("t", b"later", Duration::from_secs(30))
            .await
            .unwrap();

        let early = tokio::time::timeout(Duration::from_secs(29), reader.next()).await;
        assert!(early.is_err());
        let delivered = tokio::time::timeout(Duration::from_secs(2), reader.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.body, b"later");
    }

    #[tokio::test]
    async fn severed_writer_fails_and_signals_closed() {
        let bus = MemoryBus::new();
        let mut link = bus.open_writer(&endpoint()).await.unwrap();
        bus.sever_writers();

        assert!(link.closed.await.is_err());
        let err = link.writer.publish("t", b"x").await.unwrap_err();
        assert!(err.is_connection_loss());
    }

    #[tokio::test]
    async fn refused_writers_get_connect_errors() {
        let bus = MemoryBus::new();
        bus.refuse_writers(true);
        let err = bus.open_writer(&endpoint()).await.unwrap_err();
        assert!(matches!(err, MessagingError::Connect { .. }));

        bus.refuse_writers(false);
        assert!(bus.open_writer(&endpoint()).await.is_ok());
        assert_eq!(bus.stats().writer_connects, 1);
        assert_eq!(bus.writer_endpoints().len(), 2);
    }

    #[tokio::test]
    async fn closed_readers_return_none() {
        let bus = MemoryBus::new();
        let mut reader = bus.open_reader(&endpoint(), &spec("t", "c")).await.unwrap();
        bus.close_readers();
        assert!(reader.next().await.is_none());

        let mut fresh = bus.open_reader(&endpoint(), &spec("t", "c")).await.unwrap();
        let mut link = bus.open_writer(&endpoint()).await.unwrap();
        link.writer.publish("t", b"x").await.unwrap();
        assert!(fresh.next().await.is_some());
    }
}
