//! nsqd / nsqlookupd transport.
//!
//! Each TCP connection is split: a spawned task drains the read half
//! (answering heartbeats with `NOP`), while the write half sits behind an
//! async mutex shared with the owning writer or reader. Dropping the owner
//! aborts its read tasks, which releases both halves and closes the socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fleet_core::{Delivery, Endpoint};
use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use super::codec::{Command, Frame, NsqCodec, OK};
use super::error::MessagingError;
use super::lookupd::lookup_producers;
use super::transport::{BusReader, BusTransport, BusWriter, ReaderSpec, WriterLink};
use crate::config::BusConfig;

type SharedSink = Arc<Mutex<FramedWrite<OwnedWriteHalf, NsqCodec>>>;
type FrameStream = FramedRead<OwnedReadHalf, NsqCodec>;

/// Bound on the best-effort `CLS` sent when a reader goes away.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Read task of one connection, aborted when dropped.
struct ReadTask(JoinHandle<()>);

impl Drop for ReadTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// One subscribed producer connection.
struct ProducerLink {
    sink: SharedSink,
    task: ReadTask,
}

/// Talks the nsqd TCP protocol and discovers producers through nsqlookupd.
#[derive(Debug, Clone)]
pub struct NsqTransport {
    http: reqwest::Client,
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl NsqTransport {
    /// # Errors
    ///
    /// Returns an error if the HTTP client for discovery cannot be built.
    pub fn new(config: &BusConfig) -> Result<Self, MessagingError> {
        let http = reqwest::Client::builder()
            .timeout(config.connect_timeout())
            .build()
            .map_err(|e| MessagingError::Protocol(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            connect_timeout: config.connect_timeout(),
            poll_interval: config.lookupd_poll_interval(),
        })
    }

    /// TCP connect plus protocol magic.
    async fn connect(&self, endpoint: &Endpoint) -> Result<(SharedSink, FrameStream), MessagingError> {
        let address = endpoint.address();
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| MessagingError::Connect {
                endpoint: address.clone(),
                reason: "timed out".to_string(),
            })?
            .map_err(|e| MessagingError::Connect {
                endpoint: address.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;

        let (read, write) = stream.into_split();
        let mut sink = FramedWrite::new(write, NsqCodec::default());
        sink.send(Command::Magic).await?;
        Ok((
            Arc::new(Mutex::new(sink)),
            FramedRead::new(read, NsqCodec::default()),
        ))
    }

    async fn connect_consumer(
        &self,
        producer: &Endpoint,
        spec: &ReaderSpec,
        ordinal: usize,
        deliveries: mpsc::Sender<Delivery>,
    ) -> Result<ProducerLink, MessagingError> {
        let (sink, mut stream) = self.connect(producer).await?;
        sink.lock()
            .await
            .send(Command::Sub {
                topic: spec.topic.clone(),
                channel: spec.channel.clone(),
            })
            .await?;

        // The first non-heartbeat frame answers SUB.
        loop {
            match stream.next().await {
                Some(Ok(frame)) if frame.is_heartbeat() => {
                    sink.lock().await.send(Command::Nop).await?;
                }
                Some(Ok(Frame::Response(data))) if data.as_ref() == OK => break,
                Some(Ok(Frame::Error(data))) => {
                    return Err(MessagingError::Protocol(format!(
                        "SUB rejected by {producer}: {}",
                        String::from_utf8_lossy(&data)
                    )));
                }
                Some(Ok(other)) => {
                    return Err(MessagingError::Protocol(format!(
                        "unexpected reply to SUB from {producer}: {other:?}"
                    )));
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Err(MessagingError::ConnectionClosed),
            }
        }

        sink.lock()
            .await
            .send(Command::Rdy(spec.max_in_flight.max(1)))
            .await?;

        let task = ReadTask(tokio::spawn(consume_frames(
            stream,
            Arc::clone(&sink),
            spec.clone(),
            ordinal,
            deliveries,
            producer.address(),
        )));
        Ok(ProducerLink { sink, task })
    }
}

/// Read loop of a subscribed connection.
async fn consume_frames(
    mut stream: FrameStream,
    sink: SharedSink,
    spec: ReaderSpec,
    ordinal: usize,
    deliveries: mpsc::Sender<Delivery>,
    producer: String,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(frame) if frame.is_heartbeat() => {
                if sink.lock().await.send(Command::Nop).await.is_err() {
                    break;
                }
            }
            Ok(Frame::Message(raw)) => {
                let delivery = Delivery {
                    id: raw.id,
                    topic: spec.topic.clone(),
                    channel: spec.channel.clone(),
                    attempts: raw.attempts,
                    timestamp_ns: raw.timestamp_ns,
                    body: raw.body.to_vec(),
                    source: ordinal,
                };
                if deliveries.send(delivery).await.is_err() {
                    break;
                }
            }
            Ok(Frame::Error(data)) => {
                warn!(producer = %producer, error = %String::from_utf8_lossy(&data), "nsqd reported an error");
            }
            Ok(Frame::Response(_)) => {}
            Err(e) => {
                warn!(producer = %producer, error = %e, "nsqd reader connection failed");
                break;
            }
        }
    }
    debug!(producer = %producer, topic = %spec.topic, channel = %spec.channel, "nsqd reader connection closed");
}

#[async_trait]
impl BusTransport for NsqTransport {
    async fn open_writer(&self, endpoint: &Endpoint) -> Result<WriterLink, MessagingError> {
        let (sink, mut stream) = self.connect(endpoint).await?;
        let (responses_tx, responses) = mpsc::unbounded_channel();
        let (closed_tx, closed) = oneshot::channel();

        let heartbeat_sink = Arc::clone(&sink);
        let address = endpoint.address();
        let read_task = ReadTask(tokio::spawn(async move {
            let _closed_tx = closed_tx;
            while let Some(frame) = stream.next().await {
                let reply = match frame {
                    Ok(frame) if frame.is_heartbeat() => {
                        if heartbeat_sink.lock().await.send(Command::Nop).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Ok(Frame::Response(_)) => Ok(()),
                    Ok(Frame::Error(data)) => Err(String::from_utf8_lossy(&data).into_owned()),
                    Ok(Frame::Message(_)) => {
                        warn!(nsqd = %address, "unexpected message frame on writer connection");
                        continue;
                    }
                    Err(e) => {
                        warn!(nsqd = %address, error = %e, "nsqd writer connection failed");
                        break;
                    }
                };
                if responses_tx.send(reply).is_err() {
                    break;
                }
            }
            debug!(nsqd = %address, "nsqd writer connection closed");
        }));

        info!(nsqd = %endpoint, "nsqd writer connected");
        Ok(WriterLink {
            writer: Box::new(NsqWriter {
                sink,
                responses,
                reply_timeout: self.connect_timeout,
                unanswered: 0,
                broken: false,
                _read_task: read_task,
            }),
            closed,
        })
    }

    async fn open_reader(
        &self,
        discovery: &Endpoint,
        spec: &ReaderSpec,
    ) -> Result<Box<dyn BusReader>, MessagingError> {
        let producers = loop {
            match lookup_producers(&self.http, discovery, &spec.topic).await {
                Ok(found) if !found.is_empty() => break found,
                Ok(_) => debug!(topic = %spec.topic, "no producers for topic yet"),
                Err(e) => warn!(topic = %spec.topic, error = %e, "producer discovery failed"),
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        let capacity = usize::try_from(spec.max_in_flight.max(1)).unwrap_or(1) * producers.len();
        let (tx, rx) = mpsc::channel(capacity);
        let mut links = Vec::with_capacity(producers.len());
        for (ordinal, producer) in producers.iter().enumerate() {
            match self.connect_consumer(producer, spec, ordinal, tx.clone()).await {
                Ok(link) => {
                    info!(producer = %producer, topic = %spec.topic, channel = %spec.channel, "nsqd reader subscribed");
                    links.push(Some(link));
                }
                Err(e) => {
                    warn!(producer = %producer, error = %e, "failed to subscribe to producer");
                    links.push(None);
                }
            }
        }

        if links.iter().all(Option::is_none) {
            return Err(MessagingError::Connect {
                endpoint: discovery.address(),
                reason: format!("no producer of '{}' accepted the subscription", spec.topic),
            });
        }
        Ok(Box::new(NsqReader {
            deliveries: rx,
            links,
        }))
    }

    fn name(&self) -> &'static str {
        "nsq"
    }
}

/// Publisher side of an nsqd connection.
///
/// nsqd answers commands in order, so replies are matched by position. A
/// send cancelled after its command was queued leaves its reply behind;
/// `unanswered` counts those so the next send skips them before reading
/// its own.
struct NsqWriter {
    sink: SharedSink,
    responses: mpsc::UnboundedReceiver<Result<(), String>>,
    reply_timeout: Duration,
    unanswered: usize,
    broken: bool,
    _read_task: ReadTask,
}

impl NsqWriter {
    async fn next_reply(&mut self) -> Result<Result<(), String>, MessagingError> {
        match tokio::time::timeout(self.reply_timeout, self.responses.recv()).await {
            Ok(Some(reply)) => {
                self.unanswered = self.unanswered.saturating_sub(1);
                Ok(reply)
            }
            Ok(None) => {
                self.broken = true;
                Err(MessagingError::ConnectionClosed)
            }
            Err(_) => {
                self.broken = true;
                warn!(timeout = ?self.reply_timeout, "nsqd stopped answering");
                Err(MessagingError::ReplyTimeout(self.reply_timeout))
            }
        }
    }

    async fn send_and_confirm(&mut self, topic: &str, cmd: Command) -> Result<(), MessagingError> {
        if self.broken {
            return Err(MessagingError::ConnectionClosed);
        }
        {
            let mut sink = self.sink.lock().await;
            sink.feed(cmd).await?;
            // Queued: a reply is owed from here on, even if this future is dropped.
            self.unanswered += 1;
            sink.flush().await?;
        }

        while self.unanswered > 1 {
            if let Err(reason) = self.next_reply().await? {
                debug!(reason = %reason, "skipped reply to a cancelled publish");
            }
        }
        match self.next_reply().await? {
            Ok(()) => Ok(()),
            Err(reason) => Err(MessagingError::Publish {
                topic: topic.to_string(),
                reason,
            }),
        }
    }
}

#[async_trait]
impl BusWriter for NsqWriter {
    async fn publish(&mut self, topic: &str, body: &[u8]) -> Result<(), MessagingError> {
        let cmd = Command::Pub {
            topic: topic.to_string(),
            body: Bytes::copy_from_slice(body),
        };
        self.send_and_confirm(topic, cmd).await
    }

    async fn publish_deferred(
        &mut self,
        topic: &str,
        body: &[u8],
        delay: Duration,
    ) -> Result<(), MessagingError> {
        #[allow(clippy::cast_possible_truncation)]
        let cmd = Command::Dpub {
            topic: topic.to_string(),
            delay_ms: delay.as_millis() as u64,
            body: Bytes::copy_from_slice(body),
        };
        self.send_and_confirm(topic, cmd).await
    }
}

/// Consumer side: deliveries from every producer connection merged into one queue.
struct NsqReader {
    deliveries: mpsc::Receiver<Delivery>,
    links: Vec<Option<ProducerLink>>,
}

impl NsqReader {
    async fn send_to_source(&self, delivery: &Delivery, cmd: Command) -> Result<(), MessagingError> {
        let link = self
            .links
            .get(delivery.source)
            .and_then(Option::as_ref)
            .ok_or(MessagingError::ConnectionClosed)?;
        link.sink.lock().await.send(cmd).await?;
        Ok(())
    }
}

impl Drop for NsqReader {
    fn drop(&mut self) {
        let links: Vec<ProducerLink> = self.links.drain(..).flatten().collect();
        if links.is_empty() {
            return;
        }
        // Outside a runtime the links just drop, which still closes the sockets.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        runtime.spawn(async move {
            for ProducerLink { sink, task } in links {
                drop(task);
                let mut sink = sink.lock().await;
                match tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Command::Cls)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(error = %e, "failed to send CLS"),
                    Err(_) => debug!("timed out sending CLS"),
                }
            }
        });
    }
}

#[async_trait]
impl BusReader for NsqReader {
    async fn next(&mut self) -> Option<Delivery> {
        self.deliveries.recv().await
    }

    async fn finish(&mut self, delivery: &Delivery) -> Result<(), MessagingError> {
        self.send_to_source(delivery, Command::Fin(delivery.id)).await
    }

    async fn requeue(&mut self, delivery: &Delivery, delay: Duration) -> Result<(), MessagingError> {
        #[allow(clippy::cast_possible_truncation)]
        let cmd = Command::Req {
            id: delivery.id,
            delay_ms: delay.as_millis() as u64,
        };
        self.send_to_source(delivery, cmd).await
    }
}
