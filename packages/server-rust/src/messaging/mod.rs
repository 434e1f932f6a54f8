//! Messaging fabric over an nsq-style publish/subscribe bus.

pub mod codec;
pub mod error;
pub mod event;
pub mod fabric;
pub mod lookupd;
pub mod memory;
pub mod nsq;
pub mod publisher;
pub mod subscriber;
pub mod transport;

pub use error::MessagingError;
pub use event::{BusEvent, BusEventKind, BusRole};
pub use fabric::MessagingFabric;
pub use memory::{BusStats, MemoryBus};
pub use nsq::NsqTransport;
pub use publisher::LinkState;
pub use subscriber::{auto_ack, handler_fn, AutoAck, FnHandler, MessageHandler, Subscription};
pub use transport::{BusReader, BusTransport, BusWriter, ReaderSpec, WriterLink};

/// Resolves once `rx` observes `true` or its sender is gone.
pub(crate) async fn stopped(rx: &mut tokio::sync::watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}
