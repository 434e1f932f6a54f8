//! Received bus messages and the consumer's verdict on them.

use std::fmt;
use std::time::Duration;

/// Broker-assigned message identifier (16 ASCII bytes on nsqd).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub [u8; 16]);

impl MessageId {
    /// Builds an id from raw bytes, returning `None` if the slice is not 16 bytes long.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; 16]>::try_from(bytes).ok().map(Self)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// A message handed to a subscription handler.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: MessageId,
    /// Normalized topic the message was published to.
    pub topic: String,
    /// Normalized channel this subscription reads from.
    pub channel: String,
    /// Number of times the broker has handed this message out, starting at 1.
    pub attempts: u16,
    /// Broker timestamp in nanoseconds since the Unix epoch.
    pub timestamp_ns: i64,
    pub body: Vec<u8>,
    /// Ordinal of the broker connection that produced the message.
    /// Acknowledgements must travel back over the same connection.
    pub source: usize,
}

impl Delivery {
    /// Body decoded as UTF-8, replacing invalid sequences.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// What the consumer wants the broker to do with a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge: the message is consumed.
    Finish,
    /// Hand the message out again after `delay`.
    Requeue { delay: Duration },
}
