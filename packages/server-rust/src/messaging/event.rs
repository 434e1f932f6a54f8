//! Connection lifecycle notifications broadcast by the fabric.

/// Which side of the fabric an event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusRole {
    Publisher,
    Subscriber,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEventKind {
    /// The connection is usable.
    Ready,
    /// The connection is gone. Publishers reconnect on their own; readers do not.
    Closed,
    /// A failure that did not (yet) change the connection state.
    Error(String),
}

/// One lifecycle event. `topic` and `channel` are set for subscriber events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEvent {
    pub role: BusRole,
    pub topic: Option<String>,
    pub channel: Option<String>,
    pub kind: BusEventKind,
}

impl BusEvent {
    #[must_use]
    pub fn publisher(kind: BusEventKind) -> Self {
        Self {
            role: BusRole::Publisher,
            topic: None,
            channel: None,
            kind,
        }
    }

    #[must_use]
    pub fn subscriber(topic: &str, channel: &str, kind: BusEventKind) -> Self {
        Self {
            role: BusRole::Subscriber,
            topic: Some(topic.to_string()),
            channel: Some(channel.to_string()),
            kind,
        }
    }
}
