//! Named in-process events shared by every service.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

/// Event emitter with any number of listeners per event name. Listeners
/// that fall more than `CHANNEL_CAPACITY` events behind observe a lag error.
#[derive(Debug, Default)]
pub struct EventBus {
    channels: DashMap<String, broadcast::Sender<Value>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, name: &str) -> broadcast::Sender<Value> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Listens to `name` from now on.
    #[must_use]
    pub fn subscribe(&self, name: &str) -> broadcast::Receiver<Value> {
        self.sender(name).subscribe()
    }

    /// Delivers `payload` to every current listener of `name` and returns
    /// how many there were.
    pub fn emit(&self, name: &str, payload: Value) -> usize {
        self.channels
            .get(name)
            .and_then(|tx| tx.send(payload).ok())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.channels.get(name).map_or(0, |tx| tx.receiver_count())
    }
}
