use fleet_core::NamingError;

use crate::resolver::ResolutionError;

/// Errors surfaced by the messaging fabric and its transports.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// The broker rejected or failed a send.
    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },
    /// No usable connection: the link dropped or is still reconnecting.
    #[error("bus connection closed")]
    ConnectionClosed,
    /// The broker went silent after a command; the link is treated as lost.
    #[error("no reply from the broker within {0:?}")]
    ReplyTimeout(std::time::Duration),
    #[error("connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("discovery via {endpoint} failed: {reason}")]
    Discovery { endpoint: String, reason: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MessagingError {
    /// Whether the error means the underlying link is gone and must be
    /// re-established before anything else can be sent.
    #[must_use]
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::ReplyTimeout(_) | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_loss_classification() {
        assert!(MessagingError::ConnectionClosed.is_connection_loss());
        assert!(MessagingError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            .is_connection_loss());
        assert!(MessagingError::ReplyTimeout(std::time::Duration::from_secs(5)).is_connection_loss());
        assert!(!MessagingError::Publish {
            topic: "t".into(),
            reason: "E_BAD_MESSAGE".into()
        }
        .is_connection_loss());
    }

    #[test]
    fn publish_error_message() {
        let err = MessagingError::Publish {
            topic: "orders".into(),
            reason: "E_PUB_FAILED".into(),
        };
        assert_eq!(err.to_string(), "publish to 'orders' failed: E_PUB_FAILED");
    }
}
