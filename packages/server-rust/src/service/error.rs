use std::fmt;

use crate::cache::CacheError;
use crate::messaging::MessagingError;

/// Orchestration phase a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Configure,
    Init,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Configure => "configure",
            Self::Init => "init",
        })
    }
}

/// A service whose `configure` or `init` returned an error (or panicked).
#[derive(Debug)]
pub struct ServiceFailure {
    pub service: String,
    pub phase: Phase,
    pub error: anyhow::Error,
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed during {}: {:#}", self.service, self.phase, self.error)
    }
}

/// Fatal startup errors.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("service '{name}' has no registered factory for '{locator}'")]
    UnknownService { name: String, locator: String },
    #[error("failed to instantiate service '{name}'")]
    Instantiate {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("service '{0}' is declared more than once")]
    DuplicateService(String),
    #[error("service '{service}' failed during {phase}")]
    PhaseFailed {
        service: String,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },
    #[error("orchestrator already started")]
    AlreadyStarted,
    #[error("messaging infrastructure failed: {0}")]
    Messaging(#[from] MessagingError),
    #[error("cache infrastructure failed: {0}")]
    Cache(#[from] CacheError),
}

impl From<ServiceFailure> for BootError {
    fn from(failure: ServiceFailure) -> Self {
        Self::PhaseFailed {
            service: failure.service,
            phase: failure.phase,
            source: failure.error,
        }
    }
}
