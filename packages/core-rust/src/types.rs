use std::fmt;

use serde::{Deserialize, Serialize};

/// Static declaration of a service: identity, locator, enablement, and its
/// opaque configuration blob. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Unique name the live instance is registered under.
    pub name: String,
    /// Catalog locator used to find the factory. Falls back to `name` when empty.
    #[serde(default)]
    pub path: String,
    /// Disabled descriptors are skipped by every phase.
    #[serde(default)]
    pub enabled: bool,
    /// Service-specific configuration, handed to `configure` untouched.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ServiceDescriptor {
    /// Creates an enabled descriptor whose locator equals its name.
    #[must_use]
    pub fn enabled(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            enabled: true,
            config: serde_json::Value::Null,
        }
    }

    /// Same as [`ServiceDescriptor::enabled`] but switched off.
    #[must_use]
    pub fn disabled(name: impl Into<String>) -> Self {
        Self {
            enabled: false,
            ..Self::enabled(name)
        }
    }

    /// Replaces the locator.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Replaces the configuration blob.
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Catalog key for this descriptor.
    ///
    /// A leading `@/` (the old base-directory placeholder) is stripped, and an
    /// empty path falls back to the service name.
    #[must_use]
    pub fn locator(&self) -> &str {
        let path = self.path.trim();
        let path = path.strip_prefix("@/").unwrap_or(path);
        if path.is_empty() {
            &self.name
        } else {
            path
        }
    }
}

/// Lifecycle state of a single service.
///
/// `Unconfigured -> Configuring -> Configured -> Initializing -> Initialized`.
/// Disabled descriptors go straight to `Skipped`; a failed step ends in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Unconfigured,
    Configuring,
    Configured,
    Initializing,
    Initialized,
    Skipped,
    Failed,
}

impl ServiceState {
    /// Lower-case label used in logs and health output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::Configuring => "configuring",
            Self::Configured => "configured",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition can happen from this state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Initialized | Self::Skipped | Self::Failed)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network endpoint produced by the resolver.
///
/// The port is kept as text: values pinned through the environment are
/// returned verbatim, without validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: String,
}

impl Endpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// `host:port` form used for TCP connects and discovery URLs.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
