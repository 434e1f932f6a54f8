//! Process-level configuration for a fleet node.
//!
//! Every section has a `Default` so a JSON document only needs to carry the
//! values it changes. Durations are plain millisecond counts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use fleet_core::ServiceDescriptor;
use serde::Deserialize;

/// Root configuration handed to the orchestrator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Base directory exposed to services through their context.
    pub base_dir: PathBuf,
    pub bus: BusConfig,
    pub cache: CacheConfig,
    pub orchestrator: OrchestratorConfig,
    pub logging: LoggingConfig,
    /// Ordered list of services to boot.
    pub services: Vec<ServiceDescriptor>,
}

impl FleetConfig {
    /// Parses a JSON configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or does not match
    /// the configuration shape.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("invalid fleet configuration")
    }

    /// Reads and parses a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json_str(&raw)
    }
}

/// A backend reachable through the resolver: the logical name used for
/// environment overrides plus the `host:port` fallback for DNS resolution.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BackendConfig {
    pub logical_name: String,
    pub host: String,
}

impl BackendConfig {
    #[must_use]
    pub fn new(logical_name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            logical_name: logical_name.into(),
            host: host.into(),
        }
    }
}

/// Which message bus implementation backs the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// nsqd over TCP, nsqlookupd over HTTP.
    #[default]
    Nsq,
    /// In-process broker, for local runs and tests.
    Memory,
}

/// Message bus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub transport: TransportKind,
    /// Broker the publisher writes to.
    pub nsqd: BackendConfig,
    /// Discovery service readers use to find producers.
    pub nsqlookupd: BackendConfig,
    /// Messages a reader allows in flight per broker connection.
    pub max_in_flight: u32,
    /// How often a reader re-queries discovery while no producer is known.
    pub lookupd_poll_interval_ms: u64,
    /// Upper bound for a single TCP connect or discovery request.
    pub connect_timeout_ms: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Nsq,
            nsqd: BackendConfig::new("NSQD", "nsqd:4150"),
            nsqlookupd: BackendConfig::new("NSQLOOKUPD", "nsqlookupd:4161"),
            max_in_flight: 1,
            lookupd_poll_interval_ms: 15_000,
            connect_timeout_ms: 5_000,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl BusConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn lookupd_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lookupd_poll_interval_ms)
    }
}

/// Publisher reconnect policy: capped exponential backoff plus a circuit
/// breaker that cools down after repeated failures. Retries never stop.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Fraction of each delay randomized, `0.0..=1.0`.
    pub jitter: f64,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long an open circuit waits before a half-open probe.
    pub open_timeout_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
            failure_threshold: 5,
            open_timeout_ms: 60_000,
        }
    }
}

/// Which key-value store backs the cache layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Redis,
    Memory,
}

/// Cache-aside configuration. `enabled` is fixed for the process lifetime.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub store: StoreKind,
    pub redis: BackendConfig,
    /// Redis logical database index.
    pub database: i64,
    /// Optional `AUTH` password; never logged.
    pub password: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store: StoreKind::Redis,
            redis: BackendConfig::new("REDIS", "redis:6379"),
            database: 0,
            password: None,
        }
    }
}

/// How per-service `configure` / `init` failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the phase, and therefore startup, on the first failure.
    #[default]
    FailFast,
    /// Let the phase finish, mark failed services, and keep booting the rest.
    CollectAndContinue,
}

/// Orchestrator behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub failure_policy: FailurePolicy,
    /// Budget for each service's shutdown step.
    pub shutdown_step_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::FailFast,
            shutdown_step_timeout_ms: 5_000,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn shutdown_step_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_step_timeout_ms)
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive; `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_point_at_conventional_hosts() {
        let config = FleetConfig::default();
        assert_eq!(config.bus.transport, TransportKind::Nsq);
        assert_eq!(config.bus.nsqd, BackendConfig::new("NSQD", "nsqd:4150"));
        assert_eq!(config.bus.nsqlookupd.logical_name, "NSQLOOKUPD");
        assert_eq!(config.bus.max_in_flight, 1);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.redis.host, "redis:6379");
        assert_eq!(config.orchestrator.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.logging.level, "info");
        assert!(config.services.is_empty());
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let config = FleetConfig::from_json_str(
            r#"{
                "bus": { "transport": "memory", "max_in_flight": 8 },
                "cache": { "enabled": false },
                "orchestrator": { "failure_policy": "collect_and_continue" },
                "services": [
                    { "name": "users", "path": "@/users", "enabled": true, "config": { "ttl": 30 } },
                    { "name": "audit", "enabled": false }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.bus.transport, TransportKind::Memory);
        assert_eq!(config.bus.max_in_flight, 8);
        assert_eq!(config.bus.nsqd.host, "nsqd:4150");
        assert_eq!(config.bus.reconnect, ReconnectConfig::default());
        assert!(!config.cache.enabled);
        assert_eq!(
            config.orchestrator.failure_policy,
            FailurePolicy::CollectAndContinue
        );
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.services[0].locator(), "users");
        assert_eq!(config.services[0].config["ttl"], 30);
        assert!(!config.services[1].enabled);
    }

    #[test]
    fn invalid_document_is_an_error() {
        assert!(FleetConfig::from_json_str("{ not json").is_err());
        assert!(FleetConfig::from_json_str(r#"{"bus": {"transport": "kafka"}}"#).is_err());
    }

    #[test]
    fn from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"logging": {{"level": "debug", "json": true}}}}"#).unwrap();

        let config = FleetConfig::from_path(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn from_path_missing_file_is_an_error() {
        let err = FleetConfig::from_path(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn duration_helpers() {
        let bus = BusConfig::default();
        assert_eq!(bus.connect_timeout(), Duration::from_secs(5));
        assert_eq!(bus.lookupd_poll_interval(), Duration::from_secs(15));
    }
}
