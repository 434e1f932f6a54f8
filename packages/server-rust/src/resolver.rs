//! Logical backend name to network endpoint resolution.
//!
//! `<NAME>_SERVICE_HOST` / `<NAME>_SERVICE_PORT` pin an endpoint and always
//! win; otherwise the fallback host is resolved through DNS. Nothing is
//! cached: every call resolves again.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use fleet_core::{service_env_keys, Endpoint, EnvSource, ProcessEnv};
use tracing::{debug, error};

/// Endpoint lookup failure. Callers must surface it; there is no default.
#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("failed to resolve {host} for {logical_name}: {source}")]
    Lookup {
        logical_name: String,
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no addresses found for {host} ({logical_name})")]
    NoAddresses { logical_name: String, host: String },
}

/// Network name resolution seam.
#[async_trait]
pub trait HostLookup: Send + Sync {
    /// Resolves a `host:port` string to socket addresses, in resolver order.
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<SocketAddr>>;
}

/// System resolver via `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsLookup;

#[async_trait]
impl HostLookup for DnsLookup {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host(host).await?.collect())
    }
}

/// Turns logical backend names into endpoints.
#[derive(Clone)]
pub struct Resolver {
    env: Arc<dyn EnvSource>,
    lookup: Arc<dyn HostLookup>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

impl Resolver {
    #[must_use]
    pub fn new(env: Arc<dyn EnvSource>, lookup: Arc<dyn HostLookup>) -> Self {
        Self { env, lookup }
    }

    /// Process environment plus system DNS.
    #[must_use]
    pub fn system() -> Self {
        Self::new(Arc::new(ProcessEnv), Arc::new(DnsLookup))
    }

    /// Environment consulted for overrides; services read their own settings from it too.
    #[must_use]
    pub fn env(&self) -> &dyn EnvSource {
        self.env.as_ref()
    }

    /// Resolves `logical_name`, falling back to a DNS lookup of `fallback_host`.
    ///
    /// # Errors
    ///
    /// Returns `ResolutionError` when no environment override exists and the
    /// lookup fails or yields no address.
    pub async fn resolve(
        &self,
        logical_name: &str,
        fallback_host: &str,
    ) -> Result<Endpoint, ResolutionError> {
        let (host_key, port_key) = service_env_keys(logical_name);
        if let (Some(host), Some(port)) = (self.env.var(&host_key), self.env.var(&port_key)) {
            debug!(
                service = logical_name,
                host = %host,
                port = %port,
                "resolved service from environment"
            );
            return Ok(Endpoint { host, port });
        }

        let addrs = self.lookup.lookup(fallback_host).await.map_err(|source| {
            error!(service = logical_name, host = fallback_host, error = %source, "failed to resolve host");
            ResolutionError::Lookup {
                logical_name: logical_name.to_string(),
                host: fallback_host.to_string(),
                source,
            }
        })?;

        let first = addrs.first().ok_or_else(|| ResolutionError::NoAddresses {
            logical_name: logical_name.to_string(),
            host: fallback_host.to_string(),
        })?;

        let endpoint = Endpoint::new(first.ip().to_string(), first.port().to_string());
        debug!(service = logical_name, endpoint = %endpoint, "resolved service through DNS");
        Ok(endpoint)
    }
}
