//! Built-in HTTP service.
//!
//! `configure` reads the listen port from the environment variable named in
//! the descriptor blob, `init` binds and starts serving the application
//! routes plus the health endpoints, and the server stops accepting once the
//! node begins shutting down. `shutdown` waits for in-flight requests to
//! drain before returning.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::config::ApiConfig;
use super::handlers::{health_handler, liveness_handler, readiness_handler, AppState};
use super::middleware::{build_http_layers, track_in_flight};
use crate::service::{Service, ServiceContext};

/// Catalog locator of the built-in API service.
pub const API_SERVICE: &str = "api";

#[derive(Debug, Clone)]
struct Listen {
    config: ApiConfig,
    port: u16,
}

/// HTTP server booted as an ordinary service.
#[derive(Default)]
pub struct ApiService {
    routes: Mutex<Option<Router>>,
    listen: Mutex<Option<Listen>>,
    local_addr: Mutex<Option<SocketAddr>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ApiService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiService")
            .field("local_addr", &*self.local_addr.lock())
            .finish_non_exhaustive()
    }
}

impl ApiService {
    /// Service with only the health routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Service serving `routes` next to the health routes.
    #[must_use]
    pub fn with_routes(routes: Router) -> Self {
        Self {
            routes: Mutex::new(Some(routes)),
            ..Self::default()
        }
    }

    /// Address actually bound, once `init` has run.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    fn build_router(&self, config: &ApiConfig, ctx: &ServiceContext) -> Router {
        let state = AppState {
            lifecycle: Arc::clone(ctx.lifecycle()),
            registry: Arc::clone(ctx.registry()),
            start_time: Instant::now(),
        };
        let health = Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .with_state(state);

        let app = self.routes.lock().take().unwrap_or_default();
        app.merge(health)
            .layer(axum::middleware::from_fn_with_state(
                Arc::clone(ctx.lifecycle()),
                track_in_flight,
            ))
            .layer(build_http_layers(config))
    }
}

#[async_trait]
impl Service for ApiService {
    async fn configure(&self, ctx: &ServiceContext, config: &serde_json::Value) -> anyhow::Result<()> {
        let config = ApiConfig::from_value(config)?;
        let port = config.port(ctx.resolver().env())?;
        info!(service = ctx.name(), host = %config.host, port, "api service configured");
        *self.listen.lock() = Some(Listen { config, port });
        Ok(())
    }

    async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        let Listen { config, port } = self
            .listen
            .lock()
            .clone()
            .context("api service initialized before configure")?;

        let addr = format!("{}:{port}", config.host);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(local_addr);

        let router = self.build_router(&config, ctx);
        let lifecycle = Arc::clone(ctx.lifecycle());
        let name = ctx.name().to_string();
        let handle = tokio::spawn(async move {
            let shutdown = async move { lifecycle.wait_for_shutdown().await };
            if let Err(err) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await {
                warn!(service = %name, error = %err, "api server stopped with an error");
            }
        });
        *self.server.lock() = Some(handle);

        info!(service = ctx.name(), addr = %local_addr, "api service listening");
        Ok(())
    }

    async fn shutdown(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        let Some(handle) = self.server.lock().take() else {
            return Ok(());
        };
        let drain_timeout = self
            .listen
            .lock()
            .as_ref()
            .map(|listen| listen.config.drain_timeout())
            .unwrap_or_else(|| ApiConfig::default().drain_timeout());

        ctx.lifecycle().trigger_shutdown();
        if !ctx.lifecycle().wait_for_drain(drain_timeout).await {
            warn!(
                service = ctx.name(),
                in_flight = ctx.lifecycle().in_flight_count(),
                "in-flight requests still running after drain timeout"
            );
        }
        handle.await.context("api server task failed")?;
        info!(service = ctx.name(), "api service stopped");
        Ok(())
    }
}
