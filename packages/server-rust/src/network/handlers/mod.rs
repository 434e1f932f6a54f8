//! Handlers served by the API service next to the application routes.

pub mod health;

pub use health::{health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;
use std::time::Instant;

use crate::network::ShutdownController;
use crate::service::ServiceRegistry;

/// Shared state behind the health routes. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Node-wide health state and in-flight tracking.
    pub lifecycle: Arc<ShutdownController>,
    /// Live services, reported with their lifecycle state.
    pub registry: Arc<ServiceRegistry>,
    /// When the API service started serving.
    pub start_time: Instant,
}
