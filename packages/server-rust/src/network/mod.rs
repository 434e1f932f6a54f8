//! Built-in HTTP API service, its middleware, and node lifecycle control.

pub mod api;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod shutdown;

pub use api::{ApiService, API_SERVICE};
pub use config::{ApiConfig, DEFAULT_PORT};
pub use handlers::AppState;
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
