//! Fleet runtime: boots a node's services in two barrier-synchronized
//! phases on top of a shared messaging fabric, cache-aside layer and
//! endpoint resolver.

pub mod cache;
pub mod config;
pub mod logging;
pub mod messaging;
pub mod network;
pub mod resilience;
pub mod resolver;
pub mod serial;
pub mod service;
pub mod telemetry;

pub use cache::{CacheError, CacheLayer, CacheStore};
pub use config::{FailurePolicy, FleetConfig};
pub use messaging::{MessagingError, MessagingFabric};
pub use network::{ApiService, ShutdownController};
pub use resolver::{ResolutionError, Resolver};
pub use serial::{run_serial, step, Step};
pub use service::{BootError, BootReport, Orchestrator, Service, ServiceCatalog, ServiceContext};
