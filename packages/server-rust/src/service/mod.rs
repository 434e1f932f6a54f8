//! Service lifecycle framework.
//!
//! 1. **Catalog** (`catalog`): locator -> factory table built by the binary
//! 2. **Registry** (`registry`): live instances and their lifecycle state
//! 3. **Barrier** (`barrier`): per-phase wait group with an error channel
//! 4. **Orchestrator** (`orchestrator`): infrastructure boot, configure, init, shutdown
//! 5. **Events** (`events`): in-process named broadcast between services

pub mod barrier;
pub mod catalog;
pub mod context;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod registry;

pub use barrier::{PhaseBarrier, PhaseWait};
pub use catalog::ServiceCatalog;
pub use context::{Infrastructure, Service, ServiceContext};
pub use error::{BootError, Phase, ServiceFailure};
pub use events::EventBus;
pub use orchestrator::{BootReport, Orchestrator};
pub use registry::{ServiceInstance, ServiceRegistry};
