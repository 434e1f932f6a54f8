//! Fleet Core — service descriptors, endpoints, bus naming rules, and delivery types.

pub mod delivery;
pub mod env;
pub mod naming;
pub mod types;

pub use delivery::{Delivery, Disposition, MessageId};
pub use env::{EnvSource, MapEnv, ProcessEnv};
pub use naming::{normalize_channel, normalize_topic, service_env_keys, NamingError};
pub use types::{Endpoint, ServiceDescriptor, ServiceState};
