//! Cache-aside layer over a remote key-value store.

pub mod error;
pub mod layer;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod store;

pub use error::{CacheError, CacheResult};
pub use layer::CacheLayer;
pub use memory::MemoryCacheStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisCacheStore;
pub use store::CacheStore;
