use crate::resolver::ResolutionError;

/// Failures of the cache store or of value (de)serialization.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache connection error: {0}")]
    Connection(String),
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

pub type CacheResult<T> = Result<T, CacheError>;
