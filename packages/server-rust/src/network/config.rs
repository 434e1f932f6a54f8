//! Built-in API service configuration, read from the service descriptor.

use std::time::Duration;

use anyhow::Context;
use fleet_core::EnvSource;
use serde::Deserialize;

/// Port used when no `port_env` is configured or the variable is unset.
pub const DEFAULT_PORT: u16 = 3000;

/// Settings carried in the `api` descriptor's configuration blob.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Name of the environment variable holding the listen port.
    pub port_env: Option<String>,
    /// Bind address.
    pub host: String,
    /// Allowed CORS origins. `"*"` allows any origin.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    pub request_timeout_ms: u64,
    /// How long shutdown waits for in-flight requests.
    pub drain_timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port_env: None,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["*".to_string()],
            request_timeout_ms: 30_000,
            drain_timeout_ms: 10_000,
        }
    }
}

impl ApiConfig {
    /// Parses the descriptor blob. `null` means all defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the blob has the wrong shape.
    pub fn from_value(value: &serde_json::Value) -> anyhow::Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone()).context("invalid api service configuration")
    }

    /// Listen port: the value of `port_env` when set, else [`DEFAULT_PORT`].
    ///
    /// # Errors
    ///
    /// Returns an error when the variable is set but is not a valid port.
    pub fn port(&self, env: &dyn EnvSource) -> anyhow::Result<u16> {
        let Some(raw) = self.port_env.as_deref().and_then(|key| env.var(key)) else {
            return Ok(DEFAULT_PORT);
        };
        raw.trim()
            .parse()
            .with_context(|| format!("{} is not a valid port: {raw:?}", self.port_env.as_deref().unwrap_or_default()))
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use fleet_core::MapEnv;
    use serde_json::json;

    use super::*;

    #[test]
    fn null_blob_means_defaults() {
        let config = ApiConfig::from_value(&serde_json::Value::Null).unwrap();
        assert_eq!(config, ApiConfig::default());
        assert_eq!(config.port(&MapEnv::new()).unwrap(), DEFAULT_PORT);
    }

    #[test]
    fn port_comes_from_the_named_variable() {
        let config = ApiConfig::from_value(&json!({"port_env": "USERS_API_PORT", "host": "127.0.0.1"})).unwrap();
        assert_eq!(config.host, "127.0.0.1");
        let env = MapEnv::new().with("USERS_API_PORT", "8081");
        assert_eq!(config.port(&env).unwrap(), 8081);
        assert_eq!(config.port(&MapEnv::new()).unwrap(), DEFAULT_PORT);
    }

    #[test]
    fn bad_port_is_an_error() {
        let config = ApiConfig {
            port_env: Some("PORT".to_string()),
            ..ApiConfig::default()
        };
        let err = config.port(&MapEnv::new().with("PORT", "eighty")).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn wrong_shape_is_rejected() {
        assert!(ApiConfig::from_value(&json!({"host": 5})).is_err());
    }
}
