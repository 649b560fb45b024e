//! Cache client (Redis).

use std::fmt;

use url::Url;

use crate::components::{Component, ComponentError, ComponentKind};
use crate::config::validation::{self, ValidationError};
use crate::config::{AppConfig, CacheConfig};

/// Redis client bound to one endpoint.
///
/// `redis::Client` only parses the endpoint; connections are opened on
/// demand through [`CacheClient::connection`].
pub struct CacheClient {
    config: CacheConfig,
    endpoint: Url,
    client: redis::Client,
}

impl CacheClient {
    /// Configured host (`host` or `host:port`).
    pub fn host(&self) -> &str {
        &self.config.host
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn client(&self) -> &redis::Client {
        &self.client
    }

    /// Open a multiplexed async connection.
    pub async fn connection(&self) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await
    }

    fn endpoint(config: &CacheConfig) -> Result<Url, ComponentError> {
        if config.host.trim().is_empty() {
            return Err(ComponentError::Unsupported {
                kind: ComponentKind::Cache,
                reason: format!(
                    "sentinel-only setup ({} / {})",
                    config.sentinel_host, config.sentinel_mastername
                ),
            });
        }

        let mut url = Url::parse(&format!("redis://{}/", config.host.trim())).map_err(|e| {
            ComponentError::InvalidConfig {
                kind: ComponentKind::Cache,
                reason: format!("host '{}': {}", config.host, e),
            }
        })?;
        if !config.pwd.is_empty() && url.set_password(Some(&config.pwd)).is_err() {
            return Err(ComponentError::InvalidConfig {
                kind: ComponentKind::Cache,
                reason: "password cannot be set on this host".to_string(),
            });
        }
        Ok(url)
    }
}

impl Component for CacheClient {
    type Config = CacheConfig;

    const KIND: ComponentKind = ComponentKind::Cache;

    fn section(config: &AppConfig) -> &CacheConfig {
        &config.cache
    }

    fn enabled(config: &CacheConfig) -> bool {
        config.enable
    }

    fn validate(config: &CacheConfig) -> Result<(), Vec<ValidationError>> {
        validation::check_cache(config)
    }

    fn build(config: &CacheConfig) -> Result<Self, ComponentError> {
        let endpoint = Self::endpoint(config)?;
        let client = redis::Client::open(endpoint.as_str()).map_err(|e| ComponentError::Connect {
            kind: ComponentKind::Cache,
            reason: e.to_string(),
        })?;

        tracing::info!(host = %config.host, pool_size = config.poolsize, "Cache client ready");
        Ok(Self {
            config: config.clone(),
            endpoint,
            client,
        })
    }

    /// Keep the existing client when the endpoint is unchanged.
    fn reload(&self, config: &CacheConfig) -> Result<Self, ComponentError> {
        let endpoint = Self::endpoint(config)?;
        if endpoint == self.endpoint {
            tracing::debug!(host = %config.host, "Cache endpoint unchanged, reusing client");
            return Ok(Self {
                config: config.clone(),
                endpoint,
                client: self.client.clone(),
            });
        }
        Self::build(config)
    }
}

impl fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheClient")
            .field("host", &self.config.host)
            .field("poolsize", &self.config.poolsize)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str) -> CacheConfig {
        CacheConfig {
            host: host.into(),
            enable: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_build_does_not_connect() {
        let client = CacheClient::build(&config("h1:6379")).unwrap();
        assert_eq!(client.host(), "h1:6379");
    }

    #[test]
    fn test_password_is_encoded_into_endpoint() {
        let mut cfg = config("h1");
        cfg.pwd = "p@ss".into();
        let client = CacheClient::build(&cfg).unwrap();
        assert_eq!(client.endpoint.password(), Some("p%40ss"));
    }

    #[test]
    fn test_invalid_host_is_rejected() {
        let err = CacheClient::build(&config("h1:notaport")).unwrap_err();
        assert!(matches!(err, ComponentError::InvalidConfig { kind: ComponentKind::Cache, .. }));
    }

    #[test]
    fn test_sentinel_only_is_unsupported() {
        let cfg = CacheConfig {
            sentinel_host: "s1:26379".into(),
            sentinel_mastername: "mymaster".into(),
            enable: true,
            ..Default::default()
        };
        let err = CacheClient::build(&cfg).unwrap_err();
        assert!(matches!(err, ComponentError::Unsupported { .. }));
    }

    #[test]
    fn test_reload_switches_endpoint() {
        let client = CacheClient::build(&config("h1")).unwrap();

        let mut same_endpoint = config("h1");
        same_endpoint.poolsize = 32;
        let resized = client.reload(&same_endpoint).unwrap();
        assert_eq!(resized.config().poolsize, 32);
        assert_eq!(resized.endpoint, client.endpoint);

        let moved = client.reload(&config("h2")).unwrap();
        assert_eq!(moved.host(), "h2");
        assert_ne!(moved.endpoint, client.endpoint);
    }
}
