//! Relational store client (MySQL).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};

use crate::components::{Component, ComponentError, ComponentKind};
use crate::config::validation::{self, ValidationError};
use crate::config::{AppConfig, RelationalStoreConfig};

const DEFAULT_PORT: u16 = 3306;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Lazily connecting MySQL pool.
///
/// Building the pool spawns its maintenance task, so it must happen inside
/// a Tokio runtime.
pub struct RelationalStore {
    config: RelationalStoreConfig,
    pool: MySqlPool,
}

impl RelationalStore {
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub fn config(&self) -> &RelationalStoreConfig {
        &self.config
    }

    fn connect_options(
        config: &RelationalStoreConfig,
    ) -> Result<MySqlConnectOptions, ComponentError> {
        let (host, port) = split_host_port(&config.host, DEFAULT_PORT).map_err(|reason| {
            ComponentError::InvalidConfig {
                kind: ComponentKind::RelationalStore,
                reason,
            }
        })?;

        let mut options = MySqlConnectOptions::new().host(host).port(port);
        if !config.user.is_empty() {
            options = options.username(&config.user);
        }
        if !config.pwd.is_empty() {
            options = options.password(&config.pwd);
        }
        if !config.datasourcename.is_empty() {
            options = options.database(&config.datasourcename);
        }
        if !config.charset.is_empty() {
            options = options.charset(&config.charset);
        }
        Ok(options)
    }
}

/// Split `host[:port]`, falling back to `default_port`.
pub(crate) fn split_host_port(address: &str, default_port: u16) -> Result<(&str, u16), String> {
    let address = address.trim();
    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|e| format!("bad port in '{}': {}", address, e))?;
            if host.is_empty() {
                return Err(format!("missing host in '{}'", address));
            }
            Ok((host, port))
        }
        None if address.is_empty() => Err("empty address".to_string()),
        None => Ok((address, default_port)),
    }
}

#[async_trait]
impl Component for RelationalStore {
    type Config = RelationalStoreConfig;

    const KIND: ComponentKind = ComponentKind::RelationalStore;

    fn section(config: &AppConfig) -> &RelationalStoreConfig {
        &config.relational_store
    }

    fn enabled(config: &RelationalStoreConfig) -> bool {
        config.enable
    }

    fn validate(config: &RelationalStoreConfig) -> Result<(), Vec<ValidationError>> {
        validation::check_relational_store(config)
    }

    fn build(config: &RelationalStoreConfig) -> Result<Self, ComponentError> {
        let options = Self::connect_options(config)?;

        let max_connections = if config.max_open_conns == 0 {
            DEFAULT_MAX_CONNECTIONS
        } else {
            config.max_open_conns
        };
        let mut pool_options = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(config.max_idle_conns.min(max_connections));
        if config.conn_max_lifetime > 0 {
            pool_options = pool_options.max_lifetime(Duration::from_secs(config.conn_max_lifetime));
        }

        let pool = pool_options.connect_lazy_with(options);
        tracing::info!(
            host = %config.host,
            database = %config.datasourcename,
            max_connections,
            "Relational store pool ready"
        );
        Ok(Self {
            config: config.clone(),
            pool,
        })
    }

    async fn release(&self) {
        self.pool.close().await;
        tracing::info!(host = %self.config.host, "Relational store pool closed");
    }
}

impl fmt::Debug for RelationalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationalStore")
            .field("host", &self.config.host)
            .field("database", &self.config.datasourcename)
            .finish()
    }
}
