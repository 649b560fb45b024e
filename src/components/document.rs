//! Document store client (MongoDB).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::options::{ClientOptions, Credential, ServerAddress};

use crate::components::{Component, ComponentError, ComponentKind};
use crate::config::validation::{self, ValidationError};
use crate::config::{AppConfig, DocumentStoreConfig};

/// MongoDB client bound to one database.
///
/// The driver monitors servers in the background, so building needs a
/// Tokio runtime. No round trip happens until the first operation.
pub struct DocumentStore {
    config: DocumentStoreConfig,
    client: mongodb::Client,
}

impl DocumentStore {
    pub fn client(&self) -> &mongodb::Client {
        &self.client
    }

    /// Handle on the configured database.
    pub fn database(&self) -> mongodb::Database {
        self.client.database(&self.config.name)
    }

    pub fn config(&self) -> &DocumentStoreConfig {
        &self.config
    }

    fn client_options(config: &DocumentStoreConfig) -> Result<ClientOptions, ComponentError> {
        let hosts = config
            .host
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(|h| ServerAddress::parse(h))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ComponentError::InvalidConfig {
                kind: ComponentKind::DocumentStore,
                reason: format!("host '{}': {}", config.host, e),
            })?;
        if hosts.is_empty() {
            return Err(ComponentError::InvalidConfig {
                kind: ComponentKind::DocumentStore,
                reason: "no hosts".to_string(),
            });
        }

        let mut options = ClientOptions::default();
        options.hosts = hosts;
        if config.max_pool_size > 0 {
            options.max_pool_size = Some(config.max_pool_size);
        }
        if config.max_conn_idletime > 0 {
            options.max_idle_time = Some(Duration::from_secs(config.max_conn_idletime));
        }
        if !config.user.is_empty() {
            let mut credential = Credential::default();
            credential.username = Some(config.user.clone());
            credential.password = Some(config.pwd.clone());
            options.credential = Some(credential);
        }
        Ok(options)
    }
}

#[async_trait]
impl Component for DocumentStore {
    type Config = DocumentStoreConfig;

    const KIND: ComponentKind = ComponentKind::DocumentStore;

    fn section(config: &AppConfig) -> &DocumentStoreConfig {
        &config.document_store
    }

    fn enabled(config: &DocumentStoreConfig) -> bool {
        config.enable
    }

    fn validate(config: &DocumentStoreConfig) -> Result<(), Vec<ValidationError>> {
        validation::check_document_store(config)
    }

    fn build(config: &DocumentStoreConfig) -> Result<Self, ComponentError> {
        let options = Self::client_options(config)?;
        let client = mongodb::Client::with_options(options).map_err(|e| ComponentError::Connect {
            kind: ComponentKind::DocumentStore,
            reason: e.to_string(),
        })?;

        tracing::info!(host = %config.host, database = %config.name, "Document store client ready");
        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    /// Only the database name changed: keep the connection pool.
    fn reload(&self, config: &DocumentStoreConfig) -> Result<Self, ComponentError> {
        let same_pool = DocumentStoreConfig {
            name: self.config.name.clone(),
            ..config.clone()
        } == self.config;
        if same_pool {
            return Ok(Self {
                config: config.clone(),
                client: self.client.clone(),
            });
        }
        Self::build(config)
    }

    /// Readers may still hold sessions or cursors; those are not waited for.
    async fn release(&self) {
        self.client.clone().shutdown().immediate(true).await;
        tracing::info!(host = %self.config.host, "Document store client shut down");
    }
}

impl fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentStore")
            .field("host", &self.config.host)
            .field("database", &self.config.name)
            .finish()
    }
}
