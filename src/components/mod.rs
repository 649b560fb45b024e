//! Stateful components managed by the registry.
//!
//! # Data Flow
//! ```text
//! sub-config (one section of a Snapshot)
//!     → Component::build        (fresh instance)
//!     → Component::reload       (new instance derived from the live one)
//!     → Component::release      (explicit teardown when disabled)
//! ```
//!
//! # Design Decisions
//! - Instances are immutable; reload yields a new instance that the
//!   registry swaps in atomically, readers holding the old Arc keep working
//! - Constructors see only their own section, never the whole tree
//! - Section checks gate one component, never the whole snapshot
//! - Builders never block on the network; drivers connect lazily

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::validation::{join_errors, ValidationError};
use crate::config::AppConfig;

pub mod cache;
pub mod document;
pub mod logger;
pub mod relational;
pub mod tracer;

pub use cache::CacheClient;
pub use document::DocumentStore;
pub use logger::Logger;
pub use relational::RelationalStore;
pub use tracer::Tracer;

/// The closed set of component kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Logger,
    Tracer,
    Cache,
    DocumentStore,
    RelationalStore,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 5] = [
        ComponentKind::Logger,
        ComponentKind::Tracer,
        ComponentKind::Cache,
        ComponentKind::DocumentStore,
        ComponentKind::RelationalStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Logger => "logger",
            ComponentKind::Tracer => "tracer",
            ComponentKind::Cache => "cache",
            ComponentKind::DocumentStore => "document_store",
            ComponentKind::RelationalStore => "relational_store",
        }
    }
}

impl ComponentKind {
    /// Whether `config` asks for a live instance of this kind.
    pub fn enabled_in(&self, config: &AppConfig) -> bool {
        match self {
            ComponentKind::Logger => Logger::enabled(Logger::section(config)),
            ComponentKind::Tracer => Tracer::enabled(Tracer::section(config)),
            ComponentKind::Cache => CacheClient::enabled(CacheClient::section(config)),
            ComponentKind::DocumentStore => DocumentStore::enabled(DocumentStore::section(config)),
            ComponentKind::RelationalStore => {
                RelationalStore::enabled(RelationalStore::section(config))
            }
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while building or reloading a component.
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("{kind}: invalid configuration: {reason}")]
    InvalidConfig { kind: ComponentKind, reason: String },

    #[error("{kind}: unsupported setting: {reason}")]
    Unsupported { kind: ComponentKind, reason: String },

    #[error("{kind}: failed to initialize client: {reason}")]
    Connect { kind: ComponentKind, reason: String },
}

impl ComponentError {
    pub fn kind(&self) -> ComponentKind {
        match self {
            ComponentError::InvalidConfig { kind, .. }
            | ComponentError::Unsupported { kind, .. }
            | ComponentError::Connect { kind, .. } => *kind,
        }
    }

    pub(crate) fn invalid(kind: ComponentKind, errors: &[ValidationError]) -> Self {
        ComponentError::InvalidConfig {
            kind,
            reason: join_errors(errors),
        }
    }
}

/// A stateful component built from one configuration section.
#[async_trait]
pub trait Component: Send + Sync + Sized + 'static {
    /// Section type this component is built from.
    type Config: Clone + PartialEq + Send + Sync + 'static;

    const KIND: ComponentKind;

    /// Extract this component's section from the whole tree.
    fn section(config: &AppConfig) -> &Self::Config;

    /// Whether the section asks for a live instance.
    fn enabled(config: &Self::Config) -> bool;

    /// Semantic checks on the section, run before build or reload.
    fn validate(_config: &Self::Config) -> Result<(), Vec<ValidationError>> {
        Ok(())
    }

    fn build(config: &Self::Config) -> Result<Self, ComponentError>;

    /// Derive a replacement from the live instance. The default rebuilds.
    fn reload(&self, config: &Self::Config) -> Result<Self, ComponentError> {
        Self::build(config)
    }

    /// Tear down underlying resources once the slot has been cleared.
    async fn release(&self) {}
}
