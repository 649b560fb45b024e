//! Configuration model subsystem.
//!
//! # Data Flow
//! ```text
//! bootstrap descriptor (JSON file)
//!     → bootstrap.rs (origin kind, declared format)
//!
//! origin payload (raw bytes)
//!     → format.rs (dispatch on declared format)
//!     → loader.rs (decode, log section issues)
//!     → snapshot.rs (immutable Snapshot, shared via Arc)
//!     → overrides.rs (runtime overrides win)
//!     → registry
//! ```
//!
//! # Design Decisions
//! - A snapshot is fully decoded or does not exist
//! - Section issues are advisory here; components enforce their own
//! - All fields have defaults to allow minimal payloads
//! - Validation separates syntactic (serde) from semantic checks

pub mod bootstrap;
pub mod format;
pub mod loader;
pub mod overrides;
pub mod schema;
pub mod snapshot;
pub mod validation;

pub use bootstrap::{BootstrapDescriptor, DescriptorError, OriginKind};
pub use format::ConfigFormat;
pub use loader::ConfigError;
pub use overrides::RuntimeOverrides;
pub use schema::{
    AppConfig, BrokerConfig, CacheConfig, DiscoveryConfig, DocumentStoreConfig, EventBusConfig,
    LogConfig, ObjectStorageConfig, RelationalStoreConfig, TopicInfo, TraceConfig,
};
pub use snapshot::Snapshot;
