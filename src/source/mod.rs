//! Configuration origins.
//!
//! # Data Flow
//! ```text
//! origin (file on disk / key in etcd)
//!     → raw bytes
//!     → cache.rs (skip if empty or identical, else decode & validate)
//!     → Snapshot → ChangeEvent
//!     → try_send onto the bounded event queue (drop when full)
//! ```
//!
//! # Design Decisions
//! - Closed set of variants selected once by `open`; no provider registry
//! - `subscribe` owns the queue's only sender, so returning closes it
//! - Origin read failures are never fatal after `init`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{BootstrapDescriptor, ConfigError, DescriptorError, OriginKind, Snapshot};
use crate::lifecycle::shutdown::CancelToken;
use crate::pipeline::ChangeEvent;

pub mod cache;
pub mod file;
pub mod kv;

pub use cache::{deliver, ContentCache, Delivery, Refresh};
pub use file::FileSource;
pub use kv::{EtcdGateway, KvSource, KvStore, KvUpdate, KvWatch, MemoryStore};

/// Default interval between file origin polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Errors raised by configuration origins.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("source has no snapshot yet; call init first")]
    NotInitialized,

    #[error("kv store error: {0}")]
    KvStore(String),

    #[error("key '{0}' not found")]
    KeyNotFound(String),

    #[error("watch failed: {0}")]
    Watch(String),
}

/// A configuration origin.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Read the origin once and store the initial snapshot.
    async fn init(&self) -> Result<(), SourceError>;

    /// Watch the origin until cancelled, sending change events.
    ///
    /// `events` is dropped when this returns, which closes the queue.
    async fn subscribe(
        &self,
        events: mpsc::Sender<ChangeEvent>,
        cancel: CancelToken,
    ) -> Result<(), SourceError>;

    /// Last accepted snapshot.
    fn current_snapshot(&self) -> Result<Arc<Snapshot>, SourceError>;

    /// Human readable origin for logs.
    fn origin(&self) -> String;
}

/// Tunables for origin construction.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub poll_interval: Duration,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Build the origin a descriptor points at.
pub fn open(
    descriptor: &BootstrapDescriptor,
    options: &SourceOptions,
) -> Result<Arc<dyn ConfigSource>, SourceError> {
    descriptor.check()?;
    let format = descriptor.format();

    let source: Arc<dyn ConfigSource> = match descriptor.origin()? {
        OriginKind::File => Arc::new(FileSource::new(
            &descriptor.config_path,
            format,
            options.poll_interval,
        )),
        OriginKind::Etcd => {
            let gateway = EtcdGateway::new(
                &descriptor.endpoints,
                &descriptor.username,
                &descriptor.password,
            )?;
            Arc::new(KvSource::new(gateway, &descriptor.config_path, format))
        }
    };
    Ok(source)
}

/// Sleep for `delay` unless cancelled first. Returns `true` on cancellation.
pub(crate) async fn wait_or_cancel(cancel: &mut CancelToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
