//! File origin, polled on a fixed interval.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::{ConfigFormat, Snapshot};
use crate::lifecycle::shutdown::CancelToken;
use crate::observability::metrics;
use crate::pipeline::ChangeEvent;
use crate::source::cache::{publish, ContentCache, Delivery};
use crate::source::{wait_or_cancel, ConfigSource, SourceError};

/// Configuration read from a local file.
pub struct FileSource {
    path: PathBuf,
    cache: ContentCache,
    poll_interval: Duration,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, format: ConfigFormat, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            cache: ContentCache::new(format),
            poll_interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn read(&self) -> Result<Vec<u8>, SourceError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|source| SourceError::Read {
                path: self.path.clone(),
                source,
            })
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    async fn init(&self) -> Result<(), SourceError> {
        let raw = self.read().await?;
        let snapshot = self.cache.prime(&raw)?;
        tracing::info!(
            origin = %self.origin(),
            revision = snapshot.revision(),
            "Initial configuration loaded"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        events: mpsc::Sender<ChangeEvent>,
        mut cancel: CancelToken,
    ) -> Result<(), SourceError> {
        if self.cache.current().is_none() {
            return Err(SourceError::NotInitialized);
        }
        let origin = self.origin();
        tracing::info!(
            origin = %origin,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Watching file origin"
        );

        loop {
            if wait_or_cancel(&mut cancel, self.poll_interval).await {
                break;
            }

            let raw = match self.read().await {
                Ok(raw) => raw,
                Err(e) => {
                    metrics::record_origin_read_failure("file");
                    tracing::warn!(
                        origin = %origin,
                        error = %e,
                        "Origin read failed, retrying next tick"
                    );
                    continue;
                }
            };

            if cancel.is_cancelled() {
                break;
            }
            if publish(&self.cache, &raw, &events, &origin) == Delivery::Closed {
                break;
            }
        }

        drop(events);
        tracing::info!(origin = %origin, "File watch stopped");
        Ok(())
    }

    fn current_snapshot(&self) -> Result<Arc<Snapshot>, SourceError> {
        self.cache.current().ok_or(SourceError::NotInitialized)
    }

    fn origin(&self) -> String {
        format!("file:{}", self.path.display())
    }
}
