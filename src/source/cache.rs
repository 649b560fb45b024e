//! Raw content cache and event delivery shared by every source variant.
//!
//! # Responsibilities
//! - Skip empty or byte-identical content without decoding
//! - Decode and validate new content, replacing bytes and tree together
//! - Enqueue the resulting event without ever blocking the producer
//!
//! # Design Decisions
//! - Bytes live inside the Snapshot, so one pointer swap replaces both
//! - Only the producer task writes; readers load lock-free

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::config::loader::decode_config;
use crate::config::{ConfigError, ConfigFormat, Snapshot};
use crate::observability::metrics;
use crate::pipeline::ChangeEvent;

/// Outcome of feeding fresh origin content into the cache.
#[derive(Debug)]
pub enum Refresh {
    /// Empty or identical to the cached bytes. Nothing was decoded.
    Unchanged,

    /// Decoded, validated and stored.
    Updated(Arc<Snapshot>),

    /// Decode or validation failed. The cache is untouched.
    Rejected(ConfigError),
}

/// Outcome of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Queue full; the event was discarded.
    Dropped,
    /// Consumer gone; the producer should stop.
    Closed,
}

/// Last accepted origin content and its decoded tree.
pub struct ContentCache {
    format: ConfigFormat,
    current: ArcSwapOption<Snapshot>,
}

impl ContentCache {
    pub fn new(format: ConfigFormat) -> Self {
        Self {
            format,
            current: ArcSwapOption::empty(),
        }
    }

    pub fn format(&self) -> &ConfigFormat {
        &self.format
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    /// Decode `raw` unconditionally and store it. Used for the initial read.
    pub fn prime(&self, raw: &[u8]) -> Result<Arc<Snapshot>, ConfigError> {
        let config = decode_config(&self.format, raw)?;
        let snapshot = Arc::new(Snapshot::new(self.next_revision(), config, raw));
        self.current.store(Some(Arc::clone(&snapshot)));
        Ok(snapshot)
    }

    /// Compare `raw` with the cached bytes and decode only when they differ.
    pub fn refresh(&self, raw: &[u8]) -> Refresh {
        if raw.is_empty() {
            return Refresh::Unchanged;
        }
        if let Some(current) = self.current.load().as_ref() {
            if current.raw() == raw {
                return Refresh::Unchanged;
            }
        }

        match decode_config(&self.format, raw) {
            Ok(config) => {
                let snapshot = Arc::new(Snapshot::new(self.next_revision(), config, raw));
                self.current.store(Some(Arc::clone(&snapshot)));
                Refresh::Updated(snapshot)
            }
            Err(e) => Refresh::Rejected(e),
        }
    }

    fn next_revision(&self) -> u64 {
        self.current
            .load()
            .as_ref()
            .map(|s| s.revision() + 1)
            .unwrap_or(1)
    }
}

/// Try to enqueue `event` without waiting.
pub fn deliver(events: &mpsc::Sender<ChangeEvent>, event: ChangeEvent, origin: &str) -> Delivery {
    match events.try_send(event) {
        Ok(()) => {
            metrics::record_event("delivered");
            Delivery::Sent
        }
        Err(TrySendError::Full(event)) => {
            metrics::record_event("dropped");
            tracing::warn!(
                origin = %origin,
                event = event.label(),
                "Event queue full, dropping change event"
            );
            Delivery::Dropped
        }
        Err(TrySendError::Closed(_)) => {
            tracing::debug!(origin = %origin, "Event queue closed");
            Delivery::Closed
        }
    }
}

/// Feed fresh content through the cache and enqueue any resulting event.
///
/// Returns `Delivery::Closed` only when the consumer has gone away.
pub(crate) fn publish(
    cache: &ContentCache,
    raw: &[u8],
    events: &mpsc::Sender<ChangeEvent>,
    origin: &str,
) -> Delivery {
    match cache.refresh(raw) {
        Refresh::Unchanged => {
            tracing::trace!(origin = %origin, "Origin content unchanged");
            Delivery::Sent
        }
        Refresh::Rejected(e) => {
            metrics::record_event("rejected");
            tracing::error!(
                origin = %origin,
                error = %e,
                retained_revision = cache.current().map(|s| s.revision()),
                "Rejected configuration update, keeping previous snapshot"
            );
            Delivery::Sent
        }
        Refresh::Updated(snapshot) => {
            tracing::info!(
                origin = %origin,
                revision = snapshot.revision(),
                bytes = snapshot.raw().len(),
                "Configuration changed"
            );
            deliver(events, ChangeEvent::Config(snapshot), origin)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H1: &[u8] = br#"{"cache":{"enable":true,"host":"h1"}}"#;
    const H2: &[u8] = br#"{"cache":{"enable":true,"host":"h2"}}"#;

    #[test]
    fn test_identical_content_is_not_decoded_twice() {
        let cache = ContentCache::new(ConfigFormat::Json);
        let first = cache.prime(H1).unwrap();

        assert!(matches!(cache.refresh(H1), Refresh::Unchanged));
        assert!(matches!(cache.refresh(b""), Refresh::Unchanged));
        let current = cache.current().unwrap();
        assert!(Arc::ptr_eq(&first, &current));
    }

    #[test]
    fn test_update_bumps_revision() {
        let cache = ContentCache::new(ConfigFormat::Json);
        cache.prime(H1).unwrap();

        match cache.refresh(H2) {
            Refresh::Updated(snapshot) => {
                assert_eq!(snapshot.revision(), 2);
                assert_eq!(snapshot.config().cache.host, "h2");
                assert_eq!(snapshot.raw(), H2);
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_rejected_content_keeps_previous_snapshot() {
        let cache = ContentCache::new(ConfigFormat::Json);
        let first = cache.prime(H1).unwrap();

        assert!(matches!(cache.refresh(b"{not-json"), Refresh::Rejected(ConfigError::Decode(_))));
        let current = cache.current().unwrap();
        assert!(Arc::ptr_eq(&first, &current));
        assert_eq!(current.raw(), H1);
    }

    #[test]
    fn test_section_problems_do_not_block_other_changes() {
        let cache = ContentCache::new(ConfigFormat::Json);
        cache.prime(H1).unwrap();

        let bad_topic = br#"{"cache":{"enable":true,"host":"h2"},
            "broker":{"subscribe_topics":[{"category":"x"}]}}"#;
        match cache.refresh(bad_topic) {
            Refresh::Updated(snapshot) => assert_eq!(snapshot.config().cache.host, "h2"),
            other => panic!("expected update, got {:?}", other),
        }

        let bad_rate = br#"{"cache":{"enable":true,"host":"h3"},
            "trace":{"enable":true,"service_name":"svc","rate":1.5}}"#;
        match cache.refresh(bad_rate) {
            Refresh::Updated(snapshot) => {
                assert_eq!(snapshot.revision(), 3);
                assert_eq!(snapshot.config().cache.host, "h3");
            }
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_unimplemented_format_rejects_everything() {
        let cache = ContentCache::new(ConfigFormat::Yaml);
        assert!(matches!(
            cache.refresh(H1),
            Refresh::Rejected(ConfigError::FormatNotImplemented(_))
        ));
        assert!(cache.current().is_none());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_error() {
        let (tx, mut rx) = mpsc::channel(2);
        let snapshot = Arc::new(Snapshot::new(1, Default::default(), H1));

        let outcomes: Vec<Delivery> = (0..3)
            .map(|_| deliver(&tx, ChangeEvent::Config(Arc::clone(&snapshot)), "test"))
            .collect();
        assert_eq!(outcomes, vec![Delivery::Sent, Delivery::Sent, Delivery::Dropped]);

        drop(tx);
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        assert_eq!(received, 2);
    }

    #[test]
    fn test_closed_queue_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let event = ChangeEvent::Other(serde_json::json!({"note": "x"}));
        assert_eq!(deliver(&tx, event, "test"), Delivery::Closed);
    }
}
