//! Immutable configuration snapshots.

use std::sync::Arc;
use std::time::SystemTime;

use crate::config::schema::AppConfig;

/// One fully decoded configuration tree plus the bytes it came from.
///
/// Snapshots are never mutated. A reload produces a new one; holders of an
/// older `Arc<Snapshot>` keep a consistent view.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    revision: u64,
    config: AppConfig,
    raw: Arc<[u8]>,
    loaded_at: SystemTime,
}

impl Snapshot {
    pub fn new(revision: u64, config: AppConfig, raw: &[u8]) -> Self {
        Self {
            revision,
            config,
            raw: Arc::from(raw),
            loaded_at: SystemTime::now(),
        }
    }

    /// Position of this snapshot in the sequence accepted by its source.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Raw origin bytes this snapshot was decoded from.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    /// Derive a snapshot with a replaced tree, keeping revision and raw bytes.
    pub fn with_config(&self, config: AppConfig) -> Self {
        Self {
            revision: self.revision,
            config,
            raw: Arc::clone(&self.raw),
            loaded_at: self.loaded_at,
        }
    }
}
