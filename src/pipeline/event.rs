//! Change events carried from a source to the reload applier.

use std::sync::Arc;

use crate::config::Snapshot;

/// One unit of change flowing through the event queue.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// A new, fully validated configuration tree.
    Config(Arc<Snapshot>),

    /// Any other payload a custom source emits. The applier logs and skips it.
    Other(serde_json::Value),
}

impl ChangeEvent {
    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        match self {
            ChangeEvent::Config(snapshot) => Some(snapshot),
            ChangeEvent::Other(_) => None,
        }
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ChangeEvent::Config(_) => "config",
            ChangeEvent::Other(_) => "other",
        }
    }
}
