//! Component registry.
//!
//! # Responsibilities
//! - Build every enabled component from the first snapshot
//! - Diff each later snapshot per section and act only on what changed
//! - Hand out the live instance of each kind to request-serving code
//!
//! # Data Flow
//! ```text
//! Snapshot_n ──┬─ logging          ─▶ Slot<Logger>
//!              ├─ tracing          ─▶ Slot<Tracer>
//!              ├─ cache            ─▶ Slot<CacheClient>
//!              ├─ document_store   ─▶ Slot<DocumentStore>
//!              └─ relational_store ─▶ Slot<RelationalStore>
//!   each slot: compare with Snapshot_(n-1) → Unchanged | Built | Reloaded | Retired
//! ```
//!
//! # Design Decisions
//! - Only the pipeline's consumer task mutates; readers never lock
//! - One kind failing never blocks the others
//! - The reference snapshot moves forward even when a kind failed, so the
//!   next change to that section is diffed against what was requested
//! - Cross-kind views may be torn mid-reload; each kind is always whole

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::components::{
    CacheClient, Component, ComponentError, ComponentKind, DocumentStore, Logger,
    RelationalStore, Tracer,
};
use crate::config::{AppConfig, Snapshot};
use crate::observability::metrics;

pub mod slot;

pub use slot::{Slot, SlotAction};

/// Per-kind outcome of an init or reload pass.
#[derive(Debug, Default)]
pub struct ReloadReport {
    revision: u64,
    actions: Vec<(ComponentKind, SlotAction)>,
    failures: Vec<ComponentError>,
}

impl ReloadReport {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Action taken for `kind`, or `None` if that kind failed.
    pub fn action(&self, kind: ComponentKind) -> Option<SlotAction> {
        self.actions
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, action)| *action)
    }

    pub fn actions(&self) -> &[(ComponentKind, SlotAction)] {
        &self.actions
    }

    pub fn failures(&self) -> &[ComponentError] {
        &self.failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Kinds whose instance changed in this pass.
    pub fn changed(&self) -> Vec<ComponentKind> {
        self.actions
            .iter()
            .filter(|(_, action)| !matches!(action, SlotAction::Unchanged | SlotAction::Disabled))
            .map(|(kind, _)| *kind)
            .collect()
    }

    fn record(&mut self, kind: ComponentKind, result: Result<SlotAction, ComponentError>) {
        match result {
            Ok(action) => {
                if action != SlotAction::Unchanged {
                    metrics::record_component_action(kind.as_str(), action.as_str());
                    tracing::info!(
                        kind = %kind,
                        action = %action,
                        revision = self.revision,
                        "Component updated"
                    );
                }
                self.actions.push((kind, action));
            }
            Err(e) => {
                metrics::record_reload_failure(kind.as_str());
                tracing::error!(
                    kind = %kind,
                    error = %e,
                    revision = self.revision,
                    "Component update failed"
                );
                self.failures.push(e);
            }
        }
    }
}

impl fmt::Display for ReloadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "revision {}:", self.revision)?;
        for (kind, action) in &self.actions {
            write!(f, " {}={}", kind, action)?;
        }
        for failure in &self.failures {
            write!(f, " {}=failed", failure.kind())?;
        }
        Ok(())
    }
}

/// Live component instances keyed by kind.
pub struct Registry {
    logger: Slot<Logger>,
    tracer: Slot<Tracer>,
    cache: Slot<CacheClient>,
    document_store: Slot<DocumentStore>,
    relational_store: Slot<RelationalStore>,
    applied: ArcSwapOption<Snapshot>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            logger: Slot::new(),
            tracer: Slot::new(),
            cache: Slot::new(),
            document_store: Slot::new(),
            relational_store: Slot::new(),
            applied: ArcSwapOption::empty(),
        }
    }

    /// Build every enabled component from `snapshot`.
    pub async fn init(&self, snapshot: Arc<Snapshot>) -> ReloadReport {
        let config = snapshot.config();
        let mut report = ReloadReport {
            revision: snapshot.revision(),
            ..Default::default()
        };

        report.record(Logger::KIND, self.logger.init(Logger::section(config)));
        report.record(Tracer::KIND, self.tracer.init(Tracer::section(config)));
        report.record(CacheClient::KIND, self.cache.init(CacheClient::section(config)));
        report.record(
            DocumentStore::KIND,
            self.document_store.init(DocumentStore::section(config)),
        );
        report.record(
            RelationalStore::KIND,
            self.relational_store.init(RelationalStore::section(config)),
        );

        self.applied.store(Some(snapshot));
        tracing::info!(report = %report, "Registry initialized");
        report
    }

    /// Apply `snapshot`, touching only the sections that differ from the
    /// last applied one. Falls back to `init` when nothing was applied yet.
    pub async fn reload(&self, snapshot: Arc<Snapshot>) -> ReloadReport {
        let previous = match self.applied.load_full() {
            Some(previous) => previous,
            None => return self.init(snapshot).await,
        };
        let (old, new) = (previous.config(), snapshot.config());
        let mut report = ReloadReport {
            revision: snapshot.revision(),
            ..Default::default()
        };

        report.record(Logger::KIND, apply(&self.logger, old, new).await);
        report.record(Tracer::KIND, apply(&self.tracer, old, new).await);
        report.record(CacheClient::KIND, apply(&self.cache, old, new).await);
        report.record(DocumentStore::KIND, apply(&self.document_store, old, new).await);
        report.record(RelationalStore::KIND, apply(&self.relational_store, old, new).await);

        self.applied.store(Some(snapshot));
        tracing::debug!(report = %report, "Registry reloaded");
        report
    }

    /// Release every live component. Used at process exit.
    pub async fn shutdown(&self) {
        let released = [
            self.relational_store.release().await,
            self.document_store.release().await,
            self.cache.release().await,
            self.tracer.release().await,
            self.logger.release().await,
        ];
        tracing::info!(
            released = released.iter().filter(|r| **r).count(),
            "Registry shut down"
        );
    }

    pub fn logger(&self) -> Option<Arc<Logger>> {
        self.logger.get()
    }

    pub fn tracer(&self) -> Option<Arc<Tracer>> {
        self.tracer.get()
    }

    pub fn cache(&self) -> Option<Arc<CacheClient>> {
        self.cache.get()
    }

    pub fn document_store(&self) -> Option<Arc<DocumentStore>> {
        self.document_store.get()
    }

    pub fn relational_store(&self) -> Option<Arc<RelationalStore>> {
        self.relational_store.get()
    }

    /// Last applied snapshot.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.applied.load_full()
    }

    /// Whether `kind` currently has a live instance.
    pub fn is_live(&self, kind: ComponentKind) -> bool {
        match kind {
            ComponentKind::Logger => self.logger.is_present(),
            ComponentKind::Tracer => self.tracer.is_present(),
            ComponentKind::Cache => self.cache.is_present(),
            ComponentKind::DocumentStore => self.document_store.is_present(),
            ComponentKind::RelationalStore => self.relational_store.is_present(),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

async fn apply<T: Component>(
    slot: &Slot<T>,
    old: &AppConfig,
    new: &AppConfig,
) -> Result<SlotAction, ComponentError> {
    slot.apply(T::section(old), T::section(new)).await
}
