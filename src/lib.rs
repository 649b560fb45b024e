//! Runtime configuration engine.
//!
//! Sources a configuration document from a file or an etcd key, watches it
//! for changes and selectively rebuilds the clients that depend on it.
//!
//! # Architecture Overview
//!
//! ```text
//!  bootstrap descriptor
//!         │
//!         ▼
//!  ┌──────────────┐   ChangeEvent    ┌──────────────┐   Snapshot_n   ┌──────────────────┐
//!  │    source    │ ───────────────▶ │   pipeline   │ ─────────────▶ │     registry     │
//!  │ file / etcd  │  bounded queue   │  (consumer)  │   + overrides  │ logger  tracer   │
//!  └──────────────┘                  └──────────────┘                │ cache   doc  sql │
//!         ▲                                 │                        └──────────────────┘
//!         └──────── cancellation ───────────┘                               │
//!                                                           request-serving code borrows
//! ```

pub mod components;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod resilience;
pub mod source;

pub use components::{Component, ComponentError, ComponentKind};
pub use config::{AppConfig, BootstrapDescriptor, RuntimeOverrides, Snapshot};
pub use lifecycle::{Bootstrap, BootstrapError, Canceller};
pub use pipeline::{ChangeEvent, Pipeline, PipelineHandle, PipelineOptions, PipelineState};
pub use registry::{Registry, ReloadReport, SlotAction};
pub use source::{ConfigSource, SourceError, SourceOptions};
