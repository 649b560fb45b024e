//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Source, pipeline and registry produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters for events, reads, component actions)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```

pub mod logging;
pub mod metrics;
