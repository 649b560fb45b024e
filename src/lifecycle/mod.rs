//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Read descriptor → Select origin → Initial read → Build components → Start pipeline
//!
//! Shutdown (shutdown.rs):
//!     Cancel signal → Producer stops and closes the queue → Consumer drains → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger cancellation
//! ```
//!
//! # Design Decisions
//! - Ordered startup: descriptor, then origin, then components, then watching
//! - Cancellation is single-shot and cooperative

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{CancelToken, Canceller};
pub use startup::{Bootstrap, BootstrapError};
