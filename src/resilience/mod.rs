//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! KV origin watch stream breaks:
//!     → backoff.rs (wait base * 2^(n-1) + jitter, capped)
//!     → reconnect, re-read the key, reset the counter
//! ```
//!
//! # Design Decisions
//! - Reconnects never give up; cancellation is the only exit
//! - Jitter keeps many processes from reconnecting in lockstep

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
