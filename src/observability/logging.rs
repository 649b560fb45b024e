//! Process-wide structured logging.
//!
//! # Responsibilities
//! - Install the bootstrap subscriber once at process start
//! - Honor `RUST_LOG`, falling back to a crate-level default
//!
//! The application logger handed to request-serving code is a separate
//! component (`components::logger`) and is rebuilt on reload.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default directive when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "reloadkit=info";

/// Install the global subscriber. Later calls are ignored.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}
