//! Configuration decoding and loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::format::ConfigFormat;
use crate::config::schema::AppConfig;
use crate::config::validation::validate_config;

/// Error type for configuration decoding.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Decode error: {0}")]
    Decode(serde_json::Error),

    #[error("Format '{0}' is declared but not implemented")]
    FormatNotImplemented(String),

    #[error("Unsupported config format '{0}'")]
    UnsupportedFormat(String),
}

/// Decode a raw payload.
///
/// Semantic issues are logged, not returned: they only keep the affected
/// component from being built.
pub fn decode_config(format: &ConfigFormat, raw: &[u8]) -> Result<AppConfig, ConfigError> {
    let config = format.decode(raw)?;
    for issue in validate_config(&config) {
        tracing::warn!(field = %issue.field, problem = %issue.message, "Configuration issue");
    }
    Ok(config)
}

/// Load configuration from a file.
pub fn load_config(path: &Path, format: &ConfigFormat) -> Result<AppConfig, ConfigError> {
    let content = fs::read(path)?;
    decode_config(format, &content)
}
