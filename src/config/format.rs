//! Payload format dispatch.

use std::fmt;

use crate::config::loader::ConfigError;
use crate::config::schema::AppConfig;

/// Declared encoding of a configuration payload.
///
/// Only JSON decodes today. TOML and YAML are reserved names that fail with
/// [`ConfigError::FormatNotImplemented`]; anything else is
/// [`ConfigError::UnsupportedFormat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
    Yaml,
    Unsupported(String),
}

impl ConfigFormat {
    /// Parse a declared format name. Empty defaults to JSON.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "json" => ConfigFormat::Json,
            "toml" => ConfigFormat::Toml,
            "yaml" | "yml" => ConfigFormat::Yaml,
            other => ConfigFormat::Unsupported(other.to_string()),
        }
    }

    /// Whether payloads in this format can be decoded.
    pub fn is_implemented(&self) -> bool {
        matches!(self, ConfigFormat::Json)
    }

    /// Decode raw bytes into a configuration tree.
    pub fn decode(&self, raw: &[u8]) -> Result<AppConfig, ConfigError> {
        match self {
            ConfigFormat::Json => serde_json::from_slice(raw).map_err(ConfigError::Decode),
            ConfigFormat::Toml | ConfigFormat::Yaml => {
                Err(ConfigError::FormatNotImplemented(self.to_string()))
            }
            ConfigFormat::Unsupported(name) => Err(ConfigError::UnsupportedFormat(name.clone())),
        }
    }
}

impl Default for ConfigFormat {
    fn default() -> Self {
        ConfigFormat::Json
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigFormat::Json => write!(f, "json"),
            ConfigFormat::Toml => write!(f, "toml"),
            ConfigFormat::Yaml => write!(f, "yaml"),
            ConfigFormat::Unsupported(name) => write!(f, "{}", name),
        }
    }
}
