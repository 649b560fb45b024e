//! Bootstrap descriptor: where the configuration lives and how to read it.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::format::ConfigFormat;

/// Default descriptor location.
pub const DEFAULT_DESCRIPTOR_PATH: &str = "/etc/reloadkit/reloadkit.json";

/// Process-start descriptor. Read once, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BootstrapDescriptor {
    /// File path (file origin) or key (etcd origin).
    pub config_path: String,

    /// json, toml or yaml. Empty means json.
    pub config_format: String,

    /// file or etcd.
    pub engine_type: String,

    /// Store endpoints for the etcd origin.
    pub endpoints: Vec<String>,

    pub username: String,

    pub password: String,

    pub ext: HashMap<String, String>,
}

/// Kind of origin a descriptor points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    File,
    Etcd,
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginKind::File => write!(f, "file"),
            OriginKind::Etcd => write!(f, "etcd"),
        }
    }
}

/// Errors raised while reading or checking the descriptor. All are fatal.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to read descriptor {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse descriptor {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no origin provider for engine_type '{0}'")]
    UnknownEngine(String),

    #[error("config_format '{0}' is declared but not implemented")]
    FormatNotImplemented(String),

    #[error("unsupported config_format '{0}'")]
    UnsupportedFormat(String),

    #[error("config_path must not be empty")]
    MissingPath,

    #[error("engine_type '{0}' needs at least one endpoint")]
    MissingEndpoints(OriginKind),
}

impl BootstrapDescriptor {
    /// Read and check a descriptor file.
    pub fn load(path: &Path) -> Result<Self, DescriptorError> {
        let content = fs::read(path).map_err(|source| DescriptorError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let descriptor: Self =
            serde_json::from_slice(&content).map_err(|source| DescriptorError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        descriptor.check()?;
        Ok(descriptor)
    }

    /// Origin kind. Empty defaults to file.
    pub fn origin(&self) -> Result<OriginKind, DescriptorError> {
        match self.engine_type.trim().to_ascii_lowercase().as_str() {
            "" | "file" => Ok(OriginKind::File),
            "etcd" | "kv-store" | "kv" => Ok(OriginKind::Etcd),
            other => Err(DescriptorError::UnknownEngine(other.to_string())),
        }
    }

    pub fn format(&self) -> ConfigFormat {
        ConfigFormat::parse(&self.config_format)
    }

    /// Reject descriptors the engine cannot serve.
    pub fn check(&self) -> Result<(), DescriptorError> {
        match self.format() {
            ConfigFormat::Json => {}
            f @ (ConfigFormat::Toml | ConfigFormat::Yaml) => {
                return Err(DescriptorError::FormatNotImplemented(f.to_string()))
            }
            ConfigFormat::Unsupported(name) => return Err(DescriptorError::UnsupportedFormat(name)),
        }
        if self.config_path.trim().is_empty() {
            return Err(DescriptorError::MissingPath);
        }
        let origin = self.origin()?;
        if origin == OriginKind::Etcd && self.endpoints.is_empty() {
            return Err(DescriptorError::MissingEndpoints(origin));
        }
        Ok(())
    }
}
