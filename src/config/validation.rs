//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Per-section checks run by the registry before a component is built
//! - Advisory pass over the whole tree for `check` and reload logs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: section → Result<(), Vec<ValidationError>>
//! - A bad section never rejects a snapshot; it keeps only its own
//!   component from being built or reloaded

use std::fmt;

use url::Url;

use crate::config::schema::{
    AppConfig, BrokerConfig, CacheConfig, DiscoveryConfig, DocumentStoreConfig, LogConfig,
    RelationalStoreConfig, TraceConfig,
};

/// A single semantic problem in a configuration tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Join errors into one line.
pub fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

const LOG_DESTINATIONS: &[&str] = &["", "console", "stdout", "stderr", "file", "kafka"];
const LOG_FORMATS: &[&str] = &["", "text", "json"];
const LOG_LEVELS: &[&str] = &["", "trace", "debug", "info", "warn", "warning", "error"];
const SAMPLERS: &[&str] = &["", "const", "probabilistic", "parent"];
const REGISTRY_PLUGINS: &[&str] = &["", "etcd", "consul"];

fn one_of(allowed: &[&str], value: &str) -> bool {
    allowed.contains(&value.to_ascii_lowercase().as_str())
}

fn finish(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn check_logging(log: &LogConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if !one_of(LOG_DESTINATIONS, &log.log) {
        errors.push(ValidationError::new(
            "logging.log",
            format!("unknown destination '{}'", log.log),
        ));
    }
    if !one_of(LOG_FORMATS, &log.format) {
        errors.push(ValidationError::new(
            "logging.format",
            format!("unknown format '{}'", log.format),
        ));
    }
    if !one_of(LOG_LEVELS, &log.level) {
        errors.push(ValidationError::new(
            "logging.level",
            format!("unknown level '{}'", log.level),
        ));
    }
    if log.log.eq_ignore_ascii_case("file") && log.log_dir.trim().is_empty() {
        errors.push(ValidationError::new("logging.log_dir", "required for file output"));
    }
    finish(errors)
}

pub fn check_tracing(trace: &TraceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if !(0.0..=1.0).contains(&trace.rate) {
        errors.push(ValidationError::new(
            "tracing.rate",
            format!("{} is outside [0, 1]", trace.rate),
        ));
    }
    if trace.service_name.trim().is_empty() {
        errors.push(ValidationError::new("tracing.service_name", "required when enabled"));
    }
    if !one_of(SAMPLERS, &trace.sampler) {
        errors.push(ValidationError::new(
            "tracing.sampler",
            format!("unknown sampler '{}'", trace.sampler),
        ));
    }
    let collector = trace.trace_url.trim();
    if !collector.is_empty() {
        if let Err(e) = Url::parse(collector) {
            errors.push(ValidationError::new(
                "tracing.trace_url",
                format!("'{}': {}", trace.trace_url, e),
            ));
        }
    }
    finish(errors)
}

pub fn check_cache(cache: &CacheConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if cache.host.trim().is_empty() && cache.sentinel_host.trim().is_empty() {
        errors.push(ValidationError::new(
            "cache.host",
            "host or sentinel_host required when enabled",
        ));
    }
    finish(errors)
}

pub fn check_document_store(docs: &DocumentStoreConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if docs.host.trim().is_empty() {
        errors.push(ValidationError::new("document_store.host", "required when enabled"));
    }
    if docs.name.trim().is_empty() {
        errors.push(ValidationError::new("document_store.name", "required when enabled"));
    }
    finish(errors)
}

pub fn check_relational_store(sql: &RelationalStoreConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if sql.host.trim().is_empty() {
        errors.push(ValidationError::new("relational_store.host", "required when enabled"));
    }
    if sql.max_open_conns != 0 && sql.max_idle_conns > sql.max_open_conns {
        errors.push(ValidationError::new(
            "relational_store.max_idle_conns",
            "must not exceed max_open_conns",
        ));
    }
    finish(errors)
}

/// Broker settings are read by collaborators; problems are advisory.
pub fn check_broker(broker: &BrokerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if (broker.enable_pub || broker.enable_sub) && broker.hosts.is_empty() {
        errors.push(ValidationError::new(
            "broker.hosts",
            "required when publishing or subscribing",
        ));
    }
    for (i, topic) in broker.subscribe_topics.iter().enumerate() {
        if topic.topic.trim().is_empty() {
            errors.push(ValidationError::new(
                &format!("broker.subscribe_topics[{}].topic", i),
                "must not be empty",
            ));
        }
    }
    finish(errors)
}

/// Discovery settings are read by collaborators; problems are advisory.
pub fn check_discovery(discovery: &DiscoveryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    if discovery.server_port > u32::from(u16::MAX) {
        errors.push(ValidationError::new("discovery.server_port", "must fit in 16 bits"));
    }
    if !one_of(REGISTRY_PLUGINS, &discovery.registry_plugin_type) {
        errors.push(ValidationError::new(
            "discovery.registry_plugin_type",
            format!("unknown registry '{}'", discovery.registry_plugin_type),
        ));
    }
    finish(errors)
}

/// Collect every problem across the tree.
///
/// Component sections are only checked when enabled. The result is
/// advisory: an accepted snapshot may still carry issues, and the
/// registry refuses just the affected component.
pub fn validate_config(config: &AppConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut collect = |result: Result<(), Vec<ValidationError>>| {
        if let Err(mut found) = result {
            errors.append(&mut found);
        }
    };

    collect(check_logging(&config.logging));
    if config.tracing.enable {
        collect(check_tracing(&config.tracing));
    }
    if config.cache.enable {
        collect(check_cache(&config.cache));
    }
    if config.document_store.enable {
        collect(check_document_store(&config.document_store));
    }
    if config.relational_store.enable {
        collect(check_relational_store(&config.relational_store));
    }
    collect(check_broker(&config.broker));
    collect(check_discovery(&config.discovery));

    errors
}
