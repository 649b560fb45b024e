//! Configuration schema definitions.
//!
//! This module defines the complete configuration tree delivered by the origin.
//! All types derive Serde traits for deserialization from config payloads and
//! `PartialEq` so the registry can diff one snapshot against the next.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root of a decoded configuration document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Application logger settings.
    #[serde(alias = "log_conf")]
    pub logging: LogConfig,

    /// Distributed tracing settings.
    #[serde(alias = "trace")]
    pub tracing: TraceConfig,

    /// Cache (Redis) client settings.
    #[serde(alias = "redis")]
    pub cache: CacheConfig,

    /// Document store (MongoDB) client settings.
    #[serde(alias = "mongodb")]
    pub document_store: DocumentStoreConfig,

    /// Relational store (MySQL) client settings.
    #[serde(alias = "mysql")]
    pub relational_store: RelationalStoreConfig,

    /// Message broker settings. Consumed by collaborators, never built here.
    pub broker: BrokerConfig,

    /// Service discovery settings. Consumed by collaborators, never built here.
    #[serde(alias = "go_micro")]
    pub discovery: DiscoveryConfig,

    /// Named cache instances beyond the primary one.
    #[serde(alias = "redis_source")]
    pub cache_sources: HashMap<String, CacheConfig>,

    /// Named document store instances beyond the primary one.
    #[serde(alias = "mongodb_source")]
    pub document_store_sources: HashMap<String, DocumentStoreConfig>,

    /// Named broker instances beyond the primary one.
    #[serde(alias = "broker_source")]
    pub broker_sources: HashMap<String, BrokerConfig>,

    /// Enterprise service bus settings. Consumed by collaborators.
    #[serde(alias = "ebus")]
    pub event_bus: EventBusConfig,

    /// Object storage settings. Consumed by collaborators.
    #[serde(alias = "obs")]
    pub object_storage: ObjectStorageConfig,

    /// Bus id to service-provider id mapping for the current deployment.
    #[serde(alias = "current_busid_spid_map")]
    pub bus_provider_ids: HashMap<String, String>,

    /// Free-form extension values.
    pub ext: HashMap<String, serde_json::Value>,
}

/// Application logger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LogConfig {
    /// Destination: console, stdout, stderr or file. Empty means console.
    pub log: String,

    /// Level (trace, debug, info, warn, error). Empty means info.
    pub level: String,

    /// Output format: text or json. Empty means text.
    pub format: String,

    /// Rotation period for file output (informational).
    pub rotation_time: String,

    /// Directory for file output.
    pub log_dir: String,

    /// Omit file and line information from records.
    pub disable_report_caller: bool,
}

/// Tracing configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TraceConfig {
    pub service_name: String,

    /// Collector endpoint.
    pub trace_url: String,

    /// Sampling ratio in `[0, 1]`.
    pub rate: f64,

    /// Sampler kind: const, probabilistic or parent. Empty means probabilistic.
    pub sampler: String,

    #[serde(rename = "mod")]
    pub modulo: u64,

    /// Only keep records for spans that ended in error.
    pub only_log_err: bool,

    pub enable: bool,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            trace_url: String::new(),
            rate: 1.0,
            sampler: String::new(),
            modulo: 0,
            only_log_err: false,
            enable: false,
        }
    }
}

/// Cache client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    /// Server address (`host` or `host:port`).
    pub host: String,

    pub sentinel_host: String,

    pub sentinel_mastername: String,

    pub pwd: String,

    /// Connection pool size. Zero means driver default.
    #[serde(alias = "pool_size")]
    pub poolsize: u32,

    pub enable: bool,
}

/// Document store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DocumentStoreConfig {
    /// Database name.
    pub name: String,

    /// Comma separated `host:port` list.
    pub host: String,

    pub user: String,

    pub pwd: String,

    pub max_pool_size: u32,

    /// Idle connection lifetime in seconds.
    #[serde(alias = "max_conn_idle_time")]
    pub max_conn_idletime: u64,

    pub enable: bool,
}

/// Relational store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelationalStoreConfig {
    /// Server address (`host` or `host:port`).
    pub host: String,

    pub user: String,

    pub pwd: String,

    /// Database (schema) name.
    #[serde(alias = "database")]
    pub datasourcename: String,

    pub charset: String,

    pub parse_time: bool,

    /// Maximum connection lifetime in seconds. Zero means driver default.
    pub conn_max_lifetime: u64,

    pub max_idle_conns: u32,

    #[serde(alias = "max_oepn_conns")]
    pub max_open_conns: u32,

    pub enable: bool,
}

/// Message broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BrokerConfig {
    pub hosts: Vec<String>,

    /// Broker kind (kafka, rabbitmq, ...).
    #[serde(rename = "type")]
    pub kind: String,

    pub exchange_name: String,
    pub exchange_durable: bool,
    pub exchange_kind: String,

    pub need_auth: bool,
    pub external_auth: bool,
    pub user: String,
    pub pwd: String,

    pub topic_prefix: String,

    /// Topics this service subscribes to.
    pub subscribe_topics: Vec<TopicInfo>,

    pub enable_pub: bool,
    pub enable_sub: bool,
}

/// A single topic subscription descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TopicInfo {
    pub category: String,
    /// Originating service.
    pub source: String,
    /// Queue or consumer group.
    pub queue: String,
    pub topic: String,
    /// Handler name resolved by the subscriber.
    pub handler: String,
}

/// Enterprise service bus configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EventBusConfig {
    pub hosts: Vec<String>,

    /// Per-service settings, opaque to the engine.
    pub services: HashMap<String, serde_json::Value>,

    pub paas_id: String,
    pub paas_token: String,
    pub sp_id: String,

    /// Logical path to bus path rewrites.
    pub path_map: HashMap<String, String>,
}

/// Object storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ObjectStorageConfig {
    pub endpoint: String,

    /// Access key.
    pub ak: String,

    /// Secret key.
    pub sk: String,

    pub bucket_name: String,

    /// Key prefix inside the bucket.
    pub location: String,
}

/// Service discovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub service_name: String,

    /// Listen port. Zero lets the server pick one.
    pub server_port: u32,

    pub advertise: String,

    /// Registry backend: etcd or consul.
    pub registry_plugin_type: String,

    pub registry_addrs: Vec<String>,

    #[serde(alias = "registry_auth_user")]
    pub registry_authuser: String,

    #[serde(alias = "registry_auth_pwd")]
    pub registry_authpwd: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"cache":{"enable":true,"host":"h1"}}"#).unwrap();

        assert!(config.cache.enable);
        assert_eq!(config.cache.host, "h1");
        assert!(!config.tracing.enable);
        assert_eq!(config.tracing.rate, 1.0);
        assert!(config.ext.is_empty());
    }

    #[test]
    fn test_legacy_keys_are_accepted() {
        let raw = r#"{
            "log_conf": {"log": "console", "level": "debug"},
            "redis": {"host": "cache:6379", "enable": true},
            "mysql": {"host": "db:3306", "max_oepn_conns": 20, "enable": true},
            "mongodb": {"host": "doc:27017", "name": "app"},
            "trace": {"service_name": "svc", "rate": 0.5, "mod": 3},
            "go_micro": {"service_name": "svc", "server_port": 9090},
            "redis_source": {"sessions": {"host": "sess:6379", "enable": true}},
            "mongodb_source": {"audit": {"host": "audit:27017", "name": "audit"}},
            "broker_source": {"events": {"type": "rabbitmq", "exchange_name": "ev"}},
            "ebus": {"hosts": ["bus:8080"], "sp_id": "sp1", "path_map": {"/a": "/bus/a"},
                     "services": {"billing": {"timeout": 3}}},
            "obs": {"endpoint": "obs.local", "ak": "k", "bucket_name": "media"},
            "current_busid_spid_map": {"bus1": "sp1"}
        }"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.cache.host, "cache:6379");
        assert_eq!(config.relational_store.max_open_conns, 20);
        assert_eq!(config.document_store.name, "app");
        assert_eq!(config.tracing.modulo, 3);
        assert_eq!(config.discovery.server_port, 9090);
        assert_eq!(config.cache_sources["sessions"].host, "sess:6379");
        assert!(config.cache_sources["sessions"].enable);
        assert_eq!(config.document_store_sources["audit"].name, "audit");
        assert_eq!(config.broker_sources["events"].kind, "rabbitmq");
        assert_eq!(config.event_bus.sp_id, "sp1");
        assert_eq!(config.event_bus.path_map["/a"], "/bus/a");
        assert_eq!(config.event_bus.services["billing"]["timeout"], 3);
        assert_eq!(config.object_storage.bucket_name, "media");
        assert_eq!(config.bus_provider_ids["bus1"], "sp1");
    }

    #[test]
    fn test_broker_topics() {
        let raw = r#"{"broker": {"type": "kafka", "hosts": ["k1:9092"], "enable_sub": true,
            "subscribe_topics": [{"category": "order", "source": "shop", "queue": "q1",
                                  "topic": "order.created", "handler": "on_order"}]}}"#;
        let config: AppConfig = serde_json::from_str(raw).unwrap();

        assert_eq!(config.broker.kind, "kafka");
        assert_eq!(config.broker.subscribe_topics.len(), 1);
        assert_eq!(config.broker.subscribe_topics[0].handler, "on_order");
    }

    #[test]
    fn test_equality_detects_single_field_change() {
        let a = AppConfig::default();
        let mut b = a.clone();
        assert_eq!(a, b);

        b.cache.host = "h2".into();
        assert_ne!(a.cache, b.cache);
        assert_eq!(a.tracing, b.tracing);
    }
}
