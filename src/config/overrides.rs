//! Runtime overrides supplied at bootstrap.
//!
//! # Precedence Order
//! 1. Runtime overrides (CLI flags or programmatic)
//! 2. Values from the origin snapshot

use crate::config::schema::AppConfig;

/// Values that win over whatever the origin delivers.
///
/// Empty strings and a zero port mean "not overridden".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeOverrides {
    /// Log destination.
    pub log: String,
    pub log_format: String,
    pub log_level: String,
    /// Listen port.
    pub port: u16,
}

impl RuntimeOverrides {
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
            && self.log_format.is_empty()
            && self.log_level.is_empty()
            && self.port == 0
    }

    /// Merge overrides into a decoded tree. Pure.
    pub fn apply(&self, mut config: AppConfig) -> AppConfig {
        if !self.log.is_empty() {
            config.logging.log = self.log.clone();
        }
        if !self.log_format.is_empty() {
            config.logging.format = self.log_format.clone();
        }
        if !self.log_level.is_empty() {
            config.logging.level = self.log_level.clone();
        }
        if self.port > 0 {
            config.discovery.server_port = u32::from(self.port);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> AppConfig {
        let mut config = AppConfig::default();
        config.logging.log = "file".into();
        config.logging.log_dir = "/var/log/app".into();
        config.logging.level = "warn".into();
        config.logging.format = "json".into();
        config.discovery.server_port = 9000;
        config.cache.host = "h1".into();
        config
    }

    #[test]
    fn test_empty_overrides_are_noop() {
        let overrides = RuntimeOverrides::default();
        assert!(overrides.is_empty());
        assert_eq!(overrides.apply(origin()), origin());
    }

    #[test]
    fn test_overrides_win() {
        let overrides = RuntimeOverrides {
            log: "console".into(),
            log_format: String::new(),
            log_level: "debug".into(),
            port: 8080,
        };
        let merged = overrides.apply(origin());

        assert_eq!(merged.logging.log, "console");
        assert_eq!(merged.logging.level, "debug");
        assert_eq!(merged.logging.format, "json");
        assert_eq!(merged.logging.log_dir, "/var/log/app");
        assert_eq!(merged.discovery.server_port, 8080);
        assert_eq!(merged.cache.host, "h1");
    }
}
