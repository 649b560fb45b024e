//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reloadkit::BootstrapDescriptor;
use tempfile::TempDir;

/// Poll interval used by file-origin tests.
pub const TICK: Duration = Duration::from_millis(25);

/// A configuration file in a private temp directory.
pub struct OriginFile {
    _dir: TempDir,
    path: PathBuf,
}

impl OriginFile {
    pub fn new(content: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.json");
        let file = Self { _dir: dir, path };
        file.write(content);
        file
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the content atomically so a poll never sees a partial write.
    pub fn write(&self, content: &str) {
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, content).unwrap();
        fs::rename(&staging, &self.path).unwrap();
    }

    /// Descriptor pointing a file origin at this file.
    pub fn descriptor(&self) -> BootstrapDescriptor {
        BootstrapDescriptor {
            config_path: self.path.to_string_lossy().into_owned(),
            config_format: "json".into(),
            engine_type: "file".into(),
            ..Default::default()
        }
    }
}

/// Cache section enabled and bound to `host`.
pub fn cache_config(host: &str) -> String {
    format!(r#"{{"cache":{{"enable":true,"host":"{}"}}}}"#, host)
}

/// Poll `done` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    done()
}
