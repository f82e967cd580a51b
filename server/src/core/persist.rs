//! Persistence of the configuration snapshot

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::config::FileConfig;
use crate::utils::file::write_atomic;

/// Destination for configuration changes made at runtime (setup, account
/// management, trust model switches).
///
/// Callers mutate a copy of the snapshot, call `save`, and only publish the new
/// state when it returns `Ok`.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn save(&self, snapshot: &FileConfig) -> Result<()>;
}

/// Writes the snapshot as pretty-printed JSON, replacing the file atomically
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for JsonConfigStore {
    async fn save(&self, snapshot: &FileConfig) -> Result<()> {
        let mut contents =
            serde_json::to_vec_pretty(snapshot).context("Failed to serialize configuration")?;
        contents.push(b'\n');

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &contents))
            .await
            .context("Configuration write task failed")??;

        tracing::debug!(path = %self.path.display(), "Configuration saved");
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{AuthFileConfig, AuthMethod};

    #[tokio::test]
    async fn test_json_store_writes_and_preserves_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashgate.json");
        std::fs::write(&path, r#"{"apps":[{"name":"Grafana"}]}"#).unwrap();

        let mut snapshot: FileConfig =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        snapshot.auth = Some(AuthFileConfig {
            method: Some(AuthMethod::None),
            ..Default::default()
        });

        let store = JsonConfigStore::new(&path);
        store.save(&snapshot).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["auth"]["method"], "none");
        assert_eq!(written["apps"][0]["name"], "Grafana");
    }

    #[tokio::test]
    async fn test_json_store_creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dashgate.json");
        let store = JsonConfigStore::new(&path);
        store.save(&FileConfig::default()).await.unwrap();
        assert!(path.exists());
    }
}
