//! Re-pointing the application's persisted connection configuration.
//!
//! After a verified migration the application must read from the target
//! store; a rollback points it back at the source. Both go through a
//! [`ConfigUpdater`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::credentials::Credentials;
use crate::error::Result;

/// The connection the application should use. Never carries the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveStore {
    /// Credential reference the application resolves at startup.
    pub active_store: String,
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub updated_at: DateTime<Utc>,
}

impl ActiveStore {
    pub fn new(reference: &str, credentials: &Credentials) -> Self {
        Self {
            active_store: reference.to_string(),
            host: credentials.host.clone(),
            port: credentials.port,
            tls: credentials.tls,
            updated_at: Utc::now(),
        }
    }
}

/// Rewrites the application's stored connection configuration.
#[async_trait]
pub trait ConfigUpdater: Send + Sync {
    /// Point the application at the store named `reference`.
    async fn point_to(&self, reference: &str, credentials: &Credentials) -> Result<ActiveStore>;
}

/// Keeps the active store in a JSON file, replaced atomically.
#[derive(Debug, Clone)]
pub struct JsonFileConfigUpdater {
    path: PathBuf,
}

impl JsonFileConfigUpdater {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current contents, or `None` if the file has never been written.
    pub async fn read(&self) -> Result<Option<ActiveStore>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ConfigUpdater for JsonFileConfigUpdater {
    async fn point_to(&self, reference: &str, credentials: &Credentials) -> Result<ActiveStore> {
        let active = ActiveStore::new(reference, credentials);
        let content = serde_json::to_string_pretty(&active)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        info!(
            "Application now points at {} ({})",
            reference,
            credentials.endpoint()
        );
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn atlas() -> Credentials {
        Credentials {
            host: "atlas-cluster".to_string(),
            port: 27017,
            username: "maps".to_string(),
            password: "do-not-persist".to_string(),
            tls: true,
        }
    }

    #[tokio::test]
    async fn test_point_to_writes_active_store_without_password() {
        let dir = TempDir::new().unwrap();
        let updater = JsonFileConfigUpdater::new(dir.path().join("app").join("active-store.json"));
        assert_eq!(updater.read().await.unwrap(), None);

        let active = updater.point_to("atlas", &atlas()).await.unwrap();
        assert_eq!(active.active_store, "atlas");

        let content = std::fs::read_to_string(updater.path()).unwrap();
        assert!(content.contains("\"activeStore\": \"atlas\""));
        assert!(!content.contains("do-not-persist"));
        assert_eq!(updater.read().await.unwrap(), Some(active));
    }

    #[tokio::test]
    async fn test_point_to_replaces_previous_store() {
        let dir = TempDir::new().unwrap();
        let updater = JsonFileConfigUpdater::new(dir.path().join("active-store.json"));
        updater.point_to("atlas", &atlas()).await.unwrap();

        let mut legacy = atlas();
        legacy.host = "legacy-cluster".to_string();
        updater.point_to("legacy", &legacy).await.unwrap();

        let active = updater.read().await.unwrap().unwrap();
        assert_eq!(active.active_store, "legacy");
        assert_eq!(active.host, "legacy-cluster");
        assert!(!dir.path().join("active-store.tmp").exists());
    }
}
