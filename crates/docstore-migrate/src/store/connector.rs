//! Opening store handles from resolved credentials.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{DocumentStore, FileStore, MemoryStore, StoreResult};
use crate::credentials::{CredentialProvider, Credentials};
use crate::error::{MigrateError, Result, StoreError};

/// Opens a connected [`DocumentStore`] for resolved credentials.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Connect to the store described by `credentials`.
    async fn connect(&self, credentials: &Credentials) -> StoreResult<Arc<dyn DocumentStore>>;

    /// Identity of the physical store `credentials` reach. Two references with
    /// the same location are the same store.
    fn location(&self, credentials: &Credentials) -> String {
        credentials.endpoint()
    }
}

/// Connector for [`FileStore`]s: each host is a directory under `root`.
#[derive(Debug, Clone)]
pub struct FileConnector {
    root: PathBuf,
}

impl FileConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl StoreConnector for FileConnector {
    async fn connect(&self, credentials: &Credentials) -> StoreResult<Arc<dyn DocumentStore>> {
        if credentials.host.is_empty()
            || credentials.host.contains(['/', '\\'])
            || credentials.host.starts_with('.')
        {
            return Err(StoreError::Connection(format!(
                "invalid host for file store: {:?}",
                credentials.host
            )));
        }
        let dir = self.root.join(&credentials.host);
        let store = FileStore::open(credentials.endpoint(), dir).await?;
        Ok(Arc::new(store))
    }

    /// The port plays no part in where a file store lives.
    fn location(&self, credentials: &Credentials) -> String {
        self.root.join(&credentials.host).display().to_string()
    }
}

/// Connector handing out pre-registered [`MemoryStore`]s by host.
#[derive(Default, Clone)]
pub struct MemoryConnector {
    stores: HashMap<String, Arc<MemoryStore>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `store` under `host`.
    pub fn with_store(mut self, host: impl Into<String>, store: Arc<MemoryStore>) -> Self {
        self.stores.insert(host.into(), store);
        self
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, credentials: &Credentials) -> StoreResult<Arc<dyn DocumentStore>> {
        let store = self.stores.get(&credentials.host).cloned().ok_or_else(|| {
            StoreError::Connection(format!("no store at {}", credentials.endpoint()))
        })?;
        store.reopen();
        Ok(store)
    }

    fn location(&self, credentials: &Credentials) -> String {
        credentials.host.clone()
    }
}

/// Resolve `reference`, enforce TLS if required, and connect within `timeout`.
pub async fn connect_store(
    connector: &dyn StoreConnector,
    provider: &dyn CredentialProvider,
    reference: &str,
    require_tls: bool,
    timeout: Duration,
) -> Result<Arc<dyn DocumentStore>> {
    let credentials = provider.resolve(reference).await?;
    if require_tls && !credentials.tls {
        return Err(MigrateError::Tls(reference.to_string()));
    }

    debug!("Connecting to {} ({})", reference, credentials.endpoint());
    let store = tokio::time::timeout(timeout, connector.connect(&credentials))
        .await
        .map_err(|_| {
            MigrateError::store(
                format!("connect {}", reference),
                StoreError::Timeout(timeout.as_millis() as u64),
            )
        })?
        .map_err(|e| MigrateError::store(format!("connect {}", reference), e))?;

    info!("Connected to store {} ({})", reference, store.name());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::ConfigCredentialProvider;
    use tempfile::TempDir;

    fn creds(host: &str, tls: bool) -> Credentials {
        Credentials {
            host: host.to_string(),
            port: 27017,
            username: "maps".to_string(),
            password: "pw".to_string(),
            tls,
        }
    }

    #[tokio::test]
    async fn test_tls_is_enforced_when_required() {
        let provider = ConfigCredentialProvider::default().with_entry("legacy", creds("legacy", false));
        let connector =
            MemoryConnector::new().with_store("legacy", Arc::new(MemoryStore::new("legacy")));

        let err = connect_store(&connector, &provider, "legacy", true, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MigrateError::Tls(_)));

        assert!(
            connect_store(&connector, &provider, "legacy", false, Duration::from_secs(1))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_unknown_reference_and_host() {
        let provider = ConfigCredentialProvider::default().with_entry("atlas", creds("atlas", true));
        let connector = MemoryConnector::new();

        let err = connect_store(&connector, &provider, "legacy", false, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MigrateError::Credentials(_)));

        let err = connect_store(&connector, &provider, "atlas", false, Duration::from_secs(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            MigrateError::Store {
                source: StoreError::Connection(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_file_connector_uses_host_directory() {
        let root = TempDir::new().unwrap();
        let connector = FileConnector::new(root.path());
        let store = connector.connect(&creds("atlas", true)).await.unwrap();
        store.ping().await.unwrap();
        assert!(root.path().join("atlas").is_dir());

        assert!(connector.connect(&creds("../escape", true)).await.is_err());
    }

    #[test]
    fn test_file_location_ignores_port() {
        let connector = FileConnector::new("/var/lib/maps");
        let mut other_port = creds("cluster", true);
        other_port.port = 27018;
        assert_eq!(
            connector.location(&creds("cluster", true)),
            connector.location(&other_port)
        );
        assert_ne!(
            connector.location(&creds("cluster", true)),
            connector.location(&creds("atlas", true))
        );
    }
}
