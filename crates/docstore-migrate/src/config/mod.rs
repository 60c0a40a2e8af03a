//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::credentials::ConfigCredentialProvider;
use crate::error::Result;
use crate::store::FileConnector;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration for resume validation.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Credential provider over the `credentials` section.
    pub fn credential_provider(&self) -> ConfigCredentialProvider {
        let entries: HashMap<_, _> = self
            .credentials
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ConfigCredentialProvider::new(entries)
    }

    /// File store connector rooted at `connector.root`.
    pub fn file_connector(&self) -> FileConnector {
        FileConnector::new(self.connector.root.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
credentials:
  legacy: { host: legacy-cluster, username: maps, password: s3cret, tls: true }
  atlas:  { host: atlas-cluster, port: 27018, username: maps, password: s3cret }
connector:
  root: /var/lib/maps
  require_tls: true
migration:
  source: legacy
  target: atlas
  collections: [maps, layers]
  max_batches: 5
  write_retry: { max_attempts: 4 }
"#;

    #[test]
    fn test_from_yaml_applies_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.migration.batch_size, 1000);
        assert_eq!(config.migration.time_budget_ms, 840_000);
        assert_eq!(config.migration.max_batches, Some(5));
        assert_eq!(config.migration.write_retry.max_attempts, 4);
        assert_eq!(config.migration.write_retry.base_delay_ms, 1000);
        assert_eq!(config.migration.step_retry.delay_ms, 2000);
        assert_eq!(config.connector.socket_timeout_secs, 30);
        assert!(config.connector.require_tls);
        assert_eq!(config.credentials["atlas"].port, 27018);
        assert_eq!(
            config.app_config.path,
            std::path::PathBuf::from("./active-store.json")
        );
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        assert!(Config::from_yaml("migration: [").is_err());
        assert!(Config::from_yaml("").is_err());
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        let a = Config::from_yaml(YAML).unwrap();
        let b = Config::from_yaml(YAML).unwrap();
        assert_eq!(a.hash(), b.hash());

        let mut c = a.clone();
        c.migration.batch_size = 500;
        assert_ne!(a.hash(), c.hash());
    }

    #[tokio::test]
    async fn test_credential_provider_from_config() {
        use crate::credentials::CredentialProvider;
        let config = Config::from_yaml(YAML).unwrap();
        let provider = config.credential_provider();
        assert_eq!(provider.resolve("atlas").await.unwrap().host, "atlas-cluster");
    }
}
