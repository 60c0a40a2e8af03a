//! Collaborators of one invocation and scoped store connections.
//!
//! An [`Environment`] bundles everything the engine consumes but does not own:
//! credential resolution, the store connector, the configuration updater and
//! the progress sink. Every entry point opens its [`Connections`] at the start
//! and closes them on every exit path through [`Environment::scoped`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::credentials::{CredentialProvider, Credentials};
use crate::cutover::{ConfigUpdater, JsonFileConfigUpdater};
use crate::error::{MigrateError, Result};
use crate::progress::{LogProgressSink, ProgressSink};
use crate::retry::RetryPolicy;
use crate::store::{connect_store, DocumentStore, StoreConnector};
use crate::transfer::{BatchProcessor, TransferConfig};
use crate::verify::VerificationController;

/// Engine-wide limits derived from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub require_tls: bool,
    pub connect_timeout: Duration,
    pub transfer: TransferConfig,
    pub step_retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            require_tls: false,
            connect_timeout: Duration::from_secs(10),
            transfer: TransferConfig::default(),
            step_retry: RetryPolicy::linear(3, Duration::from_secs(2)),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            require_tls: config.connector.require_tls,
            connect_timeout: config.connector.connect_timeout(),
            transfer: TransferConfig {
                safety_margin: config.migration.safety_margin(),
                progress_interval: config.migration.progress_interval,
                retry: config.migration.write_retry_policy(),
                socket_timeout: config.connector.socket_timeout(),
            },
            step_retry: config.migration.step_retry_policy(),
        }
    }
}

/// External collaborators and settings shared by every entry point.
#[derive(Clone)]
pub struct Environment {
    pub credentials: Arc<dyn CredentialProvider>,
    pub connector: Arc<dyn StoreConnector>,
    pub config_updater: Arc<dyn ConfigUpdater>,
    pub progress: Arc<dyn ProgressSink>,
    pub settings: EngineSettings,
    pub cancel: CancellationToken,
}

impl Environment {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        connector: Arc<dyn StoreConnector>,
        config_updater: Arc<dyn ConfigUpdater>,
    ) -> Self {
        Self {
            credentials,
            connector,
            config_updater,
            progress: Arc::new(LogProgressSink),
            settings: EngineSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// File connector, config-file credentials and JSON config updater.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(config.credential_provider()),
            Arc::new(config.file_connector()),
            Arc::new(JsonFileConfigUpdater::new(config.app_config.path.clone())),
        )
        .with_settings(EngineSettings::from_config(config))
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Resolve a credential reference.
    pub async fn resolve(&self, reference: &str) -> Result<Credentials> {
        self.credentials.resolve(reference).await
    }

    /// Open both stores. If the target cannot be opened the source is closed
    /// before returning the error.
    pub async fn connect(&self, source_ref: &str, target_ref: &str) -> Result<Connections> {
        let source = self.open(source_ref).await?;
        let target = match self.open(target_ref).await {
            Ok(target) => target,
            Err(e) => {
                source.close().await;
                return Err(e);
            }
        };
        let connections = Connections::new(source, target, source_ref, target_ref);
        if let Err(e) = self.check_distinct(source_ref, target_ref).await {
            connections.close().await;
            return Err(e);
        }
        Ok(connections)
    }

    /// Refuse a source and target that resolve to the same physical store.
    async fn check_distinct(&self, source_ref: &str, target_ref: &str) -> Result<()> {
        let source = self.connector.location(&self.resolve(source_ref).await?);
        let target = self.connector.location(&self.resolve(target_ref).await?);
        if source == target {
            return Err(MigrateError::Config(format!(
                "{} and {} resolve to the same store ({})",
                source_ref, target_ref, source
            )));
        }
        Ok(())
    }

    /// Run `work` against freshly opened connections and close them afterwards,
    /// whether `work` succeeded or not.
    pub async fn scoped<T, F, Fut>(&self, source_ref: &str, target_ref: &str, work: F) -> Result<T>
    where
        F: FnOnce(Connections) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let connections = self.connect(source_ref, target_ref).await?;
        let outcome = work(connections.clone()).await;
        connections.close().await;
        outcome
    }

    /// Batch processor over `connections`, wired to this environment's
    /// progress sink and cancellation token.
    pub fn processor(&self, connections: &Connections) -> BatchProcessor {
        BatchProcessor::new(
            connections.source.clone(),
            connections.target.clone(),
            self.settings.transfer.clone(),
        )
        .with_progress(self.progress.clone())
        .with_cancel(self.cancel.clone())
    }

    /// Verification controller over `connections`.
    pub fn verifier(&self, connections: &Connections) -> VerificationController {
        VerificationController::new(
            connections.clone(),
            self.credentials.clone(),
            self.config_updater.clone(),
        )
        .with_socket_timeout(self.settings.transfer.socket_timeout)
    }

    async fn open(&self, reference: &str) -> Result<Arc<dyn DocumentStore>> {
        connect_store(
            self.connector.as_ref(),
            self.credentials.as_ref(),
            reference,
            self.settings.require_tls,
            self.settings.connect_timeout,
        )
        .await
    }
}

/// Source and target handles for one invocation.
#[derive(Clone)]
pub struct Connections {
    pub source: Arc<dyn DocumentStore>,
    pub target: Arc<dyn DocumentStore>,
    pub source_ref: String,
    pub target_ref: String,
}

impl Connections {
    pub fn new(
        source: Arc<dyn DocumentStore>,
        target: Arc<dyn DocumentStore>,
        source_ref: impl Into<String>,
        target_ref: impl Into<String>,
    ) -> Self {
        Self {
            source,
            target,
            source_ref: source_ref.into(),
            target_ref: target_ref.into(),
        }
    }

    /// Release both handles.
    pub async fn close(&self) {
        debug!("Closing stores {} and {}", self.source_ref, self.target_ref);
        self.source.close().await;
        self.target.close().await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures: two memory stores behind config-style credentials.

    use super::*;
    use crate::credentials::ConfigCredentialProvider;
    use crate::store::{MemoryConnector, MemoryStore};
    use std::path::Path;

    pub(crate) fn creds(host: &str) -> Credentials {
        Credentials {
            host: host.to_string(),
            port: 27017,
            username: "maps".to_string(),
            password: "s3cret".to_string(),
            tls: true,
        }
    }

    pub(crate) struct Fixture {
        pub legacy: Arc<MemoryStore>,
        pub atlas: Arc<MemoryStore>,
        pub env: Environment,
    }

    /// `legacy` and `atlas` memory stores; the application config file lives
    /// at `app_config`. Retries never sleep.
    pub(crate) fn fixture(app_config: &Path) -> Fixture {
        let legacy = Arc::new(MemoryStore::new("legacy-cluster:27017"));
        let atlas = Arc::new(MemoryStore::new("atlas-cluster:27017"));
        let connector = MemoryConnector::new()
            .with_store("legacy-cluster", legacy.clone())
            .with_store("atlas-cluster", atlas.clone());
        let provider = ConfigCredentialProvider::default()
            .with_entry("legacy", creds("legacy-cluster"))
            .with_entry("atlas", creds("atlas-cluster"));
        let settings = EngineSettings {
            transfer: TransferConfig {
                retry: RetryPolicy::exponential(3, Duration::ZERO, Duration::ZERO),
                ..TransferConfig::default()
            },
            step_retry: RetryPolicy::linear(3, Duration::ZERO),
            ..EngineSettings::default()
        };
        let env = Environment::new(
            Arc::new(provider),
            Arc::new(connector),
            Arc::new(JsonFileConfigUpdater::new(app_config)),
        )
        .with_settings(settings);
        Fixture { legacy, atlas, env }
    }
}
