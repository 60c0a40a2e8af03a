//! Source/target comparison, status polling and manual rollback.
//!
//! - **verify**: counts, index counts and the key set of one sampled document,
//!   per collection. A collection that cannot be compared is reported with
//!   status `error`; the remaining collections are still verified.
//! - **status**: counts and reachability of both stores, nothing deeper.
//! - **rollback**: re-points the application at the source store. Refuses to
//!   run without an explicit force flag and never copies documents back.

pub mod types;

pub use types::{
    CollectionStatus, RollbackReport, StatusReport, StoreStatus, VerificationReport, VerifyStatus,
};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::credentials::CredentialProvider;
use crate::cutover::ConfigUpdater;
use crate::error::{MigrateError, Result};
use crate::session::Connections;
use crate::store::{key_set, DocumentStore, StoreResult};
use crate::transfer::with_timeout;

/// Verification/rollback operations over one pair of connected stores.
pub struct VerificationController {
    connections: Connections,
    credentials: Arc<dyn CredentialProvider>,
    config_updater: Arc<dyn ConfigUpdater>,
    socket_timeout: Duration,
}

impl VerificationController {
    pub fn new(
        connections: Connections,
        credentials: Arc<dyn CredentialProvider>,
        config_updater: Arc<dyn ConfigUpdater>,
    ) -> Self {
        Self {
            connections,
            credentials,
            config_updater,
            socket_timeout: Duration::from_secs(30),
        }
    }

    /// Bound every store call by `timeout`.
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// Compare each collection. Never fails as a whole.
    pub async fn verify(&self, collections: &[String]) -> Vec<VerificationReport> {
        let mut reports = Vec::with_capacity(collections.len());
        for collection in collections {
            let report = match self.compare(collection).await {
                Ok(report) => report,
                Err(e) => {
                    warn!("{}: verification failed: {}", collection, e);
                    VerificationReport::failed(collection, e.to_string())
                }
            };
            match report.status {
                VerifyStatus::Match => info!(
                    "{}: {} documents, {} indexes (match)",
                    collection, report.new_count, report.new_index_count
                ),
                VerifyStatus::Mismatch => warn!(
                    "{}: MISMATCH source={} target={} indexes {}/{} shape match: {}",
                    collection,
                    report.old_count,
                    report.new_count,
                    report.old_index_count,
                    report.new_index_count,
                    report.sample_shape_match
                ),
                VerifyStatus::Error => {}
            }
            reports.push(report);
        }
        reports
    }

    /// Counts and reachability of both stores.
    pub async fn status(&self, collections: &[String]) -> StatusReport {
        let source = self
            .probe(&self.connections.source_ref, self.connections.source.as_ref())
            .await;
        let target = self
            .probe(&self.connections.target_ref, self.connections.target.as_ref())
            .await;

        let mut statuses = Vec::with_capacity(collections.len());
        for collection in collections {
            let source_count = if source.online {
                self.bounded(self.connections.source.count(collection))
                    .await
                    .ok()
            } else {
                None
            };
            let target_count = if target.online {
                self.bounded(self.connections.target.count(collection))
                    .await
                    .ok()
            } else {
                None
            };
            statuses.push(CollectionStatus {
                collection: collection.clone(),
                source_count,
                target_count,
            });
        }

        StatusReport {
            source,
            target,
            collections: statuses,
        }
    }

    /// Point the application back at the source store.
    ///
    /// Documents already written to the target stay there.
    pub async fn rollback(&self, force: bool) -> Result<RollbackReport> {
        if !force {
            warn!("Rollback requested without force flag, refusing");
            return Err(MigrateError::RollbackRefused);
        }

        let source_ref = &self.connections.source_ref;
        warn!(
            "Rolling back: re-pointing application from {} to {}",
            self.connections.target_ref, source_ref
        );
        let credentials = self.credentials.resolve(source_ref).await?;
        let active = self.config_updater.point_to(source_ref, &credentials).await?;

        Ok(RollbackReport {
            rolled_back_from: self.connections.target_ref.clone(),
            active,
        })
    }

    async fn compare(&self, collection: &str) -> StoreResult<VerificationReport> {
        let source = self.connections.source.as_ref();
        let target = self.connections.target.as_ref();

        let counts = (
            self.bounded(source.count(collection)).await?,
            self.bounded(target.count(collection)).await?,
        );
        let indexes = (
            self.bounded(source.index_count(collection)).await?,
            self.bounded(target.index_count(collection)).await?,
        );
        let old_sample = self.bounded(source.sample(collection)).await?;
        let new_sample = self.bounded(target.sample(collection)).await?;
        let shape_match = match (&old_sample, &new_sample) {
            (Some(old), Some(new)) => key_set(old) == key_set(new),
            (None, None) => true,
            _ => false,
        };

        Ok(VerificationReport::measured(
            collection,
            counts,
            indexes,
            shape_match,
        ))
    }

    async fn probe(&self, reference: &str, store: &dyn DocumentStore) -> StoreStatus {
        match self.bounded(store.ping()).await {
            Ok(()) => StoreStatus {
                store: reference.to_string(),
                online: true,
                error: None,
            },
            Err(e) => {
                warn!("Store {} is not answering: {}", reference, e);
                StoreStatus {
                    store: reference.to_string(),
                    online: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn bounded<T>(
        &self,
        op: impl Future<Output = StoreResult<T>>,
    ) -> impl Future<Output = StoreResult<T>> {
        with_timeout(self.socket_timeout, op)
    }
}
