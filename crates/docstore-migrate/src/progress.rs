//! Best-effort progress heartbeats emitted by the batch loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// Why a heartbeat could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProgressError {
    /// The receiving end is down or refused the heartbeat.
    #[error("progress sink unavailable: {0}")]
    Unavailable(String),
}

/// Snapshot sent to a [`ProgressSink`] every N batches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub collection: String,
    pub batch_number: u64,
    pub offset: u64,
    pub processed_documents: u64,
    pub total_documents: u64,
    pub elapsed_ms: u64,
}

impl Heartbeat {
    /// Percentage of the collection covered so far (0-100).
    pub fn percent(&self) -> f64 {
        if self.total_documents == 0 {
            return 100.0;
        }
        (self.offset.min(self.total_documents) as f64 / self.total_documents as f64) * 100.0
    }
}

/// Receiver of progress heartbeats. Errors are logged by the caller and
/// never abort a migration.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn heartbeat(&self, beat: &Heartbeat) -> Result<(), ProgressError>;
}

/// Writes heartbeats to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgressSink;

#[async_trait]
impl ProgressSink for LogProgressSink {
    async fn heartbeat(&self, beat: &Heartbeat) -> Result<(), ProgressError> {
        info!(
            "{}: batch {} at offset {}/{} ({:.1}%, {} ms)",
            beat.collection,
            beat.batch_number,
            beat.offset,
            beat.total_documents,
            beat.percent(),
            beat.elapsed_ms
        );
        Ok(())
    }
}

/// Discards heartbeats.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressSink;

#[async_trait]
impl ProgressSink for NoopProgressSink {
    async fn heartbeat(&self, _beat: &Heartbeat) -> Result<(), ProgressError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        let mut beat = Heartbeat {
            collection: "maps".into(),
            batch_number: 1,
            offset: 250,
            processed_documents: 250,
            total_documents: 1000,
            elapsed_ms: 10,
        };
        assert_eq!(beat.percent(), 25.0);
        beat.offset = 1200;
        assert_eq!(beat.percent(), 100.0);
        beat.total_documents = 0;
        assert_eq!(beat.percent(), 100.0);
    }

    #[test]
    fn test_progress_error_message() {
        let err = ProgressError::Unavailable("dashboard timed out".into());
        assert_eq!(err.to_string(), "progress sink unavailable: dashboard timed out");
    }
}
