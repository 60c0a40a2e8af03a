//! Time-bounded, resumable batch copy of one collection.
//!
//! One [`BatchProcessor::run`] call is one invocation: it counts the source,
//! then reads and writes fixed-size batches until the collection is exhausted,
//! the time budget or batch cap is reached, the run is cancelled, or a batch
//! fails fatally. Whatever the reason, the returned [`MigrationResult`] holds
//! the offset the next invocation must resume from.
//!
//! Reads and writes are strictly sequential so memory stays bounded to one
//! batch. Stopping is cooperative: the budget is checked between batches, and
//! an in-flight write is never interrupted.

mod result;

pub use result::{BatchClass, BatchError, BatchOutcome, MigrationResult, StopReason};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cursor::BatchCursor;
use crate::error::{MigrateError, Result, StoreError};
use crate::progress::{Heartbeat, NoopProgressSink, ProgressSink};
use crate::retry::{retry, Exhausted, RetryPolicy};
use crate::store::{Document, DocumentStore, StoreResult};

/// One collection's worth of work for a single invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationJob {
    /// Collection name, identical in both stores.
    pub collection_name: String,

    /// Documents per batch.
    pub batch_size: usize,

    /// Document-count offset to start from (the resume token).
    pub start_offset: u64,

    /// Cap on batches for this invocation.
    pub max_batches: Option<u64>,

    /// Wall-clock ceiling for this invocation.
    #[serde(with = "duration_ms")]
    pub time_budget: Duration,

    /// Count only, never write.
    pub dry_run: bool,
}

impl MigrationJob {
    /// Job with default batch size (1000), no batch cap and a 14 minute budget.
    pub fn new(collection_name: impl Into<String>) -> Self {
        Self {
            collection_name: collection_name.into(),
            batch_size: crate::config::default_batch_size(),
            start_offset: 0,
            max_batches: None,
            time_budget: Duration::from_secs(14 * 60),
            dry_run: false,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_start_offset(mut self, offset: u64) -> Self {
        self.start_offset = offset;
        self
    }

    pub fn with_max_batches(mut self, max_batches: Option<u64>) -> Self {
        self.max_batches = max_batches;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Reject jobs the loop cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.collection_name.trim().is_empty() {
            return Err(MigrateError::InvalidJob("collectionName is required".into()));
        }
        if self.batch_size == 0 {
            return Err(MigrateError::InvalidJob("batchSize must be at least 1".into()));
        }
        if self.max_batches == Some(0) {
            return Err(MigrateError::InvalidJob("maxBatches must be at least 1".into()));
        }
        if self.time_budget.is_zero() {
            return Err(MigrateError::InvalidJob("timeBudget must be positive".into()));
        }
        Ok(())
    }
}

/// Engine settings shared by every job an environment runs.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Stop this long before the time budget runs out.
    pub safety_margin: Duration,
    /// Heartbeat every N batches.
    pub progress_interval: u64,
    /// Retry schedule for batch reads and writes.
    pub retry: RetryPolicy,
    /// Per-operation store timeout.
    pub socket_timeout: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            safety_margin: Duration::ZERO,
            progress_interval: 10,
            retry: RetryPolicy::default(),
            socket_timeout: Duration::from_secs(30),
        }
    }
}

/// A batch that could not be written (or read) after retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub attempts: u32,
    pub error: StoreError,
}

impl BatchFailure {
    fn message(&self) -> String {
        format!("{} (after {} attempt(s))", self.error, self.attempts)
    }
}

/// Drives the copy loop between two connected stores.
pub struct BatchProcessor {
    source: Arc<dyn DocumentStore>,
    target: Arc<dyn DocumentStore>,
    config: TransferConfig,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl BatchProcessor {
    /// Create a new batch processor.
    pub fn new(
        source: Arc<dyn DocumentStore>,
        target: Arc<dyn DocumentStore>,
        config: TransferConfig,
    ) -> Self {
        Self {
            source,
            target,
            config,
            progress: Arc::new(NoopProgressSink),
            cancel: CancellationToken::new(),
        }
    }

    /// Send heartbeats to `sink`.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Stop between batches once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run one invocation of `job`.
    ///
    /// Fails only when the job is invalid or the source cannot be counted;
    /// batch-level failures are reported inside the result.
    pub async fn run(&self, job: &MigrationJob) -> Result<MigrationResult> {
        job.validate()?;
        if job.time_budget <= self.config.safety_margin {
            return Err(MigrateError::InvalidJob(format!(
                "timeBudget of {} ms leaves no time after the {} ms safety margin",
                job.time_budget.as_millis(),
                self.config.safety_margin.as_millis()
            )));
        }
        let started = Instant::now();
        let collection = job.collection_name.as_str();

        let total = with_timeout(self.config.socket_timeout, self.source.count(collection))
            .await
            .map_err(|e| MigrateError::store(format!("count {}", collection), e))?;

        let mut result = MigrationResult::begin(job, total);
        let mut offset = job.start_offset;
        let deadline = job.time_budget.saturating_sub(self.config.safety_margin);
        let cursor = BatchCursor::new(self.source.clone(), collection);

        info!(
            "{}: starting at offset {} of {} (batch size {}, dry run: {})",
            collection, offset, total, job.batch_size, job.dry_run
        );

        let stop = loop {
            if offset >= total {
                break StopReason::Completed;
            }
            if started.elapsed() >= deadline {
                info!(
                    "{}: time budget reached after {:?}, pausing at offset {}",
                    collection,
                    started.elapsed(),
                    offset
                );
                break StopReason::TimeBudget;
            }
            if let Some(max) = job.max_batches {
                if result.processed_batches >= max {
                    info!("{}: batch limit {} reached at offset {}", collection, max, offset);
                    break StopReason::BatchLimit;
                }
            }
            if self.cancel.is_cancelled() {
                info!("{}: cancellation requested, pausing at offset {}", collection, offset);
                break StopReason::Cancelled;
            }

            let batch_number = result.processed_batches + 1;
            let window = match self.read_batch(&cursor, offset, job.batch_size).await {
                Ok(window) => window,
                Err(failure) => {
                    error!(
                        "{}: reading batch {} at offset {} failed: {}",
                        collection,
                        batch_number,
                        offset,
                        failure.message()
                    );
                    result.record(BatchError::new(
                        batch_number,
                        offset,
                        BatchClass::Fatal,
                        format!("read failed: {}", failure.message()),
                    ));
                    break StopReason::Fatal;
                }
            };
            if window.is_empty() {
                if offset < total {
                    warn!(
                        "{}: source ended at offset {} before the counted {} documents",
                        collection, offset, total
                    );
                }
                break StopReason::Completed;
            }

            let outcome = if job.dry_run {
                BatchOutcome::counted(window.len())
            } else {
                match self.write_batch(collection, window).await {
                    Ok(outcome) => outcome,
                    Err(failure) => {
                        error!(
                            "{}: batch {} at offset {} failed: {}",
                            collection,
                            batch_number,
                            offset,
                            failure.message()
                        );
                        result.record(BatchError::new(
                            batch_number,
                            offset,
                            BatchClass::Fatal,
                            failure.message(),
                        ));
                        break StopReason::Fatal;
                    }
                }
            };

            match outcome.classification {
                BatchClass::DuplicateSkip => {
                    warn!(
                        "{}: batch {} at offset {} hit {} duplicate(s), treating as migrated",
                        collection, batch_number, offset, outcome.duplicates
                    );
                    result.record(BatchError::new(
                        batch_number,
                        offset,
                        BatchClass::DuplicateSkip,
                        format!(
                            "duplicate key: {} document(s) already present, {} inserted",
                            outcome.duplicates, outcome.documents_written
                        ),
                    ));
                    offset += job.batch_size as u64;
                }
                _ => {
                    offset += outcome.documents_read as u64;
                }
            }
            result.apply(&outcome);

            debug!(
                "{}: batch {} read {} wrote {} (offset now {})",
                collection,
                batch_number,
                outcome.documents_read,
                outcome.documents_written,
                offset
            );

            if batch_number % self.config.progress_interval.max(1) == 0 {
                self.emit_progress(&result, offset, started).await;
            }
        };

        result.finish(offset, stop, started.elapsed());
        info!(
            "{}: {} batches, {} documents ({} written) in {} ms, stop: {}, next token: {:?}",
            collection,
            result.processed_batches,
            result.processed_documents,
            result.documents_written,
            result.duration_ms,
            result.stop_reason,
            result.next_resume_token
        );
        Ok(result)
    }

    /// Read one window, retrying failed reads.
    async fn read_batch(
        &self,
        cursor: &BatchCursor,
        offset: u64,
        batch_size: usize,
    ) -> std::result::Result<Vec<Document>, BatchFailure> {
        let label = format!("read {}@{}", cursor.collection(), offset);
        let timeout = self.config.socket_timeout;
        retry(
            &self.config.retry,
            &label,
            StoreError::is_retryable,
            |_| with_timeout(timeout, cursor.next_window(offset, batch_size)),
        )
        .await
        .map(|(window, _)| window)
        .map_err(|Exhausted { attempts, error }| BatchFailure { attempts, error })
    }

    /// Unordered insert with retry. Duplicate-key rejections are not retried
    /// and classify the batch as already migrated.
    async fn write_batch(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> std::result::Result<BatchOutcome, BatchFailure> {
        let documents_read = docs.len();
        let label = format!("write {}", collection);
        let timeout = self.config.socket_timeout;

        let written = retry(
            &self.config.retry,
            &label,
            StoreError::is_retryable,
            |_| {
                let target = self.target.clone();
                let collection = collection.to_string();
                let docs = docs.clone();
                async move { with_timeout(timeout, target.insert_unordered(&collection, docs)).await }
            },
        )
        .await;

        match written {
            Ok((documents_written, _)) => Ok(BatchOutcome {
                documents_read,
                documents_written,
                duplicates: 0,
                classification: BatchClass::Ok,
            }),
            Err(Exhausted {
                error:
                    StoreError::DuplicateKey {
                        inserted,
                        duplicates,
                    },
                ..
            }) => Ok(BatchOutcome {
                documents_read,
                documents_written: inserted,
                duplicates,
                classification: BatchClass::DuplicateSkip,
            }),
            Err(Exhausted { attempts, error }) => Err(BatchFailure { attempts, error }),
        }
    }

    /// Best effort: failures are logged and swallowed.
    async fn emit_progress(&self, result: &MigrationResult, offset: u64, started: Instant) {
        let beat = Heartbeat {
            collection: result.collection.clone(),
            batch_number: result.processed_batches,
            offset,
            processed_documents: result.processed_documents,
            total_documents: result.total_documents,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        if let Err(e) = self.progress.heartbeat(&beat).await {
            warn!("{}: progress heartbeat failed: {}", result.collection, e);
        }
    }
}

/// Bound a store operation by `timeout`.
pub(crate) async fn with_timeout<T>(
    timeout: Duration,
    op: impl Future<Output = StoreResult<T>>,
) -> StoreResult<T> {
    match tokio::time::timeout(timeout, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout.as_millis() as u64)),
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
