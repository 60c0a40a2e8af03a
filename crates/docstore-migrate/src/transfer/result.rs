//! Per-batch outcomes and the accumulated per-job result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::MigrationJob;

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchClass {
    Ok,
    /// Rejected as duplicates: assumed already migrated, cursor moves on.
    DuplicateSkip,
    /// Unrecoverable for this invocation: the loop stops at this batch.
    Fatal,
}

/// Result of processing one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub documents_read: usize,
    pub documents_written: usize,
    /// Documents the target already held.
    pub duplicates: usize,
    pub classification: BatchClass,
}

impl BatchOutcome {
    /// A dry-run batch: read, never written.
    pub fn counted(documents_read: usize) -> Self {
        Self {
            documents_read,
            documents_written: 0,
            duplicates: 0,
            classification: BatchClass::Ok,
        }
    }
}

/// A recorded batch problem, with enough context to replay it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    pub batch_number: u64,
    pub offset: u64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub classification: BatchClass,
}

impl BatchError {
    pub fn new(
        batch_number: u64,
        offset: u64,
        classification: BatchClass,
        message: impl Into<String>,
    ) -> Self {
        Self {
            batch_number,
            offset,
            message: message.into(),
            timestamp: Utc::now(),
            classification,
        }
    }
}

/// Why the batch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The cursor reached the end of the collection.
    Completed,
    /// The time budget (minus safety margin) ran out.
    TimeBudget,
    /// `max_batches` batches were processed.
    BatchLimit,
    /// The run was cancelled between batches.
    Cancelled,
    /// A batch failed after retries.
    Fatal,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Completed => "completed",
            StopReason::TimeBudget => "time_budget",
            StopReason::BatchLimit => "batch_limit",
            StopReason::Cancelled => "cancelled",
            StopReason::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Progress of one collection, for one invocation or merged across many.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub collection: String,
    pub total_documents: u64,
    /// Offset the (first) invocation started from.
    pub start_offset: u64,
    pub processed_batches: u64,
    pub processed_documents: u64,
    pub documents_written: u64,
    /// `total - (start_offset + processed)`, never below zero.
    pub remaining_documents: u64,
    pub errors: Vec<BatchError>,
    pub completed: bool,
    /// Where the next invocation must start; `None` once completed.
    pub next_resume_token: Option<u64>,
    pub stop_reason: StopReason,
    pub dry_run: bool,
    pub invocations: u32,
    pub duration_ms: u64,
}

impl MigrationResult {
    pub(crate) fn begin(job: &MigrationJob, total_documents: u64) -> Self {
        Self {
            collection: job.collection_name.clone(),
            total_documents,
            start_offset: job.start_offset,
            processed_batches: 0,
            processed_documents: 0,
            documents_written: 0,
            remaining_documents: total_documents.saturating_sub(job.start_offset),
            errors: Vec::new(),
            completed: false,
            next_resume_token: Some(job.start_offset),
            stop_reason: StopReason::Completed,
            dry_run: job.dry_run,
            invocations: 1,
            duration_ms: 0,
        }
    }

    pub(crate) fn record(&mut self, error: BatchError) {
        self.errors.push(error);
    }

    pub(crate) fn apply(&mut self, outcome: &BatchOutcome) {
        self.processed_batches += 1;
        self.processed_documents += outcome.documents_read as u64;
        self.documents_written += outcome.documents_written as u64;
        self.remaining_documents = self
            .total_documents
            .saturating_sub(self.start_offset + self.processed_documents);
    }

    pub(crate) fn finish(&mut self, offset: u64, stop: StopReason, elapsed: Duration) {
        self.stop_reason = stop;
        self.completed = stop == StopReason::Completed;
        self.next_resume_token = if self.completed { None } else { Some(offset) };
        self.duration_ms = elapsed.as_millis() as u64;
    }

    /// Whether the last invocation stopped on a fatal batch.
    pub fn is_fatal(&self) -> bool {
        self.stop_reason == StopReason::Fatal
    }

    /// Errors with the given classification.
    pub fn errors_of(&self, class: BatchClass) -> impl Iterator<Item = &BatchError> {
        self.errors.iter().filter(move |e| e.classification == class)
    }

    /// Fold the result of the following invocation into this one.
    pub fn absorb(&mut self, next: MigrationResult) {
        self.total_documents = next.total_documents;
        self.processed_batches += next.processed_batches;
        self.processed_documents += next.processed_documents;
        self.documents_written += next.documents_written;
        self.remaining_documents = next.remaining_documents;
        self.errors.extend(next.errors);
        self.completed = next.completed;
        self.next_resume_token = next.next_resume_token;
        self.stop_reason = next.stop_reason;
        self.invocations += next.invocations;
        self.duration_ms += next.duration_ms;
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
