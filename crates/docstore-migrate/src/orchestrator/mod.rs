//! Migration orchestrator - main workflow coordinator.
//!
//! A linear state machine: `PreValidation -> Migration -> ConfigUpdate -> Done`,
//! with `Failed` reachable from every step. Each step is retried with linear
//! backoff; the first step to exhaust its attempts ends the run and later
//! steps never execute. Rollback is never triggered from here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::MigrationConfig;
use crate::error::{MigrateError, Result};
use crate::session::{Connections, Environment};
use crate::transfer::{with_timeout, MigrationJob, MigrationResult, StopReason};
use crate::verify::{VerificationReport, VerifyStatus};

/// A step of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepName {
    PreValidation,
    Migration,
    ConfigUpdate,
}

impl StepName {
    const ORDER: [StepName; 3] = [
        StepName::PreValidation,
        StepName::Migration,
        StepName::ConfigUpdate,
    ];
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepName::PreValidation => "PreValidation",
            StepName::Migration => "Migration",
            StepName::ConfigUpdate => "ConfigUpdate",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Success,
    Failed,
}

/// Where the state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    PreValidation,
    Migration,
    ConfigUpdate,
    Done,
    Failed,
}

impl From<StepName> for RunPhase {
    fn from(step: StepName) -> Self {
        match step {
            StepName::PreValidation => RunPhase::PreValidation,
            StepName::Migration => RunPhase::Migration,
            StepName::ConfigUpdate => RunPhase::ConfigUpdate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_name: StepName,
    pub status: StepStatus,
    /// Attempts made so far (0 while never started).
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Summary of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationRun {
    pub run_id: String,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
    pub phase: RunPhase,
    pub steps: Vec<StepRecord>,
    pub success: bool,
    /// Always false: rollback is a manual operation.
    pub rollback_executed: bool,
    /// The run stopped because it was cancelled.
    #[serde(default)]
    pub cancelled: bool,
    pub prevalidation: Vec<VerificationReport>,
    /// Merged result per collection, in migration order.
    pub collections: Vec<MigrationResult>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OrchestrationRun {
    fn new(dry_run: bool, config_hash: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            dry_run,
            config_hash,
            phase: RunPhase::PreValidation,
            steps: StepName::ORDER
                .iter()
                .map(|&step_name| StepRecord {
                    step_name,
                    status: StepStatus::Pending,
                    attempt: 0,
                    timestamp: now,
                    detail: None,
                })
                .collect(),
            success: false,
            rollback_executed: false,
            cancelled: false,
            prevalidation: Vec::new(),
            collections: Vec::new(),
            started_at: now,
            completed_at: None,
            duration_seconds: 0.0,
            error: None,
        }
    }

    pub fn step(&self, name: StepName) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step_name == name)
    }

    fn update(&mut self, name: StepName, status: StepStatus, attempt: u32, detail: Option<String>) {
        if let Some(record) = self.steps.iter_mut().find(|s| s.step_name == name) {
            record.status = status;
            record.attempt = attempt;
            record.timestamp = Utc::now();
            record.detail = detail;
        }
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_seconds = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
    }

    /// The failure that ended the run, if it did not succeed.
    pub fn failure(&self) -> Option<MigrateError> {
        if self.success {
            return None;
        }
        if self.cancelled {
            return Some(MigrateError::Cancelled);
        }
        let message = self.error.clone().unwrap_or_else(|| "run did not finish".into());
        let (step, attempts) = self
            .steps
            .iter()
            .find(|s| s.status == StepStatus::Failed)
            .map(|s| (s.step_name.to_string(), s.attempt))
            .unwrap_or_else(|| (self.phase_name(), 0));
        Some(MigrateError::step_failed(step, attempts, message))
    }

    fn phase_name(&self) -> String {
        format!("{:?}", self.phase)
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn collection_mut(&mut self, name: &str) -> Option<&mut MigrationResult> {
        self.collections.iter_mut().find(|r| r.collection == name)
    }
}

/// What one run migrates and how.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub source: String,
    pub target: String,
    pub collections: Vec<String>,
    pub batch_size: usize,
    pub time_budget: Duration,
    pub max_batches: Option<u64>,
    pub dry_run: bool,
    pub auto_rollback: bool,
}

impl RunPlan {
    pub fn from_config(migration: &MigrationConfig) -> Self {
        Self {
            source: migration.source.clone(),
            target: migration.target.clone(),
            collections: migration.collections.clone(),
            batch_size: migration.batch_size,
            time_budget: migration.time_budget(),
            max_batches: migration.max_batches,
            dry_run: migration.dry_run,
            auto_rollback: migration.auto_rollback,
        }
    }

    fn job(&self, collection: &str, start_offset: u64) -> MigrationJob {
        MigrationJob::new(collection)
            .with_batch_size(self.batch_size)
            .with_start_offset(start_offset)
            .with_max_batches(self.max_batches)
            .with_time_budget(self.time_budget)
    }
}

/// Migration orchestrator.
pub struct Orchestrator {
    env: Environment,
    plan: RunPlan,
    config_hash: Option<String>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    pub fn new(env: Environment, plan: RunPlan) -> Self {
        Self {
            env,
            plan,
            config_hash: None,
        }
    }

    /// Record the configuration hash in the run summary.
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// Run all steps.
    ///
    /// Step failures are reported inside the returned run; an `Err` means the
    /// stores could not be opened at all.
    pub async fn run(&self) -> Result<OrchestrationRun> {
        let mut run = OrchestrationRun::new(self.plan.dry_run, self.config_hash.clone());
        info!(
            "Starting migration run {}: {} -> {} ({} collections, dry run: {})",
            run.run_id,
            self.plan.source,
            self.plan.target,
            self.plan.collections.len(),
            self.plan.dry_run
        );
        if self.plan.auto_rollback {
            warn!("auto_rollback is set but rollback is manual-only; it will not run automatically");
        }

        let run_ref = &mut run;
        self.env
            .scoped(&self.plan.source, &self.plan.target, |conns| async move {
                self.execute(&conns, run_ref).await;
                Ok(())
            })
            .await?;

        run.finish();
        if run.success {
            info!(
                "Migration run {} completed in {:.1}s",
                run.run_id, run.duration_seconds
            );
        } else {
            error!(
                "Migration run {} failed in {:?}: {}",
                run.run_id,
                run.steps
                    .iter()
                    .find(|s| s.status == StepStatus::Failed)
                    .map(|s| s.step_name),
                run.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(run)
    }

    async fn execute(&self, conns: &Connections, run: &mut OrchestrationRun) {
        for step in StepName::ORDER {
            run.phase = step.into();
            if let Err(e) = self.run_step(step, conns, run).await {
                run.phase = RunPhase::Failed;
                run.cancelled = matches!(e, MigrateError::Cancelled);
                run.error = Some(e.to_string());
                return;
            }
        }
        run.phase = RunPhase::Done;
        run.success = true;
    }

    /// Retry wrapper shared by every step: linear backoff, failed only after
    /// the last attempt.
    async fn run_step(
        &self,
        step: StepName,
        conns: &Connections,
        run: &mut OrchestrationRun,
    ) -> Result<()> {
        let policy = &self.env.settings.step_retry;
        let max_attempts = policy.max_attempts.max(1);
        info!("Step {}", step);

        let mut attempt = 1;
        loop {
            run.update(step, StepStatus::Pending, attempt, None);
            let outcome = if self.env.cancel.is_cancelled() {
                Err(MigrateError::Cancelled)
            } else {
                match step {
                    StepName::PreValidation => self.pre_validate(conns, run).await,
                    StepName::Migration => self.migrate(conns, run).await,
                    StepName::ConfigUpdate => self.cut_over(conns).await,
                }
            };

            match outcome {
                Ok(detail) => {
                    info!("Step {} succeeded on attempt {}: {}", step, attempt, detail);
                    run.update(step, StepStatus::Success, attempt, Some(detail));
                    return Ok(());
                }
                Err(e) if attempt >= max_attempts || matches!(e, MigrateError::Cancelled) => {
                    error!("Step {} failed after {} attempt(s): {}", step, attempt, e);
                    run.update(step, StepStatus::Failed, attempt, Some(e.to_string()));
                    return Err(e);
                }
                Err(e) => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "Step {} attempt {}/{} failed: {} (retrying in {:?})",
                        step, attempt, max_attempts, e, delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.env.cancel.cancelled() => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Read-only verify. An unreadable collection, or a target already ahead
    /// of the source, stops the run before any data is copied.
    async fn pre_validate(&self, conns: &Connections, run: &mut OrchestrationRun) -> Result<String> {
        let reports = self.env.verifier(conns).verify(&self.plan.collections).await;
        run.prevalidation = reports.clone();

        for report in &reports {
            if report.status == VerifyStatus::Error {
                return Err(MigrateError::VerificationMismatch(format!(
                    "{}: {}",
                    report.collection,
                    report.error.as_deref().unwrap_or("verification error")
                )));
            }
            if report.new_count > report.old_count {
                return Err(MigrateError::VerificationMismatch(format!(
                    "{}: target already holds {} documents, source has {}",
                    report.collection, report.new_count, report.old_count
                )));
            }
        }

        let pending: u64 = reports.iter().map(|r| r.old_count - r.new_count).sum();
        Ok(format!(
            "{} collection(s) verified, up to {} document(s) to copy",
            reports.len(),
            pending
        ))
    }

    /// Copy every collection to completion, one after another, then re-check
    /// counts. Progress made by a failed attempt is kept for the next one.
    async fn migrate(&self, conns: &Connections, run: &mut OrchestrationRun) -> Result<String> {
        if self.plan.dry_run {
            return Ok("skipped (dry run)".to_string());
        }

        let processor = self.env.processor(conns);
        for collection in &self.plan.collections {
            if run
                .collection_mut(collection)
                .map(|r| r.completed)
                .unwrap_or(false)
            {
                continue;
            }

            loop {
                let offset = run
                    .collection_mut(collection)
                    .and_then(|r| r.next_resume_token)
                    .unwrap_or(0);
                let result = processor.run(&self.plan.job(collection, offset)).await?;
                let stop = result.stop_reason;
                let made_progress = result.processed_batches > 0;
                let resume_at = result.next_resume_token.unwrap_or(offset);
                let failure = result
                    .errors
                    .last()
                    .filter(|_| result.is_fatal())
                    .map(|e| e.message.clone());

                match run.collection_mut(collection) {
                    Some(merged) => merged.absorb(result),
                    None => run.collections.push(result),
                }

                match stop {
                    StopReason::Completed => break,
                    StopReason::Cancelled => return Err(MigrateError::Cancelled),
                    StopReason::Fatal => {
                        return Err(MigrateError::BatchFailed {
                            collection: collection.clone(),
                            offset: resume_at,
                            message: failure.unwrap_or_default(),
                        })
                    }
                    StopReason::TimeBudget | StopReason::BatchLimit if !made_progress => {
                        return Err(MigrateError::BatchFailed {
                            collection: collection.clone(),
                            offset,
                            message: format!("invocation stopped ({}) without progress", stop),
                        })
                    }
                    StopReason::TimeBudget | StopReason::BatchLimit => {
                        info!("{}: pausing ({}), resuming in a new invocation", collection, stop);
                    }
                }
            }
        }

        let mut copied = 0;
        for collection in &self.plan.collections {
            let timeout = self.env.settings.transfer.socket_timeout;
            let source = with_timeout(timeout, conns.source.count(collection))
                .await
                .map_err(|e| MigrateError::store(format!("count {}", collection), e))?;
            let target = with_timeout(timeout, conns.target.count(collection))
                .await
                .map_err(|e| MigrateError::store(format!("count {}", collection), e))?;
            if source != target {
                return Err(MigrateError::VerificationMismatch(format!(
                    "{}: source has {} documents, target has {}",
                    collection, source, target
                )));
            }
            copied += target;
        }

        Ok(format!(
            "{} collection(s) migrated, {} document(s) verified",
            self.plan.collections.len(),
            copied
        ))
    }

    async fn cut_over(&self, conns: &Connections) -> Result<String> {
        if self.plan.dry_run {
            return Ok("skipped (dry run)".to_string());
        }
        let credentials = self.env.resolve(&conns.target_ref).await?;
        let active = self
            .env
            .config_updater
            .point_to(&conns.target_ref, &credentials)
            .await?;
        Ok(format!("application now uses {}", active.active_store))
    }
}

#[cfg(test)]
mod tests;
