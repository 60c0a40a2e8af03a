//! Function-invocation entry points.
//!
//! Each entry point takes a JSON payload, opens both stores for the duration
//! of the call and answers with an [`InvocationResponse`]: status 200 and the
//! result body on success, 500 and `{error, stack?}` on failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{MigrateError, Result, StoreError};
use crate::session::Environment;
use crate::transfer::{MigrationJob, MigrationResult};
use crate::verify::{CollectionStatus, RollbackReport, StoreStatus, VerificationReport};

/// Parameters of one time-bounded copy invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigratePayload {
    #[serde(default)]
    pub source_credential_ref: String,
    #[serde(default)]
    pub target_credential_ref: String,
    #[serde(default)]
    pub collection_name: String,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub start_offset: Option<u64>,
    #[serde(default)]
    pub max_batches: Option<u64>,
    /// Takes precedence over `start_offset`.
    #[serde(default)]
    pub resume_token: Option<u64>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    #[serde(default)]
    pub source_credential_ref: String,
    #[serde(default)]
    pub target_credential_ref: String,
    #[serde(default)]
    pub collection_name: String,
}

/// Progress of one collection as seen by a polling dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub source_count: u64,
    pub target_count: u64,
    pub migrated_count: u64,
    pub remaining_count: u64,
    pub progress_percent: f64,
    pub completed: bool,
}

impl StatusResponse {
    pub fn from_counts(source_count: u64, target_count: u64) -> Self {
        let migrated_count = target_count.min(source_count);
        let progress_percent = if source_count == 0 {
            100.0
        } else {
            (migrated_count as f64 / source_count as f64 * 10_000.0).round() / 100.0
        };
        Self {
            source_count,
            target_count,
            migrated_count,
            remaining_count: source_count - migrated_count,
            progress_percent,
            completed: target_count >= source_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationOperation {
    Verify,
    Rollback,
    Status,
}

impl fmt::Display for VerificationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerificationOperation::Verify => "verify",
            VerificationOperation::Rollback => "rollback",
            VerificationOperation::Status => "status",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationPayload {
    #[serde(default)]
    pub collections: Vec<String>,
    pub operation: VerificationOperation,
    #[serde(default)]
    pub force: bool,
    /// Defaults to the configured source.
    #[serde(default)]
    pub source_credential_ref: Option<String>,
    /// Defaults to the configured target.
    #[serde(default)]
    pub target_credential_ref: Option<String>,
}

/// Per-operation result list.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OperationResults {
    Verify(Vec<VerificationReport>),
    Status(Vec<CollectionStatus>),
    Rollback(Vec<RollbackReport>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub success: bool,
    pub operation: VerificationOperation,
    pub results: OperationResults,
    /// Reachability of both stores (status only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stores: Option<Vec<StoreStatus>>,
}

/// Which entry point an invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    Migrate,
    Status,
    Verify,
}

impl FromStr for InvocationKind {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "migrate" => Ok(InvocationKind::Migrate),
            "status" => Ok(InvocationKind::Status),
            "verify" | "verification" => Ok(InvocationKind::Verify),
            other => Err(MigrateError::InvalidJob(format!(
                "unknown invocation kind '{}'",
                other
            ))),
        }
    }
}

/// HTTP-style response mirrored as the function-invocation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub status_code: u16,
    pub body: Value,
}

impl InvocationResponse {
    pub fn ok<T: Serialize>(body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self {
                status_code: 200,
                body,
            },
            Err(e) => Self::error(&MigrateError::from(e)),
        }
    }

    /// 500 with the error message and, when there is one, its cause chain.
    pub fn error(err: &MigrateError) -> Self {
        let mut body = serde_json::Map::new();
        body.insert("error".to_string(), Value::String(err.to_string()));
        let chain = err.cause_chain();
        if !chain.is_empty() {
            body.insert("stack".to_string(), Value::String(chain.join("\n")));
        }
        Self {
            status_code: 500,
            body: Value::Object(body),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }
}

/// Defaults applied to payload fields the caller leaves out.
#[derive(Debug, Clone)]
pub struct HandlerDefaults {
    pub source: String,
    pub target: String,
    pub batch_size: usize,
    pub time_budget: Duration,
}

impl HandlerDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source: config.migration.source.clone(),
            target: config.migration.target.clone(),
            batch_size: config.migration.batch_size,
            time_budget: config.migration.time_budget(),
        }
    }
}

/// Dispatches invocation payloads to the engine.
pub struct Handler {
    env: Environment,
    defaults: HandlerDefaults,
}

impl Handler {
    pub fn new(env: Environment, defaults: HandlerDefaults) -> Self {
        Self { env, defaults }
    }

    /// Decode `payload` for `kind`, run it and wrap the outcome.
    pub async fn invoke(&self, kind: InvocationKind, payload: Value) -> InvocationResponse {
        match self.dispatch(kind, payload).await {
            Ok(response) => response,
            Err(e) => {
                error!("{:?} invocation failed: {}", kind, e);
                InvocationResponse::error(&e)
            }
        }
    }

    async fn dispatch(&self, kind: InvocationKind, payload: Value) -> Result<InvocationResponse> {
        Ok(match kind {
            InvocationKind::Migrate => InvocationResponse::ok(&self.migrate(decode(payload)?).await?),
            InvocationKind::Status => InvocationResponse::ok(&self.status(decode(payload)?).await?),
            InvocationKind::Verify => {
                InvocationResponse::ok(&self.verification(decode(payload)?).await?)
            }
        })
    }

    /// One time-bounded copy of one collection.
    pub async fn migrate(&self, payload: MigratePayload) -> Result<MigrationResult> {
        require("sourceCredentialRef", &payload.source_credential_ref)?;
        require("targetCredentialRef", &payload.target_credential_ref)?;
        require("collectionName", &payload.collection_name)?;

        let job = MigrationJob::new(payload.collection_name.as_str())
            .with_batch_size(payload.batch_size.unwrap_or(self.defaults.batch_size))
            .with_start_offset(payload.resume_token.or(payload.start_offset).unwrap_or(0))
            .with_max_batches(payload.max_batches)
            .with_time_budget(
                payload
                    .time_budget_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.defaults.time_budget),
            )
            .with_dry_run(payload.dry_run);
        job.validate()?;

        info!(
            "Migrate invocation: {} from offset {} ({} -> {})",
            job.collection_name,
            job.start_offset,
            payload.source_credential_ref,
            payload.target_credential_ref
        );
        self.env
            .scoped(
                &payload.source_credential_ref,
                &payload.target_credential_ref,
                |conns| {
                    let processor = self.env.processor(&conns);
                    async move { processor.run(&job).await }
                },
            )
            .await
    }

    /// Counts for one collection in both stores.
    pub async fn status(&self, payload: StatusPayload) -> Result<StatusResponse> {
        require("sourceCredentialRef", &payload.source_credential_ref)?;
        require("targetCredentialRef", &payload.target_credential_ref)?;
        require("collectionName", &payload.collection_name)?;

        let collections = vec![payload.collection_name.clone()];
        let report = self
            .env
            .scoped(
                &payload.source_credential_ref,
                &payload.target_credential_ref,
                |conns| {
                    let verifier = self.env.verifier(&conns);
                    async move { Ok(verifier.status(&collections).await) }
                },
            )
            .await?;

        let counts = report.collections.first().cloned().unwrap_or(CollectionStatus {
            collection: payload.collection_name.clone(),
            source_count: None,
            target_count: None,
        });
        match (counts.source_count, counts.target_count) {
            (Some(source), Some(target)) => Ok(StatusResponse::from_counts(source, target)),
            _ => {
                let reason = [&report.source, &report.target]
                    .iter()
                    .filter_map(|s| s.error.as_ref().map(|e| format!("{}: {}", s.store, e)))
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(MigrateError::store(
                    format!("status {}", payload.collection_name),
                    StoreError::Connection(if reason.is_empty() {
                        "count unavailable".to_string()
                    } else {
                        reason
                    }),
                ))
            }
        }
    }

    /// verify, status or rollback over a set of collections.
    pub async fn verification(&self, payload: VerificationPayload) -> Result<VerificationResponse> {
        let source = payload
            .source_credential_ref
            .clone()
            .unwrap_or_else(|| self.defaults.source.clone());
        let target = payload
            .target_credential_ref
            .clone()
            .unwrap_or_else(|| self.defaults.target.clone());
        if payload.operation != VerificationOperation::Rollback && payload.collections.is_empty() {
            return Err(MigrateError::InvalidJob("collections must not be empty".into()));
        }
        if payload.operation == VerificationOperation::Rollback && !payload.force {
            return Err(MigrateError::RollbackRefused);
        }

        info!("{} invocation for {} collection(s)", payload.operation, payload.collections.len());
        self.env
            .scoped(&source, &target, |conns| {
                let verifier = self.env.verifier(&conns);
                let operation = payload.operation;
                let collections = payload.collections.clone();
                let force = payload.force;
                async move {
                    match operation {
                        VerificationOperation::Verify => {
                            let reports = verifier.verify(&collections).await;
                            Ok(VerificationResponse {
                                success: reports.iter().all(|r| r.is_match()),
                                operation,
                                results: OperationResults::Verify(reports),
                                stores: None,
                            })
                        }
                        VerificationOperation::Status => {
                            let report = verifier.status(&collections).await;
                            Ok(VerificationResponse {
                                success: report.all_online(),
                                operation,
                                stores: Some(vec![report.source.clone(), report.target.clone()]),
                                results: OperationResults::Status(report.collections),
                            })
                        }
                        VerificationOperation::Rollback => {
                            verifier
                                .rollback(force)
                                .await
                                .map(|report| VerificationResponse {
                                    success: true,
                                    operation,
                                    results: OperationResults::Rollback(vec![report]),
                                    stores: None,
                                })
                        }
                    }
                }
            })
            .await
    }
}

fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| MigrateError::InvalidJob(e.to_string()))
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MigrateError::InvalidJob(format!("{} is required", field)));
    }
    Ok(())
}
