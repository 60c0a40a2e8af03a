//! # docstore-migrate
//!
//! Resumable, time-bounded batch migration between JSON document stores.
//!
//! The engine copies large collections from a source store to a target store
//! under a hard wall-clock budget per invocation, with:
//!
//! - **Resume tokens**: every invocation returns the offset the next one must
//!   start from
//! - **Unordered at-least-once writes** with exponential-backoff retry and
//!   duplicate-key batches treated as already migrated
//! - **Verification** of counts, indexes and document shape, plus a manual,
//!   force-only rollback of the application's connection configuration
//! - **Orchestration** of pre-validation, migration and cut-over with per-step
//!   retry
//!
//! ## Example
//!
//! ```rust,no_run
//! use docstore_migrate::{Config, Environment, Orchestrator, RunPlan};
//!
//! #[tokio::main]
//! async fn main() -> docstore_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let env = Environment::from_config(&config);
//!     let run = Orchestrator::new(env, RunPlan::from_config(&config.migration))
//!         .with_config_hash(config.hash())
//!         .run()
//!         .await?;
//!     println!("success: {}", run.success);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod cursor;
pub mod cutover;
pub mod error;
pub mod handler;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod session;
pub mod state;
pub mod store;
pub mod transfer;
pub mod verify;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig};
pub use credentials::{ConfigCredentialProvider, CredentialProvider, Credentials};
pub use cursor::BatchCursor;
pub use cutover::{ActiveStore, ConfigUpdater, JsonFileConfigUpdater};
pub use error::{MigrateError, Result, StoreError};
pub use handler::{Handler, HandlerDefaults, InvocationKind, InvocationResponse};
pub use orchestrator::{OrchestrationRun, Orchestrator, RunPlan, StepName, StepStatus};
pub use progress::{Heartbeat, LogProgressSink, NoopProgressSink, ProgressError, ProgressSink};
pub use retry::RetryPolicy;
pub use session::{Connections, EngineSettings, Environment};
pub use state::ResumeState;
pub use store::{Document, DocumentStore, FileStore, MemoryStore, StoreConnector};
pub use transfer::{
    BatchClass, BatchOutcome, BatchProcessor, MigrationJob, MigrationResult, StopReason,
    TransferConfig,
};
pub use verify::{VerificationController, VerificationReport, VerifyStatus};
