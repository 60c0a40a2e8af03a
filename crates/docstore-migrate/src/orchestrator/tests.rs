use super::*;
use crate::cutover::JsonFileConfigUpdater;
use crate::error::StoreError;
use crate::progress::{Heartbeat, ProgressError, ProgressSink};
use crate::session::testing::{fixture, Fixture};
use crate::store::{doc, Document, MemoryStore};
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn sheets(prefix: &str, n: usize) -> Vec<Document> {
    (0..n)
        .map(|i| doc(format!("{}-{:04}", prefix, i), &[("sheet", json!(i))]))
        .collect()
}

fn plan(collections: &[&str]) -> RunPlan {
    RunPlan {
        source: "legacy".to_string(),
        target: "atlas".to_string(),
        collections: collections.iter().map(|c| c.to_string()).collect(),
        batch_size: 100,
        time_budget: Duration::from_secs(60),
        max_batches: None,
        dry_run: false,
        auto_rollback: false,
    }
}

async fn seeded(dir: &TempDir) -> (Fixture, PathBuf) {
    let app_config = dir.path().join("active-store.json");
    let fx = fixture(&app_config);
    fx.legacy.seed("maps", sheets("map", 250)).await.unwrap();
    fx.legacy.seed("layers", sheets("layer", 40)).await.unwrap();
    (fx, app_config)
}

async fn active_store(path: &PathBuf) -> Option<String> {
    JsonFileConfigUpdater::new(path)
        .read()
        .await
        .unwrap()
        .map(|a| a.active_store)
}

#[tokio::test]
async fn test_full_run_migrates_and_cuts_over() {
    let dir = TempDir::new().unwrap();
    let (fx, app_config) = seeded(&dir).await;

    let run = Orchestrator::new(fx.env.clone(), plan(&["maps", "layers"]))
        .with_config_hash("abc123")
        .run()
        .await
        .unwrap();

    assert!(run.success, "{:?}", run.error);
    assert_eq!(run.phase, RunPhase::Done);
    assert!(!run.rollback_executed);
    assert_eq!(run.config_hash.as_deref(), Some("abc123"));
    for step in &run.steps {
        assert_eq!(step.status, StepStatus::Success);
        assert_eq!(step.attempt, 1);
    }
    assert_eq!(run.prevalidation.len(), 2);
    assert_eq!(run.collections.len(), 2);
    assert!(run.collections.iter().all(|c| c.completed));
    assert_eq!(fx.atlas.documents("maps").await.len(), 250);
    assert_eq!(fx.atlas.documents("layers").await.len(), 40);
    assert_eq!(active_store(&app_config).await.as_deref(), Some("atlas"));
    assert!(fx.legacy.is_closed());
    assert!(fx.atlas.is_closed());
    assert!(run.failure().is_none());
}

#[tokio::test]
async fn test_orchestrator_owns_the_resume_loop() {
    let dir = TempDir::new().unwrap();
    let (fx, _) = seeded(&dir).await;
    let mut plan = plan(&["maps", "layers"]);
    plan.max_batches = Some(1);

    let run = Orchestrator::new(fx.env.clone(), plan).run().await.unwrap();

    assert!(run.success);
    let maps = &run.collections[0];
    assert_eq!(maps.collection, "maps");
    assert_eq!(maps.invocations, 3);
    assert_eq!(maps.processed_documents, 250);
    assert_eq!(maps.next_resume_token, None);
    assert_eq!(run.collections[1].invocations, 1);
    assert_eq!(fx.atlas.documents("maps").await, fx.legacy.documents("maps").await);
}

#[tokio::test]
async fn test_dry_run_has_no_side_effects() {
    let dir = TempDir::new().unwrap();
    let (fx, app_config) = seeded(&dir).await;
    let mut plan = plan(&["maps"]);
    plan.dry_run = true;

    let run = Orchestrator::new(fx.env.clone(), plan).run().await.unwrap();

    assert!(run.success);
    assert!(run.dry_run);
    assert_eq!(run.prevalidation[0].old_count, 250);
    let migration = run.step(StepName::Migration).unwrap();
    assert_eq!(migration.status, StepStatus::Success);
    assert_eq!(migration.detail.as_deref(), Some("skipped (dry run)"));
    assert!(run.collections.is_empty());
    assert_eq!(fx.atlas.insert_calls(), 0);
    assert_eq!(active_store(&app_config).await, None);
}

#[tokio::test]
async fn test_prevalidation_failure_blocks_migration() {
    let dir = TempDir::new().unwrap();
    let (fx, app_config) = seeded(&dir).await;
    fx.atlas.seed("layers", sheets("layer", 60)).await.unwrap();

    let run = Orchestrator::new(fx.env.clone(), plan(&["maps", "layers"]))
        .run()
        .await
        .unwrap();

    assert!(!run.success);
    assert_eq!(run.phase, RunPhase::Failed);
    let pre = run.step(StepName::PreValidation).unwrap();
    assert_eq!(pre.status, StepStatus::Failed);
    assert_eq!(pre.attempt, 3);
    let migration = run.step(StepName::Migration).unwrap();
    assert_eq!(migration.status, StepStatus::Pending);
    assert_eq!(migration.attempt, 0);
    assert!(run.error.as_deref().unwrap().contains("layers"));
    assert_eq!(fx.atlas.insert_calls(), 0);
    assert_eq!(active_store(&app_config).await, None);
    assert!(matches!(
        run.failure(),
        Some(MigrateError::StepFailed { attempts: 3, .. })
    ));
}

/// Queues write faults on the target after the first heartbeat, so the
/// failure lands mid-collection.
struct FaultAfterFirstBatch {
    target: Arc<MemoryStore>,
    faults: usize,
    fired: AtomicBool,
}

#[async_trait]
impl ProgressSink for FaultAfterFirstBatch {
    async fn heartbeat(&self, _beat: &Heartbeat) -> std::result::Result<(), ProgressError> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            for _ in 0..self.faults {
                self.target
                    .fail_next_insert(StoreError::Connection("connection reset".into()))
                    .await;
            }
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_migration_retry_resumes_from_failing_offset() {
    let dir = TempDir::new().unwrap();
    let (fx, app_config) = seeded(&dir).await;
    let mut env = fx.env.clone().with_progress(Arc::new(FaultAfterFirstBatch {
        target: fx.atlas.clone(),
        faults: 3,
        fired: AtomicBool::new(false),
    }));
    env.settings.transfer.progress_interval = 1;

    let run = Orchestrator::new(env, plan(&["maps"])).run().await.unwrap();

    assert!(run.success, "{:?}", run.error);
    let migration = run.step(StepName::Migration).unwrap();
    assert_eq!(migration.attempt, 2);
    let maps = &run.collections[0];
    assert_eq!(maps.invocations, 2);
    assert_eq!(maps.processed_documents, 250);
    let fatal: Vec<_> = maps.errors_of(crate::transfer::BatchClass::Fatal).collect();
    assert_eq!(fatal.len(), 1);
    assert_eq!(fatal[0].offset, 100);
    // 3 batches plus 3 failed attempts at offset 100; nothing rewritten.
    assert_eq!(fx.atlas.insert_calls(), 6);
    assert_eq!(fx.atlas.documents("maps").await.len(), 250);
    assert_eq!(active_store(&app_config).await.as_deref(), Some("atlas"));
}

#[tokio::test]
async fn test_exhausted_migration_step_never_cuts_over() {
    let dir = TempDir::new().unwrap();
    let (fx, app_config) = seeded(&dir).await;
    for _ in 0..9 {
        fx.atlas
            .fail_next_insert(StoreError::Transient("primary stepped down".into()))
            .await;
    }
    let mut plan = plan(&["maps"]);
    plan.auto_rollback = true;

    let run = Orchestrator::new(fx.env.clone(), plan).run().await.unwrap();

    assert!(!run.success);
    assert!(!run.rollback_executed);
    assert_eq!(run.step(StepName::Migration).unwrap().status, StepStatus::Failed);
    assert_eq!(run.step(StepName::Migration).unwrap().attempt, 3);
    assert_eq!(run.step(StepName::ConfigUpdate).unwrap().attempt, 0);
    assert_eq!(run.collections[0].next_resume_token, Some(0));
    assert_eq!(active_store(&app_config).await, None);
    assert!(fx.atlas.is_closed());
    match run.failure() {
        Some(MigrateError::StepFailed { step, attempts, .. }) => {
            assert_eq!(step, "Migration");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected failure: {:?}", other),
    }
}

#[tokio::test]
async fn test_cancelled_run_stops_without_retrying() {
    let dir = TempDir::new().unwrap();
    let (fx, _) = seeded(&dir).await;
    let env = fx.env.clone();
    env.cancel.cancel();

    let run = Orchestrator::new(env, plan(&["maps"])).run().await.unwrap();

    assert!(!run.success);
    assert!(run.cancelled);
    assert_eq!(run.step(StepName::PreValidation).unwrap().attempt, 1);
    assert!(matches!(run.failure(), Some(MigrateError::Cancelled)));
}

#[tokio::test]
async fn test_unknown_store_is_an_error() {
    let dir = TempDir::new().unwrap();
    let (fx, _) = seeded(&dir).await;
    let mut plan = plan(&["maps"]);
    plan.target = "nowhere".to_string();

    let err = Orchestrator::new(fx.env.clone(), plan).run().await.unwrap_err();
    assert!(matches!(err, MigrateError::Credentials(_)));
    assert!(fx.legacy.is_closed());
}

#[test]
fn test_run_json_shape() {
    let run = OrchestrationRun::new(false, None);
    let value = serde_json::to_value(&run).unwrap();
    assert_eq!(value["steps"][0]["stepName"], "PreValidation");
    assert_eq!(value["steps"][0]["status"], "pending");
    assert_eq!(value["rollbackExecuted"], false);
    assert!(value.get("configHash").is_none());
}
