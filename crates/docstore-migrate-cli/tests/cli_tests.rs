//! CLI integration tests for docstore-migrate.
//!
//! These tests cover argument parsing, exit codes for error conditions and
//! end-to-end runs against directory-backed stores.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Get a command for the docstore-migrate binary.
fn cmd() -> Command {
    Command::cargo_bin("docstore-migrate").unwrap()
}

/// A workspace with a config file and a seeded source store.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(documents: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("data");
        let legacy = data.join("legacy-cluster");
        std::fs::create_dir_all(&legacy).unwrap();

        let mut maps = std::fs::File::create(legacy.join("maps.jsonl")).unwrap();
        for i in 0..documents {
            writeln!(maps, r#"{{"_id":"map-{:03}","sheet":{}}}"#, i, i).unwrap();
        }

        let config = format!(
            r#"
credentials:
  legacy: {{ host: legacy-cluster, username: maps, password: s3cret }}
  atlas: {{ host: atlas-cluster, username: maps, password: s3cret }}
connector:
  root: {:?}
migration:
  source: legacy
  target: atlas
  collections: [maps]
  batch_size: 10
  write_retry: {{ base_delay_ms: 0, max_delay_ms: 0 }}
  step_retry: {{ delay_ms: 0 }}
app_config:
  path: {:?}
"#,
            data.to_str().unwrap(),
            dir.path().join("active-store.json").to_str().unwrap(),
        );
        std::fs::write(dir.path().join("config.yaml"), config).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn cmd(&self) -> Command {
        let mut cmd = cmd();
        cmd.arg("--config").arg(self.path("config.yaml"));
        cmd
    }

    fn target_documents(&self) -> usize {
        read_lines(&self.path("data/atlas-cluster/maps.jsonl"))
    }
}

fn read_lines(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().filter(|l| !l.trim().is_empty()).count())
        .unwrap_or(0)
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("verify"))
        .stdout(predicate::str::contains("rollback"))
        .stdout(predicate::str::contains("invoke"));
}

#[test]
fn test_migrate_subcommand_help() {
    cmd()
        .args(["migrate", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--start-offset"))
        .stdout(predicate::str::contains("--max-batches"))
        .stdout(predicate::str::contains("--dry-run"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("docstore-migrate"));
}

#[test]
fn test_global_flag_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("[default: config.yaml]"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("[default: info]"));
}

// =============================================================================
// Error Exit Code Tests
// =============================================================================

#[test]
fn test_missing_subcommand_fails() {
    cmd().assert().failure();
}

#[test]
fn test_missing_config_file_exit_code() {
    cmd()
        .args(["--config", "/nonexistent/config.yaml", "status"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("IO error"));
}

#[test]
fn test_invalid_yaml_exit_code() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "migration: [").unwrap();

    cmd()
        .arg("--config")
        .arg(file.path())
        .arg("status")
        .assert()
        .code(1);
}

#[test]
fn test_unknown_credential_reference_is_a_config_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "credentials:\n  legacy: {{ host: legacy-cluster }}\nmigration:\n  source: legacy\n  target: atlas"
    )
    .unwrap();

    cmd()
        .arg("--config")
        .arg(file.path())
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("unknown credential 'atlas'"));
}

#[test]
fn test_rollback_without_force_is_refused() {
    let ws = Workspace::new(5);
    ws.cmd()
        .arg("rollback")
        .assert()
        .code(6)
        .stderr(predicate::str::contains("Rollback refused"));
    assert!(!ws.path("active-store.json").exists());
}

#[test]
fn test_unknown_invocation_kind() {
    let ws = Workspace::new(5);
    std::fs::write(ws.path("payload.json"), "{}").unwrap();
    ws.cmd()
        .args(["invoke", "--kind", "drop", "--payload"])
        .arg(ws.path("payload.json"))
        .assert()
        .code(4);
}

// =============================================================================
// End-to-End Tests
// =============================================================================

#[test]
fn test_run_migrates_and_cuts_over() {
    let ws = Workspace::new(25);
    ws.cmd()
        .args(["--output-json", "run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\": true"));

    assert_eq!(ws.target_documents(), 25);
    let active = std::fs::read_to_string(ws.path("active-store.json")).unwrap();
    assert!(active.contains("\"activeStore\": \"atlas\""));
    assert!(!active.contains("s3cret"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let ws = Workspace::new(25);
    ws.cmd()
        .args(["run", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run completed!"));

    assert_eq!(ws.target_documents(), 0);
    assert!(!ws.path("active-store.json").exists());
}

#[test]
fn test_migrate_resumes_from_state_file() {
    let ws = Workspace::new(25);
    let state = ws.path("state.json");

    ws.cmd()
        .arg("--state-file")
        .arg(&state)
        .args(["--output-json", "migrate", "maps", "--max-batches", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"nextResumeToken\": 10"));
    assert_eq!(ws.target_documents(), 10);

    ws.cmd()
        .arg("--state-file")
        .arg(&state)
        .args(["--output-json", "migrate", "maps"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"startOffset\": 10"))
        .stdout(predicate::str::contains("\"completed\": true"));
    assert_eq!(ws.target_documents(), 25);

    ws.cmd()
        .arg("--state-file")
        .arg(&state)
        .args(["migrate", "maps"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already migrated"));
}

#[test]
fn test_migrate_reset_starts_over() {
    let ws = Workspace::new(15);
    let state = ws.path("state.json");

    ws.cmd()
        .arg("--state-file")
        .arg(&state)
        .args(["migrate", "maps"])
        .assert()
        .success();
    assert_eq!(ws.target_documents(), 15);

    ws.cmd()
        .arg("--state-file")
        .arg(&state)
        .args(["--output-json", "migrate", "maps", "--reset"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"startOffset\": 0"))
        .stdout(predicate::str::contains("\"completed\": true"));
    assert_eq!(ws.target_documents(), 15);
}

#[test]
fn test_migrate_reset_needs_state_file() {
    let ws = Workspace::new(5);
    ws.cmd()
        .args(["migrate", "maps", "--reset"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--reset requires --state-file"));
    assert_eq!(ws.target_documents(), 0);
}

#[test]
fn test_verify_after_run() {
    let ws = Workspace::new(12);
    ws.cmd().arg("run").assert().success();

    ws.cmd()
        .args(["--output-json", "verify"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"status\": \"match\""));
}

#[test]
fn test_verify_mismatch_exit_code() {
    let ws = Workspace::new(12);
    ws.cmd().args(["migrate", "maps", "--max-batches", "1"]).assert().success();

    ws.cmd()
        .arg("verify")
        .assert()
        .code(5)
        .stdout(predicate::str::contains("Mismatch"));
}

#[test]
fn test_forced_rollback_points_at_source() {
    let ws = Workspace::new(5);
    ws.cmd().arg("run").assert().success();

    ws.cmd()
        .args(["rollback", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("application now uses legacy"));
    let active = std::fs::read_to_string(ws.path("active-store.json")).unwrap();
    assert!(active.contains("\"activeStore\": \"legacy\""));
}

#[test]
fn test_invoke_status_payload() {
    let ws = Workspace::new(20);
    std::fs::write(
        ws.path("payload.json"),
        r#"{"sourceCredentialRef":"legacy","targetCredentialRef":"atlas","collectionName":"maps"}"#,
    )
    .unwrap();

    ws.cmd()
        .args(["invoke", "--kind", "status", "--payload"])
        .arg(ws.path("payload.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"statusCode\": 200"))
        .stdout(predicate::str::contains("\"sourceCount\": 20"))
        .stdout(predicate::str::contains("\"progressPercent\": 0.0"));
}
