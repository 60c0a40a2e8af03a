//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::credentials::Credentials;
use crate::retry::RetryPolicy;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Named credential references (the secret store).
    #[serde(default)]
    pub credentials: BTreeMap<String, Credentials>,

    /// How stores are opened.
    #[serde(default)]
    pub connector: ConnectorConfig,

    /// Migration behavior configuration.
    pub migration: MigrationConfig,

    /// Where the application's active connection configuration lives.
    #[serde(default)]
    pub app_config: AppConfigTarget,
}

/// Store connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Root directory holding one sub-directory per store host.
    #[serde(default = "default_data_root")]
    pub root: PathBuf,

    /// Refuse credentials that do not enable TLS (default: false).
    #[serde(default)]
    pub require_tls: bool,

    /// Connection establishment timeout in seconds (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Per-operation timeout in seconds (default: 30).
    #[serde(default = "default_socket_timeout_secs")]
    pub socket_timeout_secs: u64,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            root: default_data_root(),
            require_tls: false,
            connect_timeout_secs: default_connect_timeout_secs(),
            socket_timeout_secs: default_socket_timeout_secs(),
        }
    }
}

impl ConnectorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Credential reference of the store being migrated from.
    pub source: String,

    /// Credential reference of the store being migrated to.
    pub target: String,

    /// Collections to migrate, in order.
    #[serde(default)]
    pub collections: Vec<String>,

    /// Documents per batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Wall-clock ceiling for one invocation in milliseconds (default: 14 minutes).
    #[serde(default = "default_time_budget_ms")]
    pub time_budget_ms: u64,

    /// Time reserved at the end of the budget for returning the resume token
    /// (default: 30 seconds).
    #[serde(default = "default_safety_margin_ms")]
    pub safety_margin_ms: u64,

    /// Cap on batches per invocation. Unlimited if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batches: Option<u64>,

    /// Emit a heartbeat every N batches (default: 10).
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Count only, never write (default: false).
    #[serde(default)]
    pub dry_run: bool,

    /// Accepted for compatibility; rollback is always a manual operation.
    #[serde(default)]
    pub auto_rollback: bool,

    /// Batch write retry settings.
    #[serde(default)]
    pub write_retry: WriteRetryConfig,

    /// Orchestrator step retry settings.
    #[serde(default)]
    pub step_retry: StepRetryConfig,
}

impl MigrationConfig {
    pub fn time_budget(&self) -> Duration {
        Duration::from_millis(self.time_budget_ms)
    }

    pub fn safety_margin(&self) -> Duration {
        Duration::from_millis(self.safety_margin_ms)
    }

    pub fn write_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(
            self.write_retry.max_attempts,
            Duration::from_millis(self.write_retry.base_delay_ms),
            Duration::from_millis(self.write_retry.max_delay_ms),
        )
    }

    pub fn step_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(
            self.step_retry.max_attempts,
            Duration::from_millis(self.step_retry.delay_ms),
        )
    }
}

/// Exponential backoff for batch writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRetryConfig {
    /// Attempts per batch, including the first (default: 3).
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    /// First retry delay in milliseconds (default: 1000).
    #[serde(default = "default_write_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Delay cap in milliseconds (default: 10000).
    #[serde(default = "default_write_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for WriteRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            base_delay_ms: default_write_base_delay_ms(),
            max_delay_ms: default_write_max_delay_ms(),
        }
    }
}

/// Linear backoff for orchestrator steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRetryConfig {
    /// Attempts per step (default: 3).
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    /// Delay unit in milliseconds; attempt N waits N times this (default: 2000).
    #[serde(default = "default_step_delay_ms")]
    pub delay_ms: u64,
}

impl Default for StepRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            delay_ms: default_step_delay_ms(),
        }
    }
}

/// Location of the application's persisted connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfigTarget {
    /// JSON file rewritten on cut-over and rollback.
    #[serde(default = "default_app_config_path")]
    pub path: PathBuf,
}

impl Default for AppConfigTarget {
    fn default() -> Self {
        Self {
            path: default_app_config_path(),
        }
    }
}

// Default value functions for serde
fn default_data_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_socket_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_batch_size() -> usize {
    1000
}

fn default_time_budget_ms() -> u64 {
    14 * 60 * 1000
}

fn default_safety_margin_ms() -> u64 {
    30_000
}

fn default_progress_interval() -> u64 {
    10
}

fn default_attempts() -> u32 {
    3
}

fn default_write_base_delay_ms() -> u64 {
    1000
}

fn default_write_max_delay_ms() -> u64 {
    10_000
}

fn default_step_delay_ms() -> u64 {
    2000
}

fn default_app_config_path() -> PathBuf {
    PathBuf::from("./active-store.json")
}
