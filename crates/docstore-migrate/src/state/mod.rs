//! File-based resume tokens for callers that schedule repeated invocations.
//!
//! The engine itself never persists a resume token; this is the scheduler's
//! side of the contract, used by the CLI's `migrate --state-file`.

use crate::error::{MigrateError, Result};
use crate::transfer::MigrationResult;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Resume tokens per collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeState {
    /// SHA256 hash of the configuration the tokens were produced under.
    pub config_hash: String,

    /// Per-collection progress.
    pub collections: BTreeMap<String, CollectionState>,

    /// HMAC-SHA256 over the serialized state (excluding this field), keyed
    /// by `config_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

/// Progress of one collection across invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionState {
    /// Offset the next invocation starts from; `None` once completed.
    pub next_resume_token: Option<u64>,

    /// Documents processed over all recorded invocations.
    pub processed_documents: u64,

    pub completed: bool,

    pub updated_at: DateTime<Utc>,
}

impl ResumeState {
    pub fn new(config_hash: impl Into<String>) -> Self {
        Self {
            config_hash: config_hash.into(),
            collections: BTreeMap::new(),
            hmac: None,
        }
    }

    fn compute_hmac(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.hmac = None;

        let content = serde_json::to_string(&unsigned)
            .map_err(|e| MigrateError::State(format!("Failed to serialize state for HMAC: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load and check the signature.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&content)
            .map_err(|e| MigrateError::State(format!("Unreadable state file: {}", e)))?;

        match &state.hmac {
            Some(stored) if *stored == state.compute_hmac()? => Ok(state),
            Some(_) => Err(MigrateError::State(
                "integrity check failed: HMAC mismatch (possible tampering)".to_string(),
            )),
            None => Err(MigrateError::State(
                "state file is not signed".to_string(),
            )),
        }
    }

    /// Load `path` if it exists, otherwise start empty.
    ///
    /// A state file written under a different configuration is refused with
    /// [`MigrateError::ConfigChanged`] unless `force`, in which case it is
    /// discarded.
    pub fn load_or_new<P: AsRef<Path>>(path: P, config_hash: &str, force: bool) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new(config_hash));
        }
        let state = Self::load(path)?;
        match state.validate_config(config_hash) {
            Ok(()) => {
                debug!("Loaded resume state from {:?}", path);
                Ok(state)
            }
            Err(_) if force => {
                warn!("Configuration changed since {:?} was written, starting fresh", path);
                Ok(Self::new(config_hash))
            }
            Err(e) => Err(e),
        }
    }

    /// Sign and write atomically (temp file, then rename).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.hmac = Some(self.compute_hmac()?);

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| MigrateError::State(format!("Failed to serialize state: {}", e)))?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Validate that the config hash matches for resume.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(MigrateError::ConfigChanged);
        }
        Ok(())
    }

    /// Offset the next invocation for `collection` should start from.
    pub fn start_offset(&self, collection: &str) -> u64 {
        self.collections
            .get(collection)
            .and_then(|c| c.next_resume_token)
            .unwrap_or(0)
    }

    pub fn is_completed(&self, collection: &str) -> bool {
        self.collections
            .get(collection)
            .map(|c| c.completed)
            .unwrap_or(false)
    }

    /// Fold one invocation's result into the collection's entry.
    pub fn record(&mut self, result: &MigrationResult) {
        let entry = self
            .collections
            .entry(result.collection.clone())
            .or_insert_with(|| CollectionState {
                next_resume_token: Some(0),
                processed_documents: 0,
                completed: false,
                updated_at: Utc::now(),
            });
        entry.next_resume_token = result.next_resume_token;
        entry.processed_documents += result.processed_documents;
        entry.completed = result.completed;
        entry.updated_at = Utc::now();
    }

    /// Forget a collection so the next invocation starts from offset 0.
    pub fn reset(&mut self, collection: &str) {
        self.collections.remove(collection);
    }
}
