//! Report types returned by the verification controller.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cutover::ActiveStore;

/// Outcome of comparing one collection across both stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifyStatus {
    Match,
    Mismatch,
    /// The comparison itself failed (store unreachable, timeout, ...).
    Error,
}

impl fmt::Display for VerifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VerifyStatus::Match => "match",
            VerifyStatus::Mismatch => "mismatch",
            VerifyStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Per-collection verification result. `old` is the source store, `new` the
/// target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub collection: String,
    pub old_count: u64,
    pub new_count: u64,
    pub counts_match: bool,
    pub old_index_count: u64,
    pub new_index_count: u64,
    pub indexes_match: bool,
    pub sample_shape_match: bool,
    pub status: VerifyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationReport {
    pub(crate) fn measured(
        collection: &str,
        (old_count, new_count): (u64, u64),
        (old_index_count, new_index_count): (u64, u64),
        sample_shape_match: bool,
    ) -> Self {
        let counts_match = old_count == new_count;
        let indexes_match = old_index_count == new_index_count;
        let status = if counts_match && indexes_match && sample_shape_match {
            VerifyStatus::Match
        } else {
            VerifyStatus::Mismatch
        };
        Self {
            collection: collection.to_string(),
            old_count,
            new_count,
            counts_match,
            old_index_count,
            new_index_count,
            indexes_match,
            sample_shape_match,
            status,
            error: None,
        }
    }

    pub(crate) fn failed(collection: &str, message: impl Into<String>) -> Self {
        Self {
            collection: collection.to_string(),
            old_count: 0,
            new_count: 0,
            counts_match: false,
            old_index_count: 0,
            new_index_count: 0,
            indexes_match: false,
            sample_shape_match: false,
            status: VerifyStatus::Error,
            error: Some(message.into()),
        }
    }

    pub fn is_match(&self) -> bool {
        self.status == VerifyStatus::Match
    }
}

/// Reachability of one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    /// Credential reference.
    pub store: String,
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Document counts of one collection in both stores. A count is absent when
/// its store could not be queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStatus {
    pub collection: String,
    pub source_count: Option<u64>,
    pub target_count: Option<u64>,
}

/// Lightweight polling view: counts and online state, no deep comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub source: StoreStatus,
    pub target: StoreStatus,
    pub collections: Vec<CollectionStatus>,
}

impl StatusReport {
    pub fn all_online(&self) -> bool {
        self.source.online && self.target.online
    }
}

/// What a forced rollback changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    /// The store the application was pointed away from.
    pub rolled_back_from: String,
    /// The application's connection configuration after the rollback.
    pub active: ActiveStore,
}
