//! Credential references and their resolution.
//!
//! Callers name stores by an opaque reference (`legacy`, `atlas`, ...). The
//! engine resolves a reference to connection parameters through a
//! [`CredentialProvider`] at invocation start and never logs or returns the
//! resolved secret.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{MigrateError, Result};

/// Connection parameters for one document store.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    /// Store host (for the file connector, the directory name under the root).
    pub host: String,

    /// Store port (default: 27017).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Username.
    #[serde(default)]
    pub username: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Whether the connection uses TLS (default: true).
    #[serde(default = "default_tls")]
    pub tls: bool,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("tls", &self.tls)
            .finish()
    }
}

impl Credentials {
    /// `host:port`, safe to log.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resolves a credential reference to connection parameters.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Resolve `reference`, failing with [`MigrateError::Credentials`] if unknown.
    async fn resolve(&self, reference: &str) -> Result<Credentials>;
}

/// Credential provider backed by the `credentials` section of the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigCredentialProvider {
    entries: HashMap<String, Credentials>,
}

impl ConfigCredentialProvider {
    pub fn new(entries: HashMap<String, Credentials>) -> Self {
        Self { entries }
    }

    /// Add or replace one entry.
    pub fn with_entry(mut self, reference: impl Into<String>, credentials: Credentials) -> Self {
        self.entries.insert(reference.into(), credentials);
        self
    }
}

#[async_trait]
impl CredentialProvider for ConfigCredentialProvider {
    async fn resolve(&self, reference: &str) -> Result<Credentials> {
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| MigrateError::Credentials(reference.to_string()))
    }
}

fn default_port() -> u16 {
    27017
}

fn default_tls() -> bool {
    true
}
