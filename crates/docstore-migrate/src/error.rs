//! Error types for the migration library.

use thiserror::Error;

/// Exit code for configuration errors (bad YAML, missing fields).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for unresolvable credential references.
pub const EXIT_CREDENTIALS_ERROR: u8 = 2;
/// Exit code for store connection or query failures.
pub const EXIT_STORE_ERROR: u8 = 3;
/// Exit code for an invalid migration job payload.
pub const EXIT_INVALID_JOB: u8 = 4;
/// Exit code when source and target disagree after verification.
pub const EXIT_VERIFICATION_MISMATCH: u8 = 5;
/// Exit code for a refused rollback or a failed orchestration step.
pub const EXIT_OPERATION_REFUSED: u8 = 6;
/// Exit code for filesystem errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Exit code for resume state problems.
pub const EXIT_STATE_ERROR: u8 = 8;
/// Exit code after SIGINT/SIGTERM.
pub const EXIT_CANCELLED: u8 = 130;

/// Error raised by a document store handle.
///
/// The batch processor classifies these: [`StoreError::DuplicateKey`] is skipped,
/// [`StoreError::InvalidDocument`] is fatal at once, everything else is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Some documents already existed at the destination. The rest of the
    /// unordered batch was still inserted.
    #[error("duplicate key: {duplicates} of the batch already exist ({inserted} inserted)")]
    DuplicateKey { inserted: usize, duplicates: usize },

    /// A retryable failure (write conflict, primary stepdown, throttling).
    #[error("transient store error: {0}")]
    Transient(String),

    /// A store operation exceeded the socket timeout.
    #[error("store operation timed out after {0}ms")]
    Timeout(u64),

    /// The connection to the store was lost or could not be established.
    #[error("connection error: {0}")]
    Connection(String),

    /// A document could not be stored as given (missing or null `_id`).
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// The collection name is not usable by this store.
    #[error("invalid collection name: {0}")]
    InvalidCollection(String),

    /// Underlying file I/O failed.
    #[error("store I/O error: {0}")]
    Io(String),

    /// Stored data could not be decoded.
    #[error("store data error: {0}")]
    Json(String),
}

impl StoreError {
    /// Whether a write failing with this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            StoreError::DuplicateKey { .. }
                | StoreError::InvalidDocument(_)
                | StoreError::InvalidCollection(_)
        )
    }

    /// Whether this is a duplicate-key rejection.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Json(err.to_string())
    }
}

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A credential reference could not be resolved.
    #[error("Unknown credential reference: {0}")]
    Credentials(String),

    /// A store operation failed outside the batch loop.
    #[error("Store error ({context}): {source}")]
    Store {
        context: String,
        #[source]
        source: StoreError,
    },

    /// TLS was required but the credentials do not enable it.
    #[error("TLS is required but disabled for store {0}")]
    Tls(String),

    /// The invocation payload is malformed or incomplete.
    #[error("Invalid migration job: {0}")]
    InvalidJob(String),

    /// A batch failed fatally; the collection can resume from `offset`.
    #[error("Batch failed for {collection} at offset {offset}: {message}")]
    BatchFailed {
        collection: String,
        offset: u64,
        message: String,
    },

    /// Source and target disagree.
    #[error("Verification mismatch: {0}")]
    VerificationMismatch(String),

    /// Rollback was requested without the force flag.
    #[error("Rollback refused: pass force=true to re-point the application at the source store")]
    RollbackRefused,

    /// An orchestration step exhausted its attempts.
    #[error("Step {step} failed after {attempts} attempts: {message}")]
    StepFailed {
        step: String,
        attempts: u32,
        message: String,
    },

    /// Resume state file error.
    #[error("State file error: {0}")]
    State(String),

    /// Config hash mismatch on resume
    #[error("Config has changed since last run - cannot resume. Use --force to start fresh.")]
    ConfigChanged,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Wrap a store error with context about where it occurred.
    pub fn store(context: impl Into<String>, source: StoreError) -> Self {
        MigrateError::Store {
            context: context.into(),
            source,
        }
    }

    /// Create a StepFailed error.
    pub fn step_failed(step: impl Into<String>, attempts: u32, message: impl Into<String>) -> Self {
        MigrateError::StepFailed {
            step: step.into(),
            attempts,
            message: message.into(),
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => EXIT_CONFIG_ERROR,
            MigrateError::Credentials(_) => EXIT_CREDENTIALS_ERROR,
            MigrateError::Store { .. }
            | MigrateError::Tls(_)
            | MigrateError::BatchFailed { .. } => EXIT_STORE_ERROR,
            MigrateError::InvalidJob(_) | MigrateError::Json(_) => EXIT_INVALID_JOB,
            MigrateError::VerificationMismatch(_) => EXIT_VERIFICATION_MISMATCH,
            MigrateError::RollbackRefused | MigrateError::StepFailed { .. } => {
                EXIT_OPERATION_REFUSED
            }
            MigrateError::Io(_) => EXIT_IO_ERROR,
            MigrateError::State(_) | MigrateError::ConfigChanged => EXIT_STATE_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Render the error cause chain, one cause per line.
    pub fn cause_chain(&self) -> Vec<String> {
        let mut causes = Vec::new();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            causes.push(err.to_string());
            source = err.source();
        }
        causes
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        for (depth, cause) in self.cause_chain().iter().enumerate() {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth + 1, cause));
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
