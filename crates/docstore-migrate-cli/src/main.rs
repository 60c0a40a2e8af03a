//! docstore-migrate CLI - resumable, time-bounded document store migration.

use clap::{Parser, Subcommand};
use docstore_migrate::handler::{
    MigratePayload, OperationResults, VerificationOperation, VerificationPayload,
    VerificationResponse,
};
use docstore_migrate::{
    BatchClass, Config, Environment, Handler, HandlerDefaults, InvocationKind, MigrateError,
    MigrationResult, Orchestrator, ResumeState, RunPlan, StoreError,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "docstore-migrate")]
#[command(about = "Resumable, time-bounded migration between JSON document stores")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to state file for resume capability
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy one collection within a single time budget
    Migrate {
        /// Collection to copy
        collection: String,

        /// Start from this offset instead of the saved resume token
        #[arg(long)]
        start_offset: Option<u64>,

        /// Stop after this many batches
        #[arg(long)]
        max_batches: Option<u64>,

        /// Override the configured batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Count documents without writing
        #[arg(long)]
        dry_run: bool,

        /// Discard a state file written under a different configuration
        #[arg(long)]
        force: bool,

        /// Forget the saved progress for this collection and start from 0
        #[arg(long, conflicts_with = "start_offset")]
        reset: bool,
    },

    /// Pre-validate, migrate every configured collection and cut over
    Run {
        /// Validate and count without writing or cutting over
        #[arg(long)]
        dry_run: bool,
    },

    /// Report store reachability and per-collection counts
    Status,

    /// Compare counts, indexes and document shape between the stores
    Verify,

    /// Re-point the application at the source store
    Rollback {
        /// Required: rollback is never implicit
        #[arg(long)]
        force: bool,
    },

    /// Run one function invocation from a JSON payload file
    Invoke {
        /// Entry point: migrate, status or verify
        #[arg(long)]
        kind: String,

        /// Payload file (JSON)
        #[arg(long)]
        payload: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler();
    let env = Environment::from_config(&config).with_cancel(cancel_token);

    match cli.command {
        Commands::Migrate {
            collection,
            start_offset,
            max_batches,
            batch_size,
            dry_run,
            force,
            reset,
        } => {
            let mut state = match cli.state_file {
                Some(ref path) => Some(ResumeState::load_or_new(path, &config.hash(), force)?),
                None => None,
            };

            if reset {
                let (Some(state), Some(path)) = (state.as_mut(), cli.state_file.as_ref()) else {
                    return Err(MigrateError::Config("--reset requires --state-file".into()));
                };
                state.reset(&collection);
                state.save(path)?;
                info!("Cleared saved progress for {}", collection);
            }

            if start_offset.is_none() && state.as_ref().is_some_and(|s| s.is_completed(&collection)) {
                println!("{} is already migrated (use --reset or --start-offset to copy again)", collection);
                return Ok(());
            }
            let offset = start_offset
                .or_else(|| state.as_ref().map(|s| s.start_offset(&collection)))
                .unwrap_or(0);

            let handler = Handler::new(env, HandlerDefaults::from_config(&config));
            let result = handler
                .migrate(MigratePayload {
                    source_credential_ref: config.migration.source.clone(),
                    target_credential_ref: config.migration.target.clone(),
                    collection_name: collection.clone(),
                    batch_size,
                    start_offset: Some(offset),
                    max_batches: max_batches.or(config.migration.max_batches),
                    resume_token: None,
                    dry_run: dry_run || config.migration.dry_run,
                    time_budget_ms: None,
                })
                .await?;

            if let (Some(state), Some(path)) = (state.as_mut(), cli.state_file.as_ref()) {
                if !result.dry_run {
                    state.record(&result);
                    state.save(path)?;
                }
            }

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_migration(&result);
            }

            if let Some(err) = batch_failure(&result) {
                return Err(err);
            }
        }

        Commands::Run { dry_run } => {
            let mut plan = RunPlan::from_config(&config.migration);
            plan.dry_run |= dry_run;

            let result = Orchestrator::new(env, plan)
                .with_config_hash(config.hash())
                .run()
                .await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                let status_msg = match (result.success, result.dry_run) {
                    (true, true) => "Dry run completed!",
                    (true, false) => "Migration completed!",
                    (false, _) => "Migration failed!",
                };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.duration_seconds);
                for step in &result.steps {
                    println!(
                        "  {}: {:?} (attempts: {})",
                        step.step_name, step.status, step.attempt
                    );
                }
                for collection in &result.collections {
                    println!(
                        "  {}: {} documents in {} invocations",
                        collection.collection, collection.processed_documents, collection.invocations
                    );
                }
                if let Some(ref err) = result.error {
                    println!("  Error: {}", err);
                }
            }

            if let Some(err) = result.failure() {
                return Err(err);
            }
        }

        Commands::Status => {
            let response = verification(&env, &config, VerificationOperation::Status, false).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_status(&response);
            }
            if let Some(err) = unreachable_stores(&response) {
                return Err(err);
            }
        }

        Commands::Verify => {
            let response = verification(&env, &config, VerificationOperation::Verify, false).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if let OperationResults::Verify(ref reports) = response.results {
                println!("Verification Results:");
                for report in reports {
                    println!(
                        "  {:?} {} (documents: {}/{}, indexes: {}/{})",
                        report.status,
                        report.collection,
                        report.old_count,
                        report.new_count,
                        report.old_index_count,
                        report.new_index_count
                    );
                    if let Some(ref err) = report.error {
                        println!("    Error: {}", err);
                    }
                }
            }
            if !response.success {
                return Err(MigrateError::VerificationMismatch(
                    "source and target differ".to_string(),
                ));
            }
        }

        Commands::Rollback { force } => {
            let response =
                verification(&env, &config, VerificationOperation::Rollback, force).await?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else if let OperationResults::Rollback(ref reports) = response.results {
                for report in reports {
                    println!(
                        "Rolled back from {}; application now uses {}",
                        report.rolled_back_from, report.active.active_store
                    );
                }
            }
        }

        Commands::Invoke { kind, payload } => {
            let kind: InvocationKind = kind.parse()?;
            let payload = read_payload(&payload)?;
            let handler = Handler::new(env, HandlerDefaults::from_config(&config));
            let response = handler.invoke(kind, payload).await;

            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.is_success() {
                return Err(MigrateError::InvalidJob(format!(
                    "invocation returned status {}",
                    response.status_code
                )));
            }
        }
    }

    Ok(())
}

async fn verification(
    env: &Environment,
    config: &Config,
    operation: VerificationOperation,
    force: bool,
) -> Result<VerificationResponse, MigrateError> {
    let handler = Handler::new(env.clone(), HandlerDefaults::from_config(config));
    handler
        .verification(VerificationPayload {
            collections: config.migration.collections.clone(),
            operation,
            force,
            source_credential_ref: None,
            target_credential_ref: None,
        })
        .await
}

fn read_payload(path: &Path) -> Result<serde_json::Value, MigrateError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Turn a fatal stop into an error carrying the offset to resume from.
fn batch_failure(result: &MigrationResult) -> Option<MigrateError> {
    if !result.is_fatal() {
        return None;
    }
    let message = result
        .errors_of(BatchClass::Fatal)
        .last()
        .map(|e| e.message.clone())
        .unwrap_or_default();
    Some(MigrateError::BatchFailed {
        collection: result.collection.clone(),
        offset: result.next_resume_token.unwrap_or(result.start_offset),
        message,
    })
}

/// A store error naming every store the status check could not reach.
fn unreachable_stores(response: &VerificationResponse) -> Option<MigrateError> {
    if response.success {
        return None;
    }
    let reason = response
        .stores
        .iter()
        .flatten()
        .filter(|s| !s.online)
        .map(|s| format!("{}: {}", s.store, s.error.as_deref().unwrap_or("offline")))
        .collect::<Vec<_>>()
        .join("; ");
    Some(MigrateError::store("status", StoreError::Connection(reason)))
}

fn print_migration(result: &MigrationResult) {
    let status_msg = if result.completed {
        "Collection migrated!"
    } else {
        "Time budget used, resume to continue."
    };
    println!("\n{}", status_msg);
    println!("  Collection: {}", result.collection);
    println!("  Batches: {}", result.processed_batches);
    println!(
        "  Documents: {} processed, {} written, {} remaining",
        result.processed_documents, result.documents_written, result.remaining_documents
    );
    println!("  Stop reason: {:?}", result.stop_reason);
    if let Some(token) = result.next_resume_token {
        println!("  Resume token: {}", token);
    }
    if !result.errors.is_empty() {
        println!("  Batch errors: {}", result.errors.len());
    }
}

fn print_status(response: &VerificationResponse) {
    println!("Store Status:");
    for store in response.stores.iter().flatten() {
        println!(
            "  {}: {}",
            store.store,
            if store.online { "ONLINE" } else { "UNREACHABLE" }
        );
        if let Some(ref err) = store.error {
            println!("    Error: {}", err);
        }
    }
    if let OperationResults::Status(ref collections) = response.results {
        for status in collections {
            let count = |c: Option<u64>| c.map(|n| n.to_string()).unwrap_or_else(|| "?".into());
            println!(
                "  {}: {} -> {}",
                status.collection,
                count(status.source_count),
                count(status.target_count)
            );
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM (scheduler shutdown).
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Stopping after the current batch...", name);
            token.cancel();
        });
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Stopping after the current batch...");
        token.cancel();
    });

    cancel_token
}
