//! cutover CLI - checkpointed, resumable infrastructure migrations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cutover::checkpoint::PersistenceBackend;
use cutover::client::{AuthProvider, RemoteApi};
use cutover::pipeline::{migration_plan, RunOutcome, StepContext, TaskSettings, WorkflowDriver};
use cutover::{
    BatchRunner, CheckpointStore, Config, FileBackend, HttpApi, SessionGuard, TaskPoller,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "cutover")]
#[command(version)]
#[command(about = "Checkpointed, resumable migration of a VDC to its target networking backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration plan, resuming from the checkpoint if one exists
    Run,

    /// Compensate every step the checkpoint records as completed
    Rollback,

    /// Show checkpoint progress without touching the remote environment
    Status,

    /// Discard the checkpoint so the next run starts from scratch
    Reset,

    /// Validate configuration file
    Validate,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
}

fn print_example_config() {
    let example = r#"# cutover configuration file

[api]
base_url = "https://vcd.example.com"
org = "acme"
username = "migrator"
# Password (prefer the CUTOVER_API_PASSWORD env var)
# password = "..."
timeout_secs = 60

[tasks]
timeout_secs = 360
poll_interval_secs = 10
relocation_timeout_secs = 3600

[batch]
max_parallelism = 8

[checkpoint]
dir = "checkpoints"

[migration]
source_vdc = "prod-vdc"
target_suffix = "-t"
"#;
    println!("{example}");
}

fn load_config(path: &PathBuf) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

/// Build the shared step context: API client, session, checkpoint store.
async fn build_context(config: &Config) -> Result<Arc<StepContext>> {
    let password = config
        .resolve_password()
        .context("Failed to resolve API password")?;

    let api = Arc::new(HttpApi::new(
        &config.api.base_url,
        &config.api.org,
        &config.api.username,
        password,
        std::time::Duration::from_secs(config.api.timeout_secs),
    )?);

    let guard = Arc::new(
        SessionGuard::establish(
            Arc::clone(&api) as Arc<dyn RemoteApi>,
            api as Arc<dyn AuthProvider>,
        )
        .await
        .context("Failed to establish a session")?,
    );

    let backend = Box::new(FileBackend::new(&config.checkpoint.dir)?);
    let store = Arc::new(CheckpointStore::open(
        backend,
        &config.migration.source_vdc,
    )?);

    Ok(Arc::new(StepContext {
        remote: Arc::clone(&guard),
        store,
        poller: TaskPoller::new(guard),
        batch: BatchRunner::new(config.batch.max_parallelism),
        tasks: TaskSettings::from_config(config),
    }))
}

async fn build_driver(config: &Config) -> Result<WorkflowDriver> {
    let ctx = build_context(config).await?;
    let steps = migration_plan(config);
    Ok(WorkflowDriver::new(ctx, steps)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Example => {
            print_example_config();
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            config
                .resolve_password()
                .context("Failed to resolve API password")?;
            info!("Configuration is valid");
            info!("  Control plane: {}", config.api.base_url);
            info!(
                "  Migration: {} -> {}",
                config.migration.source_vdc,
                config.migration.target_vdc()
            );
            info!("  Max parallelism: {}", config.batch.max_parallelism);
        }

        Commands::Status => {
            let config = load_config(&cli.config)?;
            let backend = FileBackend::new(&config.checkpoint.dir)?;
            match CheckpointStore::peek(&backend)? {
                None => println!("No checkpoint; the next run starts from scratch."),
                Some(state) => {
                    println!("Workflow:   {}", state.workflow);
                    println!("Run id:     {}", state.run_id);
                    println!("Started:    {}", state.started_at);
                    println!("Updated:    {}", state.updated_at);
                    println!(
                        "Last step:  {}",
                        state.last_completed_step.as_deref().unwrap_or("<none>")
                    );
                    println!("Completed steps ({}):", state.completed_steps.len());
                    for step in &state.completed_steps {
                        println!("  - {step}");
                    }
                }
            }
        }

        Commands::Reset => {
            let config = load_config(&cli.config)?;
            // Clear the files directly; reset must work even when the
            // persisted state is too corrupt to parse.
            let backend = FileBackend::new(&config.checkpoint.dir)?;
            backend.clear()?;
            println!("Checkpoint discarded.");
        }

        Commands::Run => {
            let config = load_config(&cli.config)?;
            let driver = build_driver(&config).await?;
            let outcome = driver.run().await?;

            match &outcome {
                RunOutcome::Completed { executed, skipped } => {
                    println!("\n=== Migration Complete ===");
                    println!("Executed:  {executed}");
                    println!("Skipped:   {skipped}");
                }
                RunOutcome::RolledBack {
                    failed_step,
                    error,
                    report,
                } => {
                    println!("\n=== Migration Rolled Back ===");
                    println!("Failed at:  {failed_step}");
                    println!("Cause:      {error}");
                    println!("Reverted:   {}", report.reverted.join(", "));
                }
                RunOutcome::RollbackIncomplete {
                    failed_step,
                    error,
                    report,
                } => {
                    println!("\n=== Rollback Incomplete: Manual Intervention Required ===");
                    println!("Failed at:  {failed_step}");
                    println!("Cause:      {error}");
                    for failure in &report.failures {
                        println!("  {} could not be reverted: {}", failure.step, failure.message);
                    }
                }
            }

            let code = outcome.exit_code();
            if code != 0 {
                std::process::exit(code);
            }
        }

        Commands::Rollback => {
            let config = load_config(&cli.config)?;
            let driver = build_driver(&config).await?;
            let report = driver.roll_back_completed().await?;

            if report.reverted.is_empty() && report.failures.is_empty() {
                println!("Nothing to roll back.");
            } else {
                println!("Reverted: {}", report.reverted.join(", "));
            }
            if !report.is_complete() {
                for failure in &report.failures {
                    println!("  {} could not be reverted: {}", failure.step, failure.message);
                }
                std::process::exit(3);
            }
        }
    }

    Ok(())
}
