//! scale-ingest - pulls scale CSV exports from a mailbox into SQLite.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use scale_ingest::config::{load_runtime_config, Config};
use scale_ingest::db::file_repo;
use scale_ingest::logging::init_logging;
use scale_ingest::pipeline::OrchestratorSettings;
use scale_ingest::secrets::expand_home;
use scale_ingest::worker::check_health;
use scale_ingest::{
    Database, ImapTransport, IngestError, IngestionOrchestrator, IngestionWorker, RecordValidator,
};

#[derive(Parser, Debug)]
#[command(name = "scale-ingest")]
#[command(author, version, about = "Scale measurement CSV ingestion worker")]
struct Cli {
    /// JSON config file. Without one, defaults plus environment are used.
    #[arg(short, long, env = "SCALE_INGEST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the mailbox continuously (default)
    Run,

    /// Run a single ingestion cycle and exit
    Once,

    /// Check store and mailbox reachability; exits non-zero when unhealthy
    Health,

    /// Delete completed and failed files older than the given age
    Purge {
        /// Age in days; defaults to ingestion.purge_after_days
        #[arg(long)]
        days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_runtime_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.command.unwrap_or(Command::Run), &config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &Config) -> Result<ExitCode, IngestError> {
    let db_path = expand_home(&config.database.path);
    let db = Database::open_with(Path::new(&db_path), config.database.pool_settings())?;

    match command {
        Command::Run => {
            let mut worker = build_worker(db, config)?;
            worker.run_continuous().await;
            Ok(ExitCode::SUCCESS)
        }
        Command::Once => {
            let mut worker = build_worker(db, config)?;
            let summary = worker.run_once().await?;
            info!(
                processed = summary.bundles_processed(),
                errors = summary.bundle_errors,
                "Single cycle finished"
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Health => {
            let mut transport = ImapTransport::new(config.imap.clone());
            let report = check_health(&db, &mut transport).await;
            match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Could not render health report: {}", e),
            }
            Ok(if report.healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Purge { days } => {
            let days = days.unwrap_or(config.ingestion.purge_after_days);
            let removed = file_repo::purge_older_than(&db, days)?;
            info!(removed, days, "Purge finished");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_worker(db: Database, config: &Config) -> Result<IngestionWorker<ImapTransport>, IngestError> {
    let validator = RecordValidator::new(config.ingestion.timezone()?);
    let orchestrator = IngestionOrchestrator::new(
        db,
        validator,
        OrchestratorSettings::from(&config.ingestion),
    );
    let transport = ImapTransport::new(config.imap.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    }) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    Ok(IngestionWorker::new(
        orchestrator,
        transport,
        config.ingestion.poll_interval(),
        shutdown_rx,
    ))
}
