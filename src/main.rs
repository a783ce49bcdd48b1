use std::path::PathBuf;

use clap::Parser;
use recorder::{
    DbPool, Recorder, RecorderConfig,
    events::{self, PurgeEvent},
    observability,
    recorder::{PurgeEntitiesServiceData, PurgeServiceData, ServiceError},
};

const DEFAULT_CONFIG_PATH: &str = "recorder.toml";

/// CLI arguments for the recorder
#[derive(Parser, Debug)]
#[command(version, about = "History recorder with batched retention", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./recorder.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the recorder with scheduled purges until interrupted (default)
    Run,
    /// Purge history older than the given number of days and exit
    Purge {
        /// Days of history to keep (defaults to `purge.keep_days`)
        #[arg(long)]
        keep_days: Option<i64>,
        /// Compact the database once the purge has finished
        #[arg(long)]
        repack: bool,
        /// Also purge history rejected by the configured filter
        #[arg(long)]
        apply_filter: bool,
    },
    /// Purge all history of the selected entities and exit
    ///
    /// Without any selector every entity is purged.
    PurgeEntities {
        #[arg(long = "entity-id")]
        entity_ids: Vec<String>,
        #[arg(long = "domain")]
        domains: Vec<String>,
        #[arg(long = "glob")]
        entity_globs: Vec<String>,
    },
    /// Run database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let (config_path, config) = load_config(args.config.as_deref());

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {e}");
        std::process::exit(1);
    }
    if let Err(e) = observability::metrics::init_metrics(&config.observability.metrics) {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    tracing::debug!(config_file = %config_path.display(), "Loaded configuration");

    match args.command {
        Some(Command::Migrate) => run_migrate(&config).await,
        Some(Command::Purge {
            keep_days,
            repack,
            apply_filter,
        }) => {
            let data = PurgeServiceData {
                keep_days,
                repack,
                apply_filter,
            };
            run_once(config, |recorder| recorder.purge(data)).await;
        }
        Some(Command::PurgeEntities {
            entity_ids,
            domains,
            entity_globs,
        }) => {
            let data = PurgeEntitiesServiceData {
                entity_id: entity_ids,
                domains,
                entity_globs,
            };
            run_once(config, |recorder| recorder.purge_entities(data)).await;
        }
        Some(Command::Run) | None => run(config).await,
    }
}

fn load_config(path: Option<&str>) -> (PathBuf, RecorderConfig) {
    let path = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
    match RecorderConfig::from_file(&path) {
        Ok(config) => (path, config),
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

async fn start(config: RecorderConfig) -> Recorder {
    match Recorder::start(config).await {
        Ok(recorder) => recorder,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start recorder");
            std::process::exit(1);
        }
    }
}

/// Run until Ctrl+C or SIGTERM.
async fn run(config: RecorderConfig) {
    let mut recorder = start(config).await;
    recorder.start_auto_purge();
    tracing::info!("Recorder running");

    let mut events = recorder.subscribe();
    let log_events = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            log_event(&event);
        }
    });

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping recorder");
    recorder.shutdown().await;
    log_events.abort();
}

/// Queue one service call, wait for it, and exit non-zero if it failed.
async fn run_once<F>(config: RecorderConfig, call: F)
where
    F: FnOnce(&Recorder) -> Result<(), ServiceError>,
{
    let recorder = start(config).await;
    let outcome = tokio::spawn(events::follow_until_closed(recorder.subscribe(), log_event));

    if let Err(e) = call(&recorder) {
        eprintln!("Error: {e}");
        recorder.shutdown().await;
        std::process::exit(2);
    }
    recorder.wait_purge_done().await;
    recorder.shutdown().await;

    // The bus closes once the recorder is gone.
    match outcome.await {
        Ok(false) => {}
        Ok(true) => std::process::exit(1),
        Err(e) => {
            tracing::error!(error = %e, "Purge event follower failed");
            std::process::exit(1);
        }
    }
}

async fn run_migrate(config: &RecorderConfig) {
    let db = match DbPool::from_config(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to connect to database: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = db.run_migrations().await {
        eprintln!("Migration failed: {e}");
        std::process::exit(1);
    }
    db.close().await;
    println!("Migrations complete");
}

fn log_event(event: &PurgeEvent) {
    match event {
        PurgeEvent::PurgeProgress {
            kind,
            finished: true,
            states_deleted,
            events_deleted,
            runs_deleted,
            ..
        } => tracing::info!(
            kind = kind.as_str(),
            states = states_deleted,
            events = events_deleted,
            runs = runs_deleted,
            "Purge finished"
        ),
        PurgeEvent::DatabaseRebuilt {
            quarantined_path, ..
        } => tracing::warn!(
            moved_to = ?quarantined_path,
            "Database was rebuilt"
        ),
        other => tracing::debug!(event_type = other.event_type(), "Purge event"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
