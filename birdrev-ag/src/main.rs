//! birdrev-ag - Artifact generation for bird detection review
//!
//! Runs the HTTP API (`serve`) or one-shot maintenance commands against the
//! detection database and the artifact store.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use birdrev_common::config::{AppConfig, ConfigOverrides};
use birdrev_common::db::RepositoryOptions;
use birdrev_common::{DetectionFilter, DetectionRepository, QualityStatus};
use birdrev_ag::manager::DEFAULT_MIN_ARTIFACT_BYTES;
use birdrev_ag::{build_router, AppState, ArtifactKind, ProcessOptions, ProcessingManager};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{
    layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Level used until the configuration file has been read
const STARTUP_LOG_LEVEL: &str = "info";

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Command-line arguments for birdrev-ag
#[derive(Parser, Debug)]
#[command(name = "birdrev-ag")]
#[command(about = "Audio segment and spectrogram generation for bird detections")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "BIRDREV_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding result.db and the audio roots
    #[arg(short, long, env = "BIRDNET_DATABASE_PATH")]
    database_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Overrides [server] port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Generate artifacts for the given detections
    Process {
        #[arg(required = true)]
        ids: Vec<i64>,
        /// Regenerate existing artifacts
        #[arg(long)]
        force: bool,
        /// Only this artifact kind (segment or spectrogram)
        #[arg(long)]
        kind: Option<ArtifactKind>,
    },
    /// Generate artifacts for every matching detection that lacks one
    ProcessMissing {
        #[arg(long)]
        session: Option<String>,
        #[arg(long)]
        min_confidence: Option<f64>,
        #[arg(long)]
        force: bool,
    },
    /// Show which artifacts exist for a detection
    Check { id: i64 },
    /// Record a review decision
    Review {
        id: i64,
        status: QualityStatus,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Print detection and review statistics
    Summary,
    /// Remove undersized artifacts and leftover temporary files
    Cleanup {
        #[arg(long, default_value_t = DEFAULT_MIN_ARTIFACT_BYTES)]
        min_bytes: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Installed before the config is read so loading warnings are not lost
    let env_filter = EnvFilter::try_from_default_env().ok();
    let env_overrides = env_filter.is_some();
    let (filter, filter_handle) =
        reload::Layer::new(env_filter.unwrap_or_else(|| EnvFilter::new(STARTUP_LOG_LEVEL)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load(&ConfigOverrides {
        config_file: args.config.clone(),
        database_folder: args.database_folder.clone(),
    })
    .context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    if !env_overrides {
        apply_configured_level(&filter_handle, &config.logging.level)?;
    }

    info!("Starting birdrev-ag v{}", env!("CARGO_PKG_VERSION"));
    info!("Database: {}", config.database_path.display());
    info!("Artifacts: {}", config.artifact_root.display());

    let repository = Arc::new(
        DetectionRepository::open(
            &config.database_path,
            RepositoryOptions::from_config(&config.database),
        )
        .await
        .context("Failed to open detection database")?,
    );
    let manager = Arc::new(ProcessingManager::from_app_config(repository.clone(), &config));

    let result = run(args.command, &config, manager).await;
    repository.close().await;
    result
}

/// Swap the startup filter for the `[logging] level` directive
fn apply_configured_level(handle: &FilterHandle, level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .with_context(|| format!("Invalid log level '{}'", level))?;
    handle
        .reload(filter)
        .context("Failed to apply configured log level")
}

async fn run(command: Command, config: &AppConfig, manager: Arc<ProcessingManager>) -> Result<()> {
    match command {
        Command::Serve { port } => serve(config, manager, port).await,
        Command::Process { ids, force, kind } => {
            let options = ProcessOptions {
                kinds: kind.map(|k| vec![k]).unwrap_or_else(|| ArtifactKind::ALL.to_vec()),
                force,
            };
            let token = cancel_on_ctrl_c();
            let report = manager
                .process_multiple_with_cancel(&ids, &options, &token)
                .await?;
            print_json(&report)?;
            if report.failed > 0 {
                bail!("{} of {} detections failed", report.failed, report.total());
            }
            Ok(())
        }
        Command::ProcessMissing {
            session,
            min_confidence,
            force,
        } => {
            let mut filter = DetectionFilter::default();
            if let Some(session) = session {
                filter = filter.session(session);
            }
            if let Some(min) = min_confidence {
                filter = filter.min_confidence(min);
            }
            let options = ProcessOptions {
                force,
                ..ProcessOptions::default()
            };
            let token = cancel_on_ctrl_c();
            let report = manager.process_missing(&filter, &options, &token).await?;
            info!(
                succeeded = report.succeeded,
                failed = report.failed,
                cancelled = report.cancelled,
                "Finished processing missing artifacts"
            );
            print_json(&report)
        }
        Command::Check { id } => {
            let exists = manager.check_files_exist(id);
            let paths = manager.artifact_paths(id);
            for (kind, path) in paths {
                let present = exists.get(&kind).copied().unwrap_or(false);
                println!(
                    "{:<12} {:<8} {}",
                    kind.as_str(),
                    if present { "present" } else { "missing" },
                    path.display()
                );
            }
            Ok(())
        }
        Command::Review { id, status, notes } => {
            let repository = manager.repository();
            let updated = match notes {
                Some(notes) => {
                    repository
                        .set_quality_status_with_notes(id, status, Some(notes))
                        .await?
                }
                None => repository.set_quality_status(id, status).await?,
            };
            if !updated {
                bail!("Detection {} not found", id);
            }
            println!("Detection {} marked {}", id, status);
            Ok(())
        }
        Command::Summary => {
            let repository = manager.repository();
            #[derive(Serialize)]
            struct Summary {
                overall: birdrev_common::db::OverallStats,
                quality: birdrev_common::db::QualityStats,
                sessions: Vec<birdrev_common::db::SessionSummary>,
                species: Vec<birdrev_common::db::SpeciesSummary>,
            }
            print_json(&Summary {
                overall: repository.overall_statistics().await?,
                quality: repository.quality_statistics().await?,
                sessions: repository.session_summary().await?,
                species: repository.species_summary().await?,
            })
        }
        Command::Cleanup { min_bytes } => {
            let report = tokio::task::spawn_blocking(move || manager.cleanup_incomplete(min_bytes))
                .await
                .context("Cleanup task failed")?;
            print_json(&report)
        }
    }
}

async fn serve(config: &AppConfig, manager: Arc<ProcessingManager>, port: Option<u16>) -> Result<()> {
    let app = build_router(AppState::new(manager));

    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server host '{}'", config.server.host))?;
    let addr = SocketAddr::new(host, port.unwrap_or(config.server.port));

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Token cancelled on the first Ctrl+C; running items finish, the rest are skipped
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, finishing in-flight detections");
            child.cancel();
        }
    });
    token
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
