//! Project Backup Tool
//!
//! Snapshots a project tree plus its database into a single archive and keeps
//! copies in S3-compatible storage, on demand or on a fixed schedule.

// backupvault/src/main.rs
mod backup;
mod config;
mod errors;
mod remote;
mod restore;
mod scheduler;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use backup::BackupService;
use config::AppConfig;
use remote::{RemoteStore, SpacesConnector, SpacesStore};
use scheduler::BackupScheduler;
use utils::cipher;

#[derive(Parser)]
#[command(name = "backupvault", version, about = "Project and database backups with off-site copies")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "BACKUP_CONFIG", default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a backup artifact in the scratch directory and print its path
    Backup {
        /// Upload the artifact and remove the local copy afterwards
        #[arg(long)]
        upload: bool,
    },
    /// Upload an existing artifact
    Upload { file: PathBuf },
    /// List remote backups, newest first
    List,
    /// Download a remote backup by id
    Download { id: String, dest: PathBuf },
    /// Delete a remote backup by id
    Delete { id: String },
    /// Download, decrypt if needed, and extract a remote backup
    Restore { id: String, target: PathBuf },
    /// Encrypt a file with the configured key
    Encrypt { input: PathBuf, output: PathBuf },
    /// Decrypt a file with the configured key
    Decrypt { input: PathBuf, output: PathBuf },
    /// Run the backup scheduler until SIGINT/SIGTERM
    Run,
}

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let app_config = AppConfig::load_from_json(&cli.config).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            cli.config.display()
        )
    })?;
    utils::logger::init(&app_config.log_level)?;
    tracing::debug!(config = ?app_config, "Configuration loaded");

    match cli.command {
        Command::Backup { upload: false } => {
            let service = BackupService::new(app_config.backup.clone());
            tracing::info!(scratch = %service.config().scratch_root.display(), "Starting backup");
            let artifact = service.create_backup().await.context("Backup process failed")?;
            println!("{}", artifact.display());
        }
        Command::Backup { upload: true } => {
            let scheduler = BackupScheduler::new(
                Arc::new(BackupService::new(app_config.backup.clone())),
                SpacesConnector::new(remote_config(&app_config)?),
                app_config.schedule.interval,
            );
            let report = scheduler.run_cycle().await.context("Backup process failed")?;
            println!("{}", report.remote_id);
        }
        Command::Upload { file } => {
            let remote_id = connect(&app_config)
                .await?
                .upload(&file)
                .await
                .with_context(|| format!("Failed to upload {}", file.display()))?;
            println!("{}", remote_id);
        }
        Command::List => {
            let entries = connect(&app_config)
                .await?
                .list()
                .await
                .context("Failed to list remote backups")?;
            for entry in entries {
                println!(
                    "{}\t{}\t{}\t{}",
                    entry.created.format("%Y-%m-%d %H:%M:%S"),
                    entry.size,
                    entry.name,
                    entry.id
                );
            }
        }
        Command::Download { id, dest } => {
            connect(&app_config)
                .await?
                .download(&id, &dest)
                .await
                .with_context(|| format!("Failed to download {}", id))?;
            println!("{}", dest.display());
        }
        Command::Delete { id } => {
            connect(&app_config)
                .await?
                .delete(&id)
                .await
                .with_context(|| format!("Failed to delete {}", id))?;
        }
        Command::Restore { id, target } => {
            let store = connect(&app_config).await?;
            let files = restore::run_restore_flow(&store, &app_config.backup, &id, &target)
                .await
                .context("Restore process failed")?;
            println!("Restored {} files into {}", files.len(), target.display());
        }
        Command::Encrypt { input, output } => {
            let key = encryption_key(&app_config)?;
            cipher::encrypt_file(&input, &output, &key)
                .with_context(|| format!("Failed to encrypt {}", input.display()))?;
        }
        Command::Decrypt { input, output } => {
            let key = encryption_key(&app_config)?;
            cipher::decrypt_file(&input, &output, &key)
                .with_context(|| format!("Failed to decrypt {}", input.display()))?;
        }
        Command::Run => run_scheduler(&app_config).await?,
    }
    Ok(())
}

async fn run_scheduler(app_config: &AppConfig) -> Result<()> {
    if !app_config.schedule.enabled {
        anyhow::bail!("Scheduling is disabled in config.json (schedule.enabled = false)");
    }
    let connector = SpacesConnector::new(remote_config(app_config)?);
    let service = Arc::new(BackupService::new(app_config.backup.clone()));

    let cancel = CancellationToken::new();
    let handle = BackupScheduler::new(service, connector, app_config.schedule.interval)
        .spawn(cancel.clone());

    shutdown_signal().await;
    tracing::info!("Shutting down...");
    cancel.cancel();
    handle.await.context("Scheduler task panicked")?;
    Ok(())
}

fn remote_config(app_config: &AppConfig) -> Result<config::RemoteConfig> {
    app_config
        .remote
        .clone()
        .context("Remote storage is not configured (missing `remote` section in config.json)")
}

async fn connect(app_config: &AppConfig) -> Result<SpacesStore> {
    let remote = remote_config(app_config)?;
    SpacesStore::connect(&remote)
        .await
        .context("Failed to connect to remote storage")
}

fn encryption_key(app_config: &AppConfig) -> Result<[u8; cipher::KEY_LEN]> {
    app_config
        .backup
        .encryption_key
        .context("No encryption key configured (set encryption_key_hex in config.json)")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
