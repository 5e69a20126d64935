use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use dbvault::{BackupManager, Config};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Encrypted database backups")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump, compress, encrypt and upload the database
    Backup,
    /// List or restore stored backups
    Restore {
        #[command(subcommand)]
        action: RestoreAction,
    },
    /// Backup followed by a retention sweep
    AutoBackup,
}

#[derive(Subcommand, Debug)]
enum RestoreAction {
    /// List available backups
    List,
    /// Restore from a backup
    Restore {
        /// Backup identifier, e.g. backup-production-2024-06-30-02-00-00
        identifier: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // stdout carries command output only
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dbvault=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env().context("Invalid configuration")?;

    let token = CancellationToken::new();
    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let manager = BackupManager::from_config_with_cancellation(config, token)
        .await
        .context("Failed to initialise backup manager")?;

    match cli.command {
        Command::Backup => {
            let identifier = manager.backup().await.context("Backup failed")?;
            println!("Backup completed successfully: {}", identifier);
        }
        Command::Restore {
            action: RestoreAction::List,
        } => {
            let backups = manager
                .list_backups()
                .await
                .context("Failed to list backups")?;
            println!("Available backups:");
            for backup in backups {
                println!("\nTag: {}", backup.identifier);
                println!("Name: {}", backup.name.as_deref().unwrap_or(&backup.identifier));
                println!(
                    "Created: {}",
                    backup.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
                );
                println!("Assets:");
                for asset in &backup.assets {
                    println!(
                        "  - {} ({:.2} MB)",
                        asset.name,
                        asset.size_bytes as f64 / 1024.0 / 1024.0
                    );
                }
            }
        }
        Command::Restore {
            action: RestoreAction::Restore { identifier },
        } => {
            manager
                .restore(&identifier)
                .await
                .with_context(|| format!("Restore of {} failed", identifier))?;
            println!("Database restored successfully");
        }
        Command::AutoBackup => {
            let report = manager
                .run_scheduled(Utc::now())
                .await
                .context("Automated backup failed")?;
            info!(
                identifier = %report.identifier,
                deleted = report.sweep.deleted.len(),
                retained = report.sweep.retained(),
                "Scheduled run finished"
            );
            println!("Automated backup completed successfully: {}", report.identifier);
            for deleted in &report.sweep.deleted {
                println!("Deleted old backup: {}", deleted);
            }
        }
    }

    Ok(())
}
