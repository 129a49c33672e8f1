// ABOUTME: Entry point for the docvault binary.
// ABOUTME: Runs the vault until Ctrl-C, or performs one operator action (check, backup, status, emergency).

use anyhow::Context;
use clap::{Parser, Subcommand};
use docvault_store::{Vault, VaultConfig};
use serde::Serialize;

/// docvault - file-backed durable document store
#[derive(Parser, Debug)]
#[command(name = "docvault", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the vault with its backup and health loops until Ctrl-C (default)
    Run,
    /// Run one health check, restoring damaged documents from snapshots
    Check,
    /// Take one snapshot of every document
    Backup,
    /// Print health, backup and collection status as JSON
    Status,
    /// Emergency protection of imported builders
    Emergency {
        #[command(subcommand)]
        action: EmergencyAction,
    },
}

#[derive(Subcommand, Debug)]
enum EmergencyAction {
    /// Write protected builders to a new emergency file
    Backup,
    /// Re-insert builders from the newest emergency file that are missing
    Restore,
    /// Repair provenance flags on imported builders
    Verify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("docvault=info,docvault_store=info")
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = VaultConfig::from_env().context("invalid docvault configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Check => {
            let vault = open(config)?;
            print_json(&vault.perform_health_check().await)
        }
        Command::Backup => {
            let vault = open(config)?;
            print_json(&vault.force_backup_now().await?)
        }
        Command::Status => {
            let vault = open(config)?;
            print_json(&vault.system_status().await?)
        }
        Command::Emergency { action } => {
            let vault = open(config)?;
            let protection = vault.protection();
            match action {
                EmergencyAction::Backup => print_json(&protection.create_emergency_backup().await?),
                EmergencyAction::Restore => {
                    print_json(&protection.restore_from_latest_backup().await?)
                }
                EmergencyAction::Verify => print_json(&protection.verify_and_fix().await?),
            }
        }
    }
}

async fn run(config: VaultConfig) -> anyhow::Result<()> {
    if !config.enabled {
        tracing::info!("docvault disabled by DOCVAULT_ENABLED, exiting");
        return Ok(());
    }

    tracing::info!("docvault starting up (root: {})", config.root.display());
    let vault = open(config)?;

    let status = vault.start().await;
    if !status.healthy {
        tracing::error!("startup health check reported issues: {:?}", status.issues);
    }
    match vault.system_status().await {
        Ok(system) => tracing::info!("system status: {}", serde_json::to_string(&system)?),
        Err(e) => tracing::warn!("cannot read system status: {}", e),
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    vault.stop().await;
    Ok(())
}

fn open(config: VaultConfig) -> anyhow::Result<Vault> {
    let root = config.root.display().to_string();
    Vault::open(config).with_context(|| format!("failed to open storage root {root}"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
