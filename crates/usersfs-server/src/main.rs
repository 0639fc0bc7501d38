//! usersfs binary
//!
//! ## Usage
//!
//! ```bash
//! # Mount at the default location (~/users, or /opt/users as root)
//! usersfs
//!
//! # Mirrored mode with a backing root
//! usersfs --backing-root /var/lib/usersfs mount
//!
//! # One reconciliation pass, JSON report
//! usersfs reconcile --json
//!
//! # Inspect without mounting
//! usersfs ls /
//! usersfs cat /alice/info
//! ```

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use usersfs_kernel::{FileType, MountConfig, ReconcileReport, UsersFs, VfsOps};

use usersfs_server::MountSession;
use usersfs_server::cli::{Cli, Command, load_config};
use usersfs_server::session::{host_backends, inspection_config, prepare};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.overrides)
        .context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Mount) {
        Command::Mount => cmd_mount(config).await,
        Command::Reconcile { json } => cmd_reconcile(&config, json).await,
        Command::Cat { path } => cmd_cat(&config, &path).await,
        Command::Ls { path } => cmd_ls(&config, &path).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn cmd_mount(config: MountConfig) -> Result<()> {
    let session = MountSession::start(config)
        .await
        .context("failed to mount")?;
    tracing::info!(mountpoint = %session.mountpoint().display(), "ready");
    session.run_until_signal().await?;
    Ok(())
}

async fn cmd_reconcile(config: &MountConfig, json: bool) -> Result<()> {
    let (source, provisioner) = host_backends(config);
    let (_, report) = prepare(config, source, provisioner)
        .await
        .context("reconciliation failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if !report.failures.is_empty() {
        anyhow::bail!("{} account(s) failed to reconcile", report.failures.len());
    }
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    println!("generation: {}", report.generation);
    let sections = [
        ("created", &report.created),
        ("deleted", &report.deleted),
        ("populated", &report.populated),
        ("restored", &report.restored),
        ("removed", &report.removed),
        ("refreshed", &report.refreshed),
        ("skipped", &report.skipped),
    ];
    for (label, names) in sections {
        if !names.is_empty() {
            println!("{label}: {}", names.join(" "));
        }
    }
    for failure in &report.failures {
        println!("failed: {}: {}", failure.name, failure.error);
    }
}

/// A synthetic driver for inspection. Writes nothing.
async fn inspect(config: &MountConfig) -> Result<Arc<UsersFs>> {
    let config = inspection_config(config);
    let (source, provisioner) = host_backends(&config);
    let (fs, _) = prepare(&config, source, provisioner).await?;
    Ok(fs)
}

async fn cmd_cat(config: &MountConfig, path: &Path) -> Result<()> {
    let fs = inspect(config).await?;
    let bytes = fs
        .read_all(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    std::io::stdout().write_all(&bytes)?;
    Ok(())
}

async fn cmd_ls(config: &MountConfig, path: &Path) -> Result<()> {
    let fs = inspect(config).await?;
    let entries = fs
        .readdir(path)
        .await
        .with_context(|| format!("cannot list {}", path.display()))?;
    for entry in entries.iter().filter(|e| e.name != "." && e.name != "..") {
        let suffix = match entry.kind {
            FileType::Directory => "/",
            FileType::Symlink => "@",
            FileType::File => "",
        };
        println!("{}{suffix}", entry.name);
    }
    Ok(())
}
