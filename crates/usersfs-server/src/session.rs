//! Mount session lifecycle.
//!
//! ```text
//!   start ──► build driver ──► initial pass ──► spawn FUSE session
//!                                                  │
//!             periodic timer ◄─────────────────────┤
//!             passwd watch   ◄─────────────────────┤
//!             SIGHUP         ◄─────────────────────┘
//!   SIGINT/SIGTERM ──► stop timer + watch ──► unmount
//! ```
//!
//! [`MountSession::start`] returns once the initial pass has completed and
//! the FUSE session is serving, so callers can report readiness.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fuser::{BackgroundSession, MountOption};
use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use usersfs_kernel::{
    AccountSource, BackingMode, CommandProvisioner, ConfigError, MountConfig, PasswdSource,
    PeriodicHandle, Provisioner, ReconcileReport, UsersFs, VfsError,
};

use crate::constants::FS_NAME;
use crate::fuse::FuseAdapter;
use crate::watch::{AccountWatchHandle, watch_accounts};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Vfs(#[from] VfsError),

    #[error("failed to mount at {path}: {source}")]
    Mount {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to watch account database: {0}")]
    Watch(#[from] notify::Error),

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

/// Mount options for a configuration.
pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(FS_NAME.to_string()),
        MountOption::AutoUnmount,
        MountOption::DefaultPermissions,
    ];
    if config.read_only {
        options.push(MountOption::RO);
    }
    options
}

/// The host account database and provisioning tools for a configuration.
pub fn host_backends(config: &MountConfig) -> (Arc<dyn AccountSource>, Arc<dyn Provisioner>) {
    (
        Arc::new(PasswdSource::new(&config.passwd_path, &config.shells_path)),
        Arc::new(CommandProvisioner::default()),
    )
}

/// `config` reduced to a synthetic, read-only, unprivileged tree. Building
/// it touches neither the backing root nor the account database.
pub fn inspection_config(config: &MountConfig) -> MountConfig {
    MountConfig {
        backing: BackingMode::Synthetic,
        backing_root: None,
        read_only: true,
        privileged: Some(false),
        watch: false,
        ..config.clone()
    }
}

/// Build the driver and run the mount-time pass without mounting.
pub async fn prepare(
    config: &MountConfig,
    source: Arc<dyn AccountSource>,
    provisioner: Arc<dyn Provisioner>,
) -> Result<(Arc<UsersFs>, ReconcileReport), SessionError> {
    let fs = usersfs_kernel::build(config, source, provisioner).await?;
    let report = fs.reconciler().initialize(fs.stats()).await?;
    info!(
        mode = %fs.mode(),
        generation = report.generation,
        populated = report.populated.len(),
        failures = report.failures.len(),
        "initial reconciliation complete"
    );
    Ok((Arc::new(fs), report))
}

/// A mounted tree and its background tasks.
pub struct MountSession {
    fs: Arc<UsersFs>,
    mountpoint: PathBuf,
    fuse: BackgroundSession,
    periodic: PeriodicHandle,
    watcher: Option<AccountWatchHandle>,
}

impl MountSession {
    /// Mount against the host account database.
    pub async fn start(config: MountConfig) -> Result<Self, SessionError> {
        let (source, provisioner) = host_backends(&config);
        Self::start_with(config, source, provisioner).await
    }

    /// Mount with explicit collaborators.
    pub async fn start_with(
        config: MountConfig,
        source: Arc<dyn AccountSource>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Result<Self, SessionError> {
        let config = config.validate()?;
        let mountpoint = config.resolved_mountpoint()?;
        tokio::fs::create_dir_all(&mountpoint)
            .await
            .map_err(|source| SessionError::Mount {
                path: mountpoint.clone(),
                source,
            })?;

        let (fs, _) = prepare(&config, source, provisioner).await?;

        let adapter = FuseAdapter::new(Arc::clone(&fs), tokio::runtime::Handle::current());
        let fuse = fuser::spawn_mount2(adapter, &mountpoint, &mount_options(&config)).map_err(
            |source| SessionError::Mount {
                path: mountpoint.clone(),
                source,
            },
        )?;

        let periodic = fs.reconciler().spawn_periodic(config.reconcile_interval());
        let watcher = if config.watch {
            Some(watch_accounts(
                Arc::clone(fs.reconciler()),
                &config.passwd_path,
            )?)
        } else {
            None
        };

        info!(
            mountpoint = %mountpoint.display(),
            mode = %fs.mode(),
            read_only = config.read_only,
            privileged = fs.reconciler().is_privileged(),
            "usersfs mounted"
        );

        Ok(Self {
            fs,
            mountpoint,
            fuse,
            periodic,
            watcher,
        })
    }

    pub fn fs(&self) -> &Arc<UsersFs> {
        &self.fs
    }

    pub fn mountpoint(&self) -> &Path {
        &self.mountpoint
    }

    /// Serve until SIGINT or SIGTERM. SIGHUP runs an extra pass.
    pub async fn run_until_signal(self) -> Result<(), SessionError> {
        let mut hangup = signal(SignalKind::hangup()).map_err(SessionError::Signal)?;
        let mut terminate = signal(SignalKind::terminate()).map_err(SessionError::Signal)?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted");
                    break;
                }
                _ = terminate.recv() => {
                    info!("terminated");
                    break;
                }
                _ = hangup.recv() => {
                    match self.fs.reconciler().reconcile().await {
                        Ok(report) => info!(generation = report.generation, "pass on SIGHUP"),
                        Err(e) => warn!(error = %e, "pass on SIGHUP failed"),
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stop background tasks and unmount.
    pub async fn shutdown(self) {
        if let Some(watcher) = self.watcher {
            watcher.stop();
        }
        self.periodic.stop().await;
        // Dropping the background session unmounts.
        drop(self.fuse);
        info!(mountpoint = %self.mountpoint.display(), "usersfs unmounted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usersfs_kernel::{MemoryAccounts, VfsOps};

    #[test]
    fn test_mount_options_follow_read_only() {
        let config = MountConfig::default();
        let options = mount_options(&config);
        assert!(options.contains(&MountOption::AutoUnmount));
        assert!(!options.contains(&MountOption::RO));

        let config = MountConfig {
            read_only: true,
            ..Default::default()
        };
        assert!(mount_options(&config).contains(&MountOption::RO));
    }

    #[tokio::test]
    async fn test_prepare_runs_initial_pass() {
        let db = MemoryAccounts::new().with_shells(["/bin/sh"]);
        db.add("alice", 1000, "/bin/sh");
        let db = Arc::new(db);

        let dir = tempfile::TempDir::new().unwrap();
        let config = MountConfig {
            backing: BackingMode::Mirrored,
            backing_root: Some(dir.path().to_path_buf()),
            privileged: Some(false),
            ..Default::default()
        };
        let (fs, report) = prepare(&config, db.clone(), db).await.unwrap();
        assert_eq!(report.populated, vec!["alice"]);

        assert_eq!(fs.reconciler().snapshot().generation, 1);
        assert!(dir.path().join("alice/id").exists());
        assert!(dir.path().join("stats").exists());
        assert_eq!(
            fs.read_all(Path::new("/alice/shell")).await.unwrap(),
            b"/bin/sh\n"
        );
    }

    #[tokio::test]
    async fn test_inspection_leaves_backing_root_alone() {
        let db = MemoryAccounts::new().with_shells(["/bin/sh"]);
        db.add("alice", 1000, "/bin/sh");
        let db = Arc::new(db);

        let dir = tempfile::TempDir::new().unwrap();
        // A mirrored pass would turn this into an account.
        std::fs::create_dir(dir.path().join("dave")).unwrap();
        let config = MountConfig {
            backing: BackingMode::Mirrored,
            backing_root: Some(dir.path().to_path_buf()),
            privileged: Some(true),
            ..Default::default()
        };

        let (fs, _) = prepare(&inspection_config(&config), db.clone(), db.clone())
            .await
            .unwrap();
        assert_eq!(
            fs.read_all(Path::new("/alice/shell")).await.unwrap(),
            b"/bin/sh\n"
        );
        assert!(fs.read_only());
        assert!(!dir.path().join("stats").exists());
        assert!(!dir.path().join("alice").exists());
        assert_eq!(db.names(), vec!["alice"]);
    }
}
