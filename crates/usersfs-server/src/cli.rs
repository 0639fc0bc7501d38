//! Command line surface.
//!
//! Flags override the config file, which overrides built-in defaults.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use usersfs_kernel::{BackingMode, ConfigError, EligibilityPolicy, MountConfig};

use crate::constants::DEFAULT_CONFIG_PATH;

/// The host account database as a directory tree.
///
/// Every account with an interactive login shell appears as a directory
/// holding `id`, `home`, `shell` and `info`. `mkdir` at the top level
/// creates an account and `rmdir` removes it (both need privilege).
/// Accounts created from a bare directory name get the default shell and
/// an empty comment; nothing else can be inferred from a name.
#[derive(Parser, Debug)]
#[command(name = "usersfs", version)]
pub struct Cli {
    /// Config file (TOML). Defaults to ~/.config/usersfs/config.toml if present.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Mount and serve until interrupted (default)
    Mount,
    /// Run one reconciliation pass and print the report
    Reconcile {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a file from the synthetic tree without mounting or writing
    Cat { path: PathBuf },
    /// List a directory from the synthetic tree without mounting or writing
    Ls {
        #[arg(default_value = "/")]
        path: PathBuf,
    },
    /// Print the effective configuration as JSON
    Config,
}

/// Flags layered over the config file.
#[derive(Args, Debug, Default, Clone, PartialEq)]
pub struct Overrides {
    /// Mount point
    #[arg(short, long, global = true)]
    pub mountpoint: Option<PathBuf>,

    /// Backing mode: synthetic or mirrored
    #[arg(long, global = true)]
    pub backing: Option<BackingMode>,

    /// Backing root for mirrored mode (implies --backing mirrored)
    #[arg(long, global = true)]
    pub backing_root: Option<PathBuf>,

    /// Mount read-only
    #[arg(long, global = true)]
    pub read_only: bool,

    /// Reconciliation period in milliseconds
    #[arg(long, global = true)]
    pub interval_ms: Option<u64>,

    /// Eligibility policy: shell-registry or shell-suffix
    #[arg(long, global = true)]
    pub policy: Option<EligibilityPolicy>,

    /// Lowest uid that may be deleted
    #[arg(long, global = true)]
    pub uid_threshold: Option<u32>,

    /// List accounts below the uid threshold
    #[arg(long, global = true)]
    pub expose_system_accounts: bool,

    /// Shell for accounts created from a directory name
    #[arg(long, global = true)]
    pub default_shell: Option<PathBuf>,

    /// Expose home_link symlinks
    #[arg(long, global = true)]
    pub home_links: bool,

    /// Do not watch the account database
    #[arg(long, global = true)]
    pub no_watch: bool,

    /// Allow account creation/deletion even when not root
    #[arg(long, global = true, conflicts_with = "unprivileged")]
    pub privileged: bool,

    /// Never create or delete accounts
    #[arg(long, global = true)]
    pub unprivileged: bool,
}

impl Overrides {
    pub fn apply(self, mut config: MountConfig) -> MountConfig {
        if let Some(mountpoint) = self.mountpoint {
            config.mountpoint = Some(mountpoint);
        }
        if let Some(root) = self.backing_root {
            config.backing_root = Some(root);
            config.backing = BackingMode::Mirrored;
        }
        if let Some(backing) = self.backing {
            config.backing = backing;
        }
        if let Some(ms) = self.interval_ms {
            config.reconcile_interval_ms = ms;
        }
        if let Some(policy) = self.policy {
            config.policy = policy;
        }
        if let Some(threshold) = self.uid_threshold {
            config.uid_threshold = threshold;
        }
        if let Some(shell) = self.default_shell {
            config.default_shell = shell;
        }
        config.read_only |= self.read_only;
        config.expose_system_accounts |= self.expose_system_accounts;
        config.home_links |= self.home_links;
        if self.no_watch {
            config.watch = false;
        }
        if self.privileged {
            config.privileged = Some(true);
        } else if self.unprivileged {
            config.privileged = Some(false);
        }
        config
    }
}

/// Load the config file (explicit or default), apply flags, validate.
///
/// A missing default file is not an error; a missing explicit one is.
pub fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<MountConfig, ConfigError> {
    let base = match path {
        Some(path) => MountConfig::load(path)?,
        None => match MountConfig::load(Path::new(DEFAULT_CONFIG_PATH)) {
            Ok(config) => config,
            Err(ConfigError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                MountConfig::default()
            }
            Err(e) => return Err(e),
        },
    };
    overrides.apply(base).validate()
}
