//! Mount configuration.
//!
//! Loaded from a TOML file where every field is optional, then overridden
//! by command-line flags in the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::constants::{
    DEFAULT_PASSWD_PATH, DEFAULT_PROVISION_TIMEOUT, DEFAULT_RECONCILE_INTERVAL, DEFAULT_SHELL,
    DEFAULT_SHELLS_PATH, DEFAULT_UID_THRESHOLD, ROOT_MOUNTPOINT, USER_MOUNTPOINT_DIR,
};
use crate::eligibility::{Eligibility, EligibilityPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("no home directory to place the mount point in")]
    NoHome,

    #[error("mirrored mode needs a backing root")]
    MissingBackingRoot,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Where per-account content lives.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackingMode {
    /// Everything computed on demand. Read-only content.
    #[default]
    Synthetic,
    /// Real directories under a backing root, kept in sync by the reconciler.
    Mirrored,
}

/// Mount configuration.
///
/// Accounts created from a bare directory name get `default_shell` and an
/// empty comment; nothing else about them can be inferred from the name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MountConfig {
    /// Mount point. `None` picks `/opt/users` as root, `~/users` otherwise.
    pub mountpoint: Option<PathBuf>,
    pub backing: BackingMode,
    /// Backing root for mirrored mode.
    pub backing_root: Option<PathBuf>,
    pub read_only: bool,
    /// Reconciliation timer period in milliseconds.
    pub reconcile_interval_ms: u64,
    pub policy: EligibilityPolicy,
    pub uid_threshold: u32,
    pub expose_system_accounts: bool,
    pub default_shell: PathBuf,
    /// Expose `home_link` symlinks in account directories.
    pub home_links: bool,
    /// Provisioning timeout in seconds.
    pub provision_timeout_secs: u64,
    /// Watch the account database for changes.
    pub watch: bool,
    pub passwd_path: PathBuf,
    pub shells_path: PathBuf,
    /// Allow account creation/deletion. `None` means "when running as root".
    pub privileged: Option<bool>,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            mountpoint: None,
            backing: BackingMode::default(),
            backing_root: None,
            read_only: false,
            reconcile_interval_ms: DEFAULT_RECONCILE_INTERVAL.as_millis() as u64,
            policy: EligibilityPolicy::default(),
            uid_threshold: DEFAULT_UID_THRESHOLD,
            expose_system_accounts: false,
            default_shell: PathBuf::from(DEFAULT_SHELL),
            home_links: false,
            provision_timeout_secs: DEFAULT_PROVISION_TIMEOUT.as_secs(),
            watch: true,
            passwd_path: PathBuf::from(DEFAULT_PASSWD_PATH),
            shells_path: PathBuf::from(DEFAULT_SHELLS_PATH),
            privileged: None,
        }
    }
}

impl MountConfig {
    /// Parse TOML text.
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a config file. `~` in the path is expanded.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let path = expand_path(path);
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&text, &path)
    }

    /// Check cross-field constraints and expand `~` in configured paths.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.reconcile_interval_ms == 0 {
            return Err(ConfigError::ZeroDuration("reconcile_interval_ms"));
        }
        if self.provision_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("provision_timeout_secs"));
        }
        if self.backing == BackingMode::Mirrored && self.backing_root.is_none() {
            return Err(ConfigError::MissingBackingRoot);
        }
        self.mountpoint = self.mountpoint.as_deref().map(expand_path);
        self.backing_root = self.backing_root.as_deref().map(expand_path);
        self.passwd_path = expand_path(&self.passwd_path);
        self.shells_path = expand_path(&self.shells_path);
        Ok(self)
    }

    /// The configured mount point, or the default for this process.
    pub fn resolved_mountpoint(&self) -> Result<PathBuf, ConfigError> {
        match &self.mountpoint {
            Some(path) => Ok(path.clone()),
            None => default_mountpoint(is_superuser()),
        }
    }

    /// Whether provisioning is allowed, falling back to the effective uid.
    pub fn is_privileged(&self) -> bool {
        self.privileged.unwrap_or_else(is_superuser)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }

    /// The shared eligibility value for this mount.
    pub fn eligibility(&self) -> Eligibility {
        Eligibility::new(self.policy)
            .with_uid_threshold(self.uid_threshold)
            .with_system_accounts(self.expose_system_accounts)
    }
}

/// Default mount point: `/opt/users` for root, `~/users` for everyone else.
pub fn default_mountpoint(superuser: bool) -> Result<PathBuf, ConfigError> {
    if superuser {
        return Ok(PathBuf::from(ROOT_MOUNTPOINT));
    }
    dirs::home_dir()
        .map(|home| home.join(USER_MOUNTPOINT_DIR))
        .ok_or(ConfigError::NoHome)
}

/// Whether the process runs with an effective uid of 0.
pub fn is_superuser() -> bool {
    rustix::process::geteuid().is_root()
}

fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(s) => PathBuf::from(shellexpand::tilde(s).as_ref()),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = MountConfig::from_toml("", Path::new("usersfs.toml")).unwrap();
        assert_eq!(config, MountConfig::default());
        assert_eq!(config.reconcile_interval(), Duration::from_millis(200));
        assert_eq!(config.provision_timeout(), Duration::from_secs(30));
        assert_eq!(config.default_shell, PathBuf::from("/bin/bash"));
    }

    #[test]
    fn test_parse_fields() {
        let text = r#"
            backing = "mirrored"
            backing_root = "/var/lib/usersfs"
            policy = "shell-suffix"
            uid_threshold = 500
            home_links = true
            privileged = false
        "#;
        let config = MountConfig::from_toml(text, Path::new("x.toml"))
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(config.backing, BackingMode::Mirrored);
        assert_eq!(config.policy, EligibilityPolicy::ShellSuffix);
        assert!(config.home_links);
        assert!(!config.is_privileged());

        let elig = config.eligibility();
        assert_eq!(elig.uid_threshold, 500);
        assert_eq!(elig.policy, EligibilityPolicy::ShellSuffix);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = MountConfig::from_toml("bogus = 1", Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate() {
        let config = MountConfig {
            backing: BackingMode::Mirrored,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingBackingRoot)));

        let config = MountConfig {
            reconcile_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroDuration(_))));
    }

    #[test]
    fn test_default_mountpoint() {
        assert_eq!(default_mountpoint(true).unwrap(), PathBuf::from("/opt/users"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(default_mountpoint(false).unwrap(), home.join("users"));
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("usersfs.toml");
        std::fs::write(&path, "read_only = true\nwatch = false\n").unwrap();
        let config = MountConfig::load(&path).unwrap();
        assert!(config.read_only);
        assert!(!config.watch);

        let err = MountConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
