//! Kernel constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Account database file.
pub const DEFAULT_PASSWD_PATH: &str = "/etc/passwd";

/// Shell registry file.
pub const DEFAULT_SHELLS_PATH: &str = "/etc/shells";

/// Shells assumed valid when the registry file is missing.
pub const FALLBACK_SHELLS: &[&str] = &["/bin/sh", "/bin/csh"];

/// Accounts with a uid below this are system accounts: never deleted,
/// hidden unless explicitly exposed.
pub const DEFAULT_UID_THRESHOLD: u32 = 1000;

/// Longest login name accepted for new accounts.
pub const MAX_USERNAME_LEN: usize = 31;

/// Shell given to accounts created from a bare directory name.
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Period of the background reconciliation timer.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_millis(200);

/// Upper bound on a single useradd/userdel invocation.
pub const DEFAULT_PROVISION_TIMEOUT: Duration = Duration::from_secs(30);

/// Name of the stats file at the filesystem root.
pub const STATS_FILE: &str = "stats";

/// Name of the home symlink inside an account directory.
pub const HOME_LINK: &str = "home_link";

/// Mount point used when running as root.
pub const ROOT_MOUNTPOINT: &str = "/opt/users";

/// Mount point directory name under `$HOME` otherwise.
pub const USER_MOUNTPOINT_DIR: &str = "users";

/// `useradd` exit status: login name already in use.
pub const USERADD_EXIT_NAME_IN_USE: i32 = 9;

/// `userdel` exit status: the account does not exist.
pub const USERDEL_EXIT_NO_SUCH_USER: i32 = 6;

/// Permissions of attribute files.
pub const ATTR_FILE_MODE: u32 = 0o444;

/// Permissions of account and root directories.
pub const DIR_MODE: u32 = 0o755;
