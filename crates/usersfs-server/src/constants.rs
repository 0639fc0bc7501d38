//! Server constants.
//!
//! Kernel-side caching and mount naming.

use std::time::Duration;

/// How long the kernel may cache entries and attributes.
///
/// Kept short: account directories appear and vanish between passes.
pub const ATTR_TTL: Duration = Duration::from_secs(1);

/// Filesystem name shown in the mount table.
pub const FS_NAME: &str = "usersfs";

/// Block size reported in attributes.
pub const BLOCK_SIZE: u32 = 512;

/// Poll interval for the account database watcher fallback.
pub const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Events closer together than this collapse into one pass.
pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(100);

/// Default config file, `~` expanded.
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/usersfs/config.toml";
