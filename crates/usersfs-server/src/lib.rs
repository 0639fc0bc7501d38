//! # usersfs-server
//!
//! Mounts the account tree from `usersfs-kernel` through FUSE.
//!
//! - [`fuse`]: inode ↔ path adapter implementing `fuser::Filesystem`
//! - [`session`]: mount lifecycle (initial pass, timer, watch, signals)
//! - [`watch`]: account database watcher
//! - [`cli`]: flags and config loading for the `usersfs` binary

pub mod cli;
pub mod constants;
pub mod fuse;
pub mod session;
pub mod watch;

pub use fuse::{FuseAdapter, InodeTable, errno};
pub use session::{MountSession, SessionError};
pub use watch::AccountWatchHandle;
