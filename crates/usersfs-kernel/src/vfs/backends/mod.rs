//! VFS backends.
//!
//! Backends implement [`VfsOps`](super::VfsOps) for storage that lives
//! outside the account database.

mod local;

pub use local::LocalBackend;
