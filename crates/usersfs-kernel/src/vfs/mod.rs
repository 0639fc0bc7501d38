//! Virtual Filesystem abstraction.
//!
//! Key components:
//!
//! - [`VfsOps`] - The filesystem-callback contract
//! - [`LocalBackend`] - Real directory access with path security, used as
//!   the mirrored-mode backing store
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: Operations use paths, not inode numbers.
//!   The FUSE adapter handles inode ↔ path mapping locally.
//! - **Explicit offset/size**: Read/write take offset and size, so no
//!   per-handle state is kept on this side.

pub mod backends;
mod error;
mod ops;
mod types;

pub use backends::LocalBackend;
pub use error::{VfsError, VfsResult};
pub use ops::VfsOps;
pub use types::{DirEntry, FileAttr, FileType, OpenFlags};
