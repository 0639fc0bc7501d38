//! The filesystem-callback contract.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::VfsResult;
use super::types::{DirEntry, FileAttr, OpenFlags};

/// Filesystem callbacks keyed by path.
///
/// Paths are absolute within the mounted tree (`/`, `/alice`, `/alice/id`).
/// Implementations keep no per-open state; reads and writes carry their
/// own offset.
#[async_trait]
pub trait VfsOps: Send + Sync {
    // ========================================================================
    // Reading
    // ========================================================================

    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr>;

    /// Read directory entries, `.` and `..` first.
    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>>;

    /// Check that `path` may be opened with `flags`.
    async fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<()>;

    /// Up to `size` bytes from `offset`; empty at or past the end.
    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>>;

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Returns the number of bytes written.
    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32>;

    /// Create an empty file; fails if it exists.
    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr>;

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr>;

    async fn unlink(&self, path: &Path) -> VfsResult<()>;

    async fn rmdir(&self, path: &Path) -> VfsResult<()>;

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()>;

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()>;

    /// Create a symbolic link at `path` pointing to `target`.
    async fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr>;

    /// Whether the mount refuses every write.
    fn read_only(&self) -> bool;

    // ========================================================================
    // Provided
    // ========================================================================

    async fn exists(&self, path: &Path) -> bool {
        self.getattr(path).await.is_ok()
    }

    /// Whole-file read sized by `getattr`.
    async fn read_all(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let attr = self.getattr(path).await?;
        self.read(path, 0, attr.size as u32).await
    }
}
