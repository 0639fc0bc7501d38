//! Mirrored backing storage.
//!
//! Each exposed account is a real directory under the backing root holding
//! real attribute files. The reconciler owns every write made here; the
//! driver only delegates user content below account directories.

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::accounts::AccountRecord;
use crate::constants::{ATTR_FILE_MODE, DIR_MODE, HOME_LINK, STATS_FILE};
use crate::resolver::{AttributeKind, MountStats};
use crate::vfs::{LocalBackend, VfsError, VfsOps, VfsResult};
use strum::IntoEnumIterator;

#[derive(Debug, Clone)]
pub struct MirrorStore {
    backend: LocalBackend,
    home_links: bool,
}

impl MirrorStore {
    /// Open (creating if needed) the backing root.
    pub async fn open(root: impl Into<PathBuf>, home_links: bool) -> VfsResult<Self> {
        let mut backend = LocalBackend::new(root);
        backend.ensure_root().await?;
        Ok(Self {
            backend,
            home_links,
        })
    }

    pub fn backend(&self) -> &LocalBackend {
        &self.backend
    }

    pub fn root(&self) -> &Path {
        self.backend.root()
    }

    /// Names of the account directories currently on disk.
    pub async fn directory_names(&self) -> VfsResult<Vec<String>> {
        self.backend.top_level_dirs().await
    }

    /// Create the account directory and write every attribute file.
    pub async fn populate(&self, record: &AccountRecord) -> VfsResult<()> {
        let dir = account_dir(&record.username);
        match self.backend.mkdir(&dir, DIR_MODE).await {
            Ok(_) => {}
            Err(VfsError::Io(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
        for kind in AttributeKind::iter() {
            self.backend
                .replace_file(&dir.join(kind.as_ref()), &kind.render(record), ATTR_FILE_MODE)
                .await?;
        }
        if self.home_links {
            self.backend
                .replace_symlink(&dir.join(HOME_LINK), &record.home)
                .await?;
        }
        debug!(user = %record.username, "populated account directory");
        Ok(())
    }

    /// Rewrite attribute files whose content no longer matches `record`.
    ///
    /// Returns true when anything was rewritten.
    pub async fn refresh(&self, record: &AccountRecord) -> VfsResult<bool> {
        let dir = account_dir(&record.username);
        let mut changed = false;

        for kind in AttributeKind::iter() {
            let path = dir.join(kind.as_ref());
            let expected = kind.render(record);
            let current = match self.backend.read_all(&path).await {
                Ok(bytes) => Some(bytes),
                Err(VfsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e),
            };
            if current.as_deref() != Some(expected.as_slice()) {
                self.backend
                    .replace_file(&path, &expected, ATTR_FILE_MODE)
                    .await?;
                changed = true;
            }
        }

        if self.home_links {
            let path = dir.join(HOME_LINK);
            let current = self.backend.readlink(&path).await.ok();
            if current.as_deref() != Some(record.home.as_path()) {
                self.backend.replace_symlink(&path, &record.home).await?;
                changed = true;
            }
        }

        if changed {
            debug!(user = %record.username, "refreshed stale attribute files");
        }
        Ok(changed)
    }

    /// Remove an account directory and everything inside it.
    pub async fn remove(&self, username: &str) -> VfsResult<()> {
        self.backend.remove_tree(&account_dir(username)).await
    }

    /// Write the stats file at the backing root.
    pub async fn write_stats(&self, stats: &MountStats) -> VfsResult<()> {
        self.backend
            .replace_file(&Path::new("/").join(STATS_FILE), &stats.render(), ATTR_FILE_MODE)
            .await
    }
}

fn account_dir(username: &str) -> PathBuf {
    Path::new("/").join(username)
}
