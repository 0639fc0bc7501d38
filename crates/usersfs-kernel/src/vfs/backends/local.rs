//! Local directory backend.
//!
//! Stores the mirrored tree on a real directory, with path security
//! to prevent escaping the backing root.

use async_trait::async_trait;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::ops::VfsOps;
use crate::vfs::types::{DirEntry, FileAttr, FileType, OpenFlags};

/// Local directory backend.
///
/// All operations are relative to `root`. With `root` at
/// `/var/lib/usersfs`, `read("/alice/id")` reads
/// `/var/lib/usersfs/alice/id`.
///
/// Attempts to escape via `..` or a symlinked parent are rejected with
/// [`VfsError::PathEscapesRoot`].
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
    read_only: bool,
}

impl LocalBackend {
    /// Create a backend rooted at the given path.
    ///
    /// The root is canonicalized when it already exists, so that prefix
    /// checks survive symlinked roots (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = root.canonicalize().unwrap_or(root);
        Self {
            root,
            read_only: false,
        }
    }

    /// Create a read-only backend.
    pub fn read_only(root: impl Into<PathBuf>) -> Self {
        Self {
            read_only: true,
            ..Self::new(root)
        }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if it is missing.
    pub async fn ensure_root(&mut self) -> VfsResult<()> {
        fs::create_dir_all(&self.root).await?;
        self.root = self.root.canonicalize()?;
        Ok(())
    }

    /// Map a filesystem path to a host path under the root.
    ///
    /// Lexical: `..` components are rejected outright, and the parent of
    /// an existing target is canonicalized to catch symlinked escapes.
    fn resolve(&self, path: &Path) -> VfsResult<PathBuf> {
        let rel = path.strip_prefix("/").unwrap_or(path);

        let mut full = self.root.clone();
        for component in rel.components() {
            match component {
                Component::Normal(part) => full.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(VfsError::path_escapes_root(path.display().to_string()));
                }
            }
        }

        if full == self.root {
            return Ok(full);
        }

        // Only the parent is followed; the final component may itself be a
        // symlink (home_link) and must be addressed, not traversed.
        if let Some(parent) = full.parent() {
            if let Ok(canonical) = parent.canonicalize() {
                if !canonical.starts_with(&self.root) {
                    return Err(VfsError::path_escapes_root(format!(
                        "{} is not under {}",
                        canonical.display(),
                        self.root.display()
                    )));
                }
            }
        }

        Ok(full)
    }

    fn check_writable(&self) -> VfsResult<()> {
        if self.read_only {
            Err(VfsError::ReadOnly)
        } else {
            Ok(())
        }
    }

    fn metadata_to_attr(meta: &std::fs::Metadata) -> FileAttr {
        let kind = if meta.file_type().is_symlink() {
            FileType::Symlink
        } else if meta.is_dir() {
            FileType::Directory
        } else {
            FileType::File
        };

        FileAttr {
            size: meta.len(),
            kind,
            perm: meta.permissions().mode() & 0o7777,
            mtime: meta.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
            nlink: meta.nlink() as u32,
            uid: Some(meta.uid()),
            gid: Some(meta.gid()),
        }
    }

    fn kind_of(file_type: std::fs::FileType) -> FileType {
        if file_type.is_symlink() {
            FileType::Symlink
        } else if file_type.is_dir() {
            FileType::Directory
        } else {
            FileType::File
        }
    }

    // ========================================================================
    // Whole-file helpers used by the mirror writer
    // ========================================================================

    /// Replace the contents of a file, creating it with `mode` if missing.
    ///
    /// Written to a sibling temp file and renamed over the target, so
    /// readers never observe a half-written attribute.
    pub async fn replace_file(&self, path: &Path, contents: &[u8], mode: u32) -> VfsResult<()> {
        self.check_writable()?;
        let full = self.resolve(path)?;
        let file_name = full
            .file_name()
            .ok_or_else(|| VfsError::invalid_path(path.display().to_string()))?;
        let tmp = full.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

        fs::write(&tmp, contents).await?;
        fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode)).await?;
        fs::rename(&tmp, &full).await?;
        Ok(())
    }

    /// Replace a symlink, removing whatever currently sits at `path`.
    pub async fn replace_symlink(&self, path: &Path, target: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let full = self.resolve(path)?;
        match fs::symlink_metadata(&full).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&full).await?,
            Ok(_) => fs::remove_file(&full).await?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::symlink(target, &full).await?;
        Ok(())
    }

    /// Remove a directory and everything below it. Missing is not an error.
    pub async fn remove_tree(&self, path: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let full = self.resolve(path)?;
        if full == self.root {
            return Err(VfsError::permission_denied("refusing to remove backing root"));
        }
        match fs::remove_dir_all(&full).await {
            Ok(()) => {
                debug!(path = %full.display(), "removed backing tree");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of directories directly under the root.
    pub async fn top_level_dirs(&self) -> VfsResult<Vec<String>> {
        let mut names = Vec::new();
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl VfsOps for LocalBackend {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        let full = self.resolve(path)?;
        let meta = fs::symlink_metadata(&full).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let full = self.resolve(path)?;
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full).await?;

        while let Some(entry) = dir.next_entry().await? {
            let kind = Self::kind_of(entry.file_type().await?);
            entries.push(DirEntry::new(
                entry.file_name().to_string_lossy().into_owned(),
                kind,
            ));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<()> {
        if flags.write || flags.truncate {
            self.check_writable()?;
        }
        let attr = self.getattr(path).await?;
        if attr.is_dir() && flags.write {
            return Err(VfsError::is_a_directory(path.display().to_string()));
        }
        if flags.truncate && attr.is_file() {
            self.truncate(path, 0).await?;
        }
        Ok(())
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let full = self.resolve(path)?;
        let mut file = fs::File::open(&full).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;

        let mut buffer = Vec::with_capacity(size as usize);
        file.take(size as u64).read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        let full = self.resolve(path)?;
        let meta = fs::symlink_metadata(&full).await?;
        if !meta.file_type().is_symlink() {
            return Err(VfsError::NotASymlink(path.display().to_string()));
        }
        Ok(fs::read_link(&full).await?)
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        use tokio::io::{AsyncSeekExt, AsyncWriteExt};

        self.check_writable()?;
        let full = self.resolve(path)?;

        let mut file = fs::OpenOptions::new().write(true).open(&full).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;

        Ok(data.len() as u32)
    }

    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        self.check_writable()?;
        let full = self.resolve(path)?;

        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&full)
            .await?;

        let meta = file.metadata().await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        self.check_writable()?;
        let full = self.resolve(path)?;

        fs::DirBuilder::new().mode(mode).create(&full).await?;

        let meta = fs::metadata(&full).await?;
        Ok(Self::metadata_to_attr(&meta))
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let full = self.resolve(path)?;
        Ok(fs::remove_file(&full).await?)
    }

    async fn rmdir(&self, path: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let full = self.resolve(path)?;
        Ok(fs::remove_dir(&full).await?)
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        self.check_writable()?;
        let from_full = self.resolve(from)?;
        let to_full = self.resolve(to)?;
        Ok(fs::rename(&from_full, &to_full).await?)
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        self.check_writable()?;
        let full = self.resolve(path)?;
        let file = fs::OpenOptions::new().write(true).open(&full).await?;
        Ok(file.set_len(size).await?)
    }

    async fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr> {
        self.check_writable()?;
        let full = self.resolve(path)?;
        fs::symlink(target, &full).await?;
        self.getattr(path).await
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LocalBackend) {
        let dir = TempDir::new().expect("create temp dir");
        let backend = LocalBackend::new(dir.path());
        (dir, backend)
    }

    #[tokio::test]
    async fn test_create_write_read() {
        let (_dir, backend) = setup();

        backend.create(Path::new("/notes"), 0o644).await.unwrap();
        backend.write(Path::new("/notes"), 0, b"hello world").await.unwrap();

        let data = backend.read(Path::new("/notes"), 6, 100).await.unwrap();
        assert_eq!(data, b"world");
        let past_end = backend.read(Path::new("/notes"), 50, 10).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn test_readdir_sorted() {
        let (_dir, backend) = setup();
        backend.mkdir(Path::new("/zed"), 0o755).await.unwrap();
        backend.mkdir(Path::new("/amy"), 0o755).await.unwrap();
        backend.create(Path::new("/amy/id"), 0o444).await.unwrap();

        let names: Vec<_> = backend
            .readdir(Path::new("/"))
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["amy", "zed"]);
        assert_eq!(backend.top_level_dirs().await.unwrap(), vec!["amy", "zed"]);
    }

    #[tokio::test]
    async fn test_parent_dir_rejected() {
        let (_dir, backend) = setup();
        let err = backend.getattr(Path::new("/../etc/passwd")).await.unwrap_err();
        assert!(matches!(err, VfsError::PathEscapesRoot(_)));
    }

    #[tokio::test]
    async fn test_symlinked_parent_rejected() {
        let (dir, backend) = setup();
        let outside = TempDir::new().unwrap();
        std::fs::write(outside.path().join("secret"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let err = backend.read(Path::new("/escape/secret"), 0, 10).await.unwrap_err();
        assert!(matches!(err, VfsError::PathEscapesRoot(_)));
    }

    #[tokio::test]
    async fn test_replace_file_and_symlink() {
        let (_dir, backend) = setup();
        backend.mkdir(Path::new("/amy"), 0o755).await.unwrap();

        backend.replace_file(Path::new("/amy/id"), b"1000\n", 0o444).await.unwrap();
        backend.replace_file(Path::new("/amy/id"), b"1001\n", 0o444).await.unwrap();
        assert_eq!(backend.read_all(Path::new("/amy/id")).await.unwrap(), b"1001\n");
        assert_eq!(backend.getattr(Path::new("/amy/id")).await.unwrap().perm, 0o444);

        backend.replace_symlink(Path::new("/amy/home_link"), Path::new("/home/amy")).await.unwrap();
        backend.replace_symlink(Path::new("/amy/home_link"), Path::new("/home/amy2")).await.unwrap();
        assert_eq!(
            backend.readlink(Path::new("/amy/home_link")).await.unwrap(),
            PathBuf::from("/home/amy2")
        );
        assert!(backend.getattr(Path::new("/amy/home_link")).await.unwrap().is_symlink());
    }

    #[tokio::test]
    async fn test_readlink_on_file() {
        let (_dir, backend) = setup();
        backend.create(Path::new("/plain"), 0o644).await.unwrap();
        let err = backend.readlink(Path::new("/plain")).await.unwrap_err();
        assert!(matches!(err, VfsError::NotASymlink(_)));
    }

    #[tokio::test]
    async fn test_remove_tree() {
        let (_dir, backend) = setup();
        backend.mkdir(Path::new("/amy"), 0o755).await.unwrap();
        backend.create(Path::new("/amy/id"), 0o444).await.unwrap();

        backend.remove_tree(Path::new("/amy")).await.unwrap();
        assert!(!backend.exists(Path::new("/amy")).await);
        // Second removal is a no-op.
        backend.remove_tree(Path::new("/amy")).await.unwrap();

        let err = backend.remove_tree(Path::new("/")).await.unwrap_err();
        assert!(matches!(err, VfsError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_read_only() {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::read_only(dir.path());

        let result = backend.create(Path::new("/test.txt"), 0o644).await;
        assert!(matches!(result, Err(VfsError::ReadOnly)));
        let result = backend.open(Path::new("/"), OpenFlags::write()).await;
        assert!(matches!(result, Err(VfsError::ReadOnly)));
    }

    #[tokio::test]
    async fn test_open_truncate() {
        let (_dir, backend) = setup();
        backend.create(Path::new("/f"), 0o644).await.unwrap();
        backend.write(Path::new("/f"), 0, b"abc").await.unwrap();

        let flags = OpenFlags {
            truncate: true,
            ..OpenFlags::write()
        };
        backend.open(Path::new("/f"), flags).await.unwrap();
        assert_eq!(backend.getattr(Path::new("/f")).await.unwrap().size, 0);
    }
}
