//! Attribute, listing and open-flag types shared by every [`VfsOps`]
//! implementation.
//!
//! [`VfsOps`]: super::VfsOps

use std::time::SystemTime;

/// What a node is. Device nodes, sockets and fifos never appear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
    Symlink,
}

impl FileType {
    pub fn is_file(self) -> bool {
        self == FileType::File
    }

    pub fn is_dir(self) -> bool {
        self == FileType::Directory
    }

    pub fn is_symlink(self) -> bool {
        self == FileType::Symlink
    }
}

/// Node metadata as reported through `getattr`.
///
/// Synthetic nodes are stamped with the mount time; mirrored ones carry
/// the backing file's mtime.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttr {
    pub size: u64,
    pub kind: FileType,
    /// Permission bits only, e.g. `0o444`.
    pub perm: u32,
    pub mtime: SystemTime,
    pub nlink: u32,
    /// Owning account. `None` means "whoever mounted the filesystem".
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl FileAttr {
    fn node(kind: FileType, size: u64, perm: u32, nlink: u32) -> Self {
        Self {
            size,
            kind,
            perm,
            mtime: SystemTime::now(),
            nlink,
            uid: None,
            gid: None,
        }
    }

    pub fn file(size: u64, perm: u32) -> Self {
        Self::node(FileType::File, size, perm, 1)
    }

    /// Directories start with two links: their entry and `.`.
    pub fn directory(perm: u32) -> Self {
        Self::node(FileType::Directory, 0, perm, 2)
    }

    /// A symlink's size is the length of its target.
    pub fn symlink(target_len: u64) -> Self {
        Self::node(FileType::Symlink, target_len, 0o777, 1)
    }

    pub fn owned_by(self, uid: u32, gid: u32) -> Self {
        Self {
            uid: Some(uid),
            gid: Some(gid),
            ..self
        }
    }

    pub fn with_mtime(self, mtime: SystemTime) -> Self {
        Self { mtime, ..self }
    }

    pub fn is_file(&self) -> bool {
        self.kind.is_file()
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    pub fn is_symlink(&self) -> bool {
        self.kind.is_symlink()
    }
}

/// One name in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileType,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: FileType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, FileType::File)
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Directory)
    }

    pub fn symlink(name: impl Into<String>) -> Self {
        Self::new(name, FileType::Symlink)
    }

    /// The `.` and `..` entries every listing starts with.
    pub fn dots() -> [DirEntry; 2] {
        [Self::directory("."), Self::directory("..")]
    }
}

/// Access requested by an `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub truncate: bool,
}

impl Default for OpenFlags {
    /// Read-only.
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            truncate: false,
        }
    }
}

impl OpenFlags {
    /// Read-write, no truncation.
    pub fn write() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }

    /// Decode the access mode and `O_TRUNC` from `open(2)` flags.
    pub fn from_posix(flags: i32) -> Self {
        const O_ACCMODE: i32 = 0o3;
        const O_WRONLY: i32 = 0o1;
        const O_RDWR: i32 = 0o2;
        const O_TRUNC: i32 = 0o1000;

        let access = flags & O_ACCMODE;
        Self {
            read: access != O_WRONLY,
            write: access == O_WRONLY || access == O_RDWR,
            truncate: flags & O_TRUNC != 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type() {
        assert!(FileType::File.is_file());
        assert!(!FileType::File.is_dir());
        assert!(FileType::Directory.is_dir());
        assert!(FileType::Symlink.is_symlink());
    }

    #[test]
    fn test_file_attr_constructors() {
        let file = FileAttr::file(5, 0o444).owned_by(1000, 100);
        assert!(file.is_file());
        assert_eq!(file.size, 5);
        assert_eq!(file.uid, Some(1000));
        assert_eq!(file.gid, Some(100));

        let dir = FileAttr::directory(0o555);
        assert!(dir.is_dir());
        assert_eq!(dir.nlink, 2);
        assert_eq!(dir.uid, None);
    }

    #[test]
    fn test_dir_entry_dots() {
        let [dot, dotdot] = DirEntry::dots();
        assert_eq!(dot.name, ".");
        assert_eq!(dotdot.name, "..");
        assert!(dot.kind.is_dir());
    }

    #[test]
    fn test_open_flags_from_posix() {
        let ro = OpenFlags::from_posix(0);
        assert!(ro.read && !ro.write);

        let wo = OpenFlags::from_posix(0o1 | 0o1000);
        assert!(!wo.read && wo.write && wo.truncate);

        let rw = OpenFlags::from_posix(0o2);
        assert!(rw.read && rw.write && !rw.truncate);
    }
}
