//! FUSE adapter.
//!
//! The kernel speaks inodes; [`UsersFs`] speaks paths. The adapter keeps a
//! bidirectional inode ↔ path table and forwards each callback to the
//! driver. Most callbacks block the session thread on the tokio runtime.
//! mkdir and rmdir provision accounts, so they run as runtime tasks and
//! reply from there, leaving the session free for reads.
//!
//! Inodes are never reused. The table counts the lookups the kernel holds
//! on each inode and evicts it when `forget` brings that count to zero.
//! Inodes handed out only in a listing hold no lookups; they are evicted
//! when the directory handle is released.
//!
//! `opendir` captures the directory listing under a fresh handle, and every
//! `readdir` on that handle pages through the same capture. A
//! reconciliation pass between two pages cannot shift the offsets.

use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use fuser::{
    FUSE_ROOT_ID, FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate,
    ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyWrite, Request, TimeOrNow,
};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use usersfs_kernel::vfs;
use usersfs_kernel::{OpenFlags, UsersFs, VfsError, VfsOps, VfsResult};

use crate::constants::{ATTR_TTL, BLOCK_SIZE};

// ============================================================================
// Errno mapping
// ============================================================================

/// The errno reported to the kernel for a driver error.
pub fn errno(e: &VfsError) -> libc::c_int {
    match e {
        VfsError::NotFound(_) => libc::ENOENT,
        VfsError::AlreadyExists(_) => libc::EEXIST,
        VfsError::PermissionDenied(_) => libc::EPERM,
        VfsError::ReadOnly => libc::EROFS,
        VfsError::NotSupported(_) => libc::ENOTSUP,
        VfsError::NotADirectory(_) => libc::ENOTDIR,
        VfsError::IsADirectory(_) => libc::EISDIR,
        VfsError::NotASymlink(_) | VfsError::InvalidPath(_) => libc::EINVAL,
        VfsError::PathEscapesRoot(_) => libc::EACCES,
        VfsError::Provisioning(_) | VfsError::Account(_) => libc::EIO,
        VfsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
    }
}

// ============================================================================
// Inode table
// ============================================================================

#[derive(Debug)]
struct Node {
    path: PathBuf,
    /// Lookups the kernel holds and has not forgotten yet.
    lookups: u64,
}

/// Bidirectional inode ↔ path map. The root is always [`FUSE_ROOT_ID`] and
/// is never evicted.
#[derive(Debug)]
pub struct InodeTable {
    nodes: HashMap<u64, Node>,
    inodes: HashMap<PathBuf, u64>,
    next: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let root = PathBuf::from("/");
        Self {
            nodes: HashMap::from([(
                FUSE_ROOT_ID,
                Node {
                    path: root.clone(),
                    lookups: 0,
                },
            )]),
            inodes: HashMap::from([(root, FUSE_ROOT_ID)]),
            next: FUSE_ROOT_ID + 1,
        }
    }

    pub fn path(&self, ino: u64) -> Option<&Path> {
        self.nodes.get(&ino).map(|node| node.path.as_path())
    }

    /// The inode for `path`, allocating one on first sight. Does not count
    /// as a kernel lookup.
    pub fn intern(&mut self, path: &Path) -> u64 {
        if let Some(&ino) = self.inodes.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.nodes.insert(
            ino,
            Node {
                path: path.to_path_buf(),
                lookups: 0,
            },
        );
        self.inodes.insert(path.to_path_buf(), ino);
        ino
    }

    /// Intern `path` for a reply that hands the kernel a lookup reference
    /// (lookup, create, mkdir, symlink).
    pub fn lookup(&mut self, path: &Path) -> u64 {
        let ino = self.intern(path);
        if let Some(node) = self.nodes.get_mut(&ino) {
            node.lookups += 1;
        }
        ino
    }

    #[cfg(test)]
    fn lookups(&self, ino: u64) -> u64 {
        self.nodes.get(&ino).map_or(0, |node| node.lookups)
    }

    /// Drop `nlookup` references. Returns true if the inode was evicted.
    pub fn forget(&mut self, ino: u64, nlookup: u64) -> bool {
        if ino == FUSE_ROOT_ID {
            return false;
        }
        let Some(node) = self.nodes.get_mut(&ino) else {
            return false;
        };
        node.lookups = node.lookups.saturating_sub(nlookup);
        if node.lookups > 0 {
            return false;
        }
        self.evict(ino);
        true
    }

    /// Evict `ino` if the kernel holds no lookups on it.
    pub fn release_unreferenced(&mut self, ino: u64) -> bool {
        if ino == FUSE_ROOT_ID || self.nodes.get(&ino).is_none_or(|node| node.lookups > 0) {
            return false;
        }
        self.evict(ino);
        true
    }

    fn evict(&mut self, ino: u64) {
        if let Some(node) = self.nodes.remove(&ino) {
            if self.inodes.get(&node.path) == Some(&ino) {
                self.inodes.remove(&node.path);
            }
        }
    }

    /// Drop `path` and everything below it.
    pub fn remove(&mut self, path: &Path) {
        let gone: Vec<PathBuf> = self
            .inodes
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        for p in gone {
            if let Some(ino) = self.inodes.remove(&p) {
                self.nodes.remove(&ino);
            }
        }
    }

    /// Move `from` (and its descendants) to `to`, keeping inode numbers and
    /// lookup counts.
    ///
    /// Whatever `to` pointed at before is dropped.
    pub fn rename(&mut self, from: &Path, to: &Path) {
        if from == to {
            return;
        }
        self.remove(to);
        let moved: Vec<(PathBuf, u64)> = self
            .inodes
            .iter()
            .filter(|(p, _)| p.starts_with(from))
            .map(|(p, &ino)| (p.clone(), ino))
            .collect();
        for (old, ino) in moved {
            let Ok(rest) = old.strip_prefix(from) else {
                continue;
            };
            let new = if rest.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(rest)
            };
            self.inodes.remove(&old);
            self.inodes.insert(new.clone(), ino);
            if let Some(node) = self.nodes.get_mut(&ino) {
                node.path = new;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// One listing entry as handed to the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listed {
    pub ino: u64,
    /// Offset of the *next* entry.
    pub offset: i64,
    pub kind: FileType,
    pub name: String,
}

fn page(entries: &[Listed], offset: i64) -> Vec<Listed> {
    let skip = usize::try_from(offset).unwrap_or(0);
    entries.iter().skip(skip).cloned().collect()
}

fn fuse_kind(kind: vfs::FileType) -> FileType {
    match kind {
        vfs::FileType::File => FileType::RegularFile,
        vfs::FileType::Directory => FileType::Directory,
        vfs::FileType::Symlink => FileType::Symlink,
    }
}

/// State shared between the session thread and spawned callbacks.
struct Shared {
    fs: Arc<UsersFs>,
    inodes: RwLock<InodeTable>,
    /// Listings captured at `opendir`, by handle.
    listings: Mutex<HashMap<u64, Arc<[Listed]>>>,
    next_fh: AtomicU64,
    uid: u32,
    gid: u32,
}

impl Shared {
    fn path_of(&self, ino: u64) -> VfsResult<PathBuf> {
        self.inodes
            .read()
            .path(ino)
            .map(Path::to_path_buf)
            .ok_or_else(|| VfsError::not_found(format!("inode {ino}")))
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> VfsResult<PathBuf> {
        Ok(self.path_of(parent)?.join(name))
    }

    /// Kernel attributes for a driver attribute. Unowned nodes belong to the
    /// mounting process.
    fn to_fuse_attr(&self, ino: u64, attr: &vfs::FileAttr) -> FileAttr {
        FileAttr {
            ino,
            size: attr.size,
            blocks: attr.size.div_ceil(u64::from(BLOCK_SIZE)),
            atime: attr.mtime,
            mtime: attr.mtime,
            ctime: attr.mtime,
            crtime: attr.mtime,
            kind: fuse_kind(attr.kind),
            perm: (attr.perm & 0o7777) as u16,
            nlink: attr.nlink,
            uid: attr.uid.unwrap_or(self.uid),
            gid: attr.gid.unwrap_or(self.gid),
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Attributes for a reply that hands the kernel a lookup on `path`.
    fn entry_for(&self, path: &Path, attr: &vfs::FileAttr) -> FileAttr {
        let ino = self.inodes.write().lookup(path);
        self.to_fuse_attr(ino, attr)
    }

    async fn make_dir(&self, parent: u64, name: &OsStr, mode: u32) -> VfsResult<FileAttr> {
        let path = self.child_of(parent, name)?;
        let attr = self.fs.mkdir(&path, mode).await?;
        Ok(self.entry_for(&path, &attr))
    }

    async fn remove_dir(&self, parent: u64, name: &OsStr) -> VfsResult<()> {
        let path = self.child_of(parent, name)?;
        self.fs.rmdir(&path).await?;
        self.inodes.write().remove(&path);
        Ok(())
    }
}

/// `fuser::Filesystem` over a [`UsersFs`].
pub struct FuseAdapter {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl FuseAdapter {
    /// Wrap a driver. `runtime` must outlive the session; callbacks block on
    /// it or spawn onto it.
    pub fn new(fs: Arc<UsersFs>, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                fs,
                inodes: RwLock::new(InodeTable::new()),
                listings: Mutex::new(HashMap::new()),
                next_fh: AtomicU64::new(1),
                uid: rustix::process::getuid().as_raw(),
                gid: rustix::process::getgid().as_raw(),
            }),
            runtime,
        }
    }

    pub fn fs(&self) -> &Arc<UsersFs> {
        &self.shared.fs
    }

    pub fn inode_count(&self) -> usize {
        self.shared.inodes.read().len()
    }

    pub fn lookup_entry(&self, parent: u64, name: &OsStr) -> VfsResult<FileAttr> {
        let path = self.shared.child_of(parent, name)?;
        let attr = self.runtime.block_on(self.shared.fs.getattr(&path))?;
        Ok(self.shared.entry_for(&path, &attr))
    }

    /// Drop lookups the kernel no longer holds.
    pub fn forget_inode(&self, ino: u64, nlookup: u64) {
        if self.shared.inodes.write().forget(ino, nlookup) {
            debug!(ino, "inode evicted");
        }
    }

    pub fn attr_of(&self, ino: u64) -> VfsResult<FileAttr> {
        let path = self.shared.path_of(ino)?;
        let attr = self.runtime.block_on(self.shared.fs.getattr(&path))?;
        Ok(self.shared.to_fuse_attr(ino, &attr))
    }

    pub fn resize(&self, ino: u64, size: u64) -> VfsResult<FileAttr> {
        let path = self.shared.path_of(ino)?;
        self.runtime.block_on(self.shared.fs.truncate(&path, size))?;
        self.attr_of(ino)
    }

    pub fn open_path(&self, ino: u64, flags: i32) -> VfsResult<()> {
        let path = self.shared.path_of(ino)?;
        self.runtime
            .block_on(self.shared.fs.open(&path, OpenFlags::from_posix(flags)))
    }

    pub fn read_at(&self, ino: u64, offset: i64, size: u32) -> VfsResult<Vec<u8>> {
        let path = self.shared.path_of(ino)?;
        let offset = u64::try_from(offset).map_err(|_| VfsError::invalid_path("negative offset"))?;
        self.runtime.block_on(self.shared.fs.read(&path, offset, size))
    }

    pub fn write_at(&self, ino: u64, offset: i64, data: &[u8]) -> VfsResult<u32> {
        let path = self.shared.path_of(ino)?;
        let offset = u64::try_from(offset).map_err(|_| VfsError::invalid_path("negative offset"))?;
        self.runtime.block_on(self.shared.fs.write(&path, offset, data))
    }

    pub fn create_file(&self, parent: u64, name: &OsStr, mode: u32) -> VfsResult<FileAttr> {
        let path = self.shared.child_of(parent, name)?;
        let attr = self.runtime.block_on(self.shared.fs.create(&path, mode))?;
        Ok(self.shared.entry_for(&path, &attr))
    }

    pub fn make_dir(&self, parent: u64, name: &OsStr, mode: u32) -> VfsResult<FileAttr> {
        self.runtime.block_on(self.shared.make_dir(parent, name, mode))
    }

    /// Run mkdir on the runtime and hand the result to `done` there.
    pub fn spawn_make_dir<F>(&self, parent: u64, name: &OsStr, mode: u32, done: F) -> JoinHandle<()>
    where
        F: FnOnce(VfsResult<FileAttr>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let name = name.to_os_string();
        self.runtime
            .spawn(async move { done(shared.make_dir(parent, &name, mode).await) })
    }

    pub fn remove_file(&self, parent: u64, name: &OsStr) -> VfsResult<()> {
        let path = self.shared.child_of(parent, name)?;
        self.runtime.block_on(self.shared.fs.unlink(&path))?;
        self.shared.inodes.write().remove(&path);
        Ok(())
    }

    pub fn remove_dir(&self, parent: u64, name: &OsStr) -> VfsResult<()> {
        self.runtime.block_on(self.shared.remove_dir(parent, name))
    }

    /// Run rmdir on the runtime and hand the result to `done` there.
    pub fn spawn_remove_dir<F>(&self, parent: u64, name: &OsStr, done: F) -> JoinHandle<()>
    where
        F: FnOnce(VfsResult<()>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let name = name.to_os_string();
        self.runtime
            .spawn(async move { done(shared.remove_dir(parent, &name).await) })
    }

    pub fn move_entry(
        &self,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
    ) -> VfsResult<()> {
        let from = self.shared.child_of(parent, name)?;
        let to = self.shared.child_of(newparent, newname)?;
        self.runtime.block_on(self.shared.fs.rename(&from, &to))?;
        self.shared.inodes.write().rename(&from, &to);
        Ok(())
    }

    pub fn make_symlink(&self, parent: u64, name: &OsStr, target: &Path) -> VfsResult<FileAttr> {
        let path = self.shared.child_of(parent, name)?;
        let attr = self.runtime.block_on(self.shared.fs.symlink(&path, target))?;
        Ok(self.shared.entry_for(&path, &attr))
    }

    pub fn link_target(&self, ino: u64) -> VfsResult<PathBuf> {
        let path = self.shared.path_of(ino)?;
        self.runtime.block_on(self.shared.fs.readlink(&path))
    }

    /// The whole listing of directory `ino`, as of now.
    fn listing_of(&self, ino: u64) -> VfsResult<Vec<Listed>> {
        let path = self.shared.path_of(ino)?;
        let entries = self.runtime.block_on(self.shared.fs.readdir(&path))?;

        let mut inodes = self.shared.inodes.write();
        let listed = entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| {
                let entry_ino = match entry.name.as_str() {
                    "." => ino,
                    ".." => path.parent().map_or(FUSE_ROOT_ID, |p| inodes.intern(p)),
                    name => inodes.intern(&path.join(name)),
                };
                Listed {
                    ino: entry_ino,
                    offset: (i + 1) as i64,
                    kind: fuse_kind(entry.kind),
                    name: entry.name,
                }
            })
            .collect();
        Ok(listed)
    }

    /// Entries of directory `ino` starting after `offset`, read fresh.
    pub fn list(&self, ino: u64, offset: i64) -> VfsResult<Vec<Listed>> {
        Ok(page(&self.listing_of(ino)?, offset))
    }

    /// Capture the listing of `ino` under a new directory handle.
    pub fn open_listing(&self, ino: u64) -> VfsResult<u64> {
        let entries = self.listing_of(ino)?;
        let fh = self.shared.next_fh.fetch_add(1, Ordering::Relaxed);
        debug!(ino, fh, entries = entries.len(), "listing captured");
        self.shared.listings.lock().insert(fh, Arc::from(entries));
        Ok(fh)
    }

    /// Entries after `offset` from the listing captured under `fh`. An
    /// unknown handle reads the directory fresh.
    pub fn listing_page(&self, ino: u64, fh: u64, offset: i64) -> VfsResult<Vec<Listed>> {
        let captured = self.shared.listings.lock().get(&fh).cloned();
        match captured {
            Some(entries) => Ok(page(&entries, offset)),
            None => self.list(ino, offset),
        }
    }

    /// Drop the listing under `fh`, evicting inodes that only it handed out.
    pub fn release_listing(&self, fh: u64) {
        let mut listings = self.shared.listings.lock();
        let Some(entries) = listings.remove(&fh) else {
            return;
        };
        let held: HashSet<u64> = listings
            .values()
            .flat_map(|other| other.iter().map(|e| e.ino))
            .collect();

        let mut inodes = self.shared.inodes.write();
        let released = entries
            .iter()
            .filter(|e| e.name != "." && e.name != ".." && !held.contains(&e.ino))
            .filter(|e| inodes.release_unreferenced(e.ino))
            .count();
        debug!(fh, released, "listing released");
    }
}

impl Filesystem for FuseAdapter {
    fn init(&mut self, _req: &Request, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        debug!(mode = %self.shared.fs.mode(), "fuse session initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        debug!(
            inodes = self.inode_count(),
            listings = self.shared.listings.lock().len(),
            "fuse session destroyed"
        );
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.lookup_entry(parent, name) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        self.forget_inode(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.attr_of(ino) {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        // Only truncation is meaningful; mode and time changes are accepted
        // and ignored.
        let result = match size {
            Some(size) => self.resize(ino, size),
            None => self.attr_of(ino),
        };
        match result {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.open_path(ino, flags) {
            Ok(()) => reply.opened(0, 0),
            Err(e) => {
                debug!(ino, flags, error = %e, "open refused");
                reply.error(errno(&e))
            }
        }
    }

    fn read(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        match self.read_at(ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn write(
        &mut self,
        _req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        match self.write_at(ino, offset, data) {
            Ok(n) => reply.written(n),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        match self.create_file(parent, name, mode) {
            Ok(attr) => reply.created(&ATTR_TTL, &attr, 0, 0, flags as u32),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        // Provisioning may take seconds; reply from the runtime.
        let label = name.to_os_string();
        self.spawn_make_dir(parent, name, mode, move |result| match result {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => {
                warn!(name = ?label, error = %e, "mkdir failed");
                reply.error(errno(&e))
            }
        });
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        match self.remove_file(parent, name) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let label = name.to_os_string();
        self.spawn_remove_dir(parent, name, move |result| match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                warn!(name = ?label, error = %e, "rmdir failed");
                reply.error(errno(&e))
            }
        });
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        match self.move_entry(parent, name, newparent, newname) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn symlink(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        link: &Path,
        reply: ReplyEntry,
    ) {
        match self.make_symlink(parent, name, link) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        match self.link_target(ino) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.open_listing(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        match self.listing_page(ino, fh, offset) {
            Ok(entries) => {
                for entry in entries {
                    if reply.add(entry.ino, entry.offset, entry.kind, &entry.name) {
                        break;
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn releasedir(&mut self, _req: &Request, _ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
        self.release_listing(fh);
        reply.ok();
    }
}
