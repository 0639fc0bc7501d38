//! Directory Driver: the filesystem callbacks.
//!
//! Stateless per call. Reads go to the resolver (synthetic mode) or to the
//! backing store (mirrored mode); directory mutations at the top level turn
//! into account provisioning followed by a reconciliation pass.
//!
//! ```text
//! /                      root: ".", "..", "stats", one directory per account
//! /stats                 mount stats
//! /<user>                account directory
//! /<user>/{id,home,shell,info}
//! /<user>/home_link      symlink to the home path (when enabled)
//! /<user>/...            mirrored mode only: user files, delegated
//! ```

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::accounts::{AccountRecord, is_valid_username};
use crate::config::BackingMode;
use crate::constants::{ATTR_FILE_MODE, DIR_MODE, STATS_FILE};
use crate::mirror::MirrorStore;
use crate::reconcile::Reconciler;
use crate::resolver::{MountStats, Resolved, VirtualNode, account_entries, is_reserved_name};
use crate::vfs::{DirEntry, FileAttr, OpenFlags, VfsError, VfsOps, VfsResult};

/// Mode bits for directories nobody may create entries in.
const DIR_MODE_RO: u32 = 0o555;

/// Where a path points, by shape.
enum Location {
    Root,
    Stats,
    Account(String),
    /// Below an account directory: `/<user>/<name>[/...]`.
    Inside { user: String, name: String, depth: usize },
}

impl Location {
    /// Split into normal UTF-8 components. Anything else does not exist.
    fn parse(path: &Path) -> VfsResult<Self> {
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::RootDir => {}
                Component::Normal(part) => match part.to_str() {
                    Some(s) => parts.push(s.to_string()),
                    None => return Err(not_found(path)),
                },
                _ => return Err(not_found(path)),
            }
        }

        let depth = parts.len();
        let mut parts = parts.into_iter();
        let Some(first) = parts.next() else {
            return Ok(Self::Root);
        };
        match parts.next() {
            None if first == STATS_FILE => Ok(Self::Stats),
            None => Ok(Self::Account(first)),
            Some(_) if first == STATS_FILE => Err(VfsError::not_a_directory(display(path))),
            Some(name) => Ok(Self::Inside {
                user: first,
                name,
                depth,
            }),
        }
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn not_found(path: &Path) -> VfsError {
    VfsError::not_found(display(path))
}

/// Return `[offset, offset + size)` of `content`, clamped.
fn slice(content: &[u8], offset: u64, size: u32) -> Vec<u8> {
    let len = content.len() as u64;
    if offset >= len {
        return Vec::new();
    }
    let end = len.min(offset.saturating_add(size as u64));
    content[offset as usize..end as usize].to_vec()
}

/// The usersfs directory driver.
#[derive(Debug)]
pub struct UsersFs {
    reconciler: Arc<Reconciler>,
    stats: MountStats,
    read_only: bool,
}

impl UsersFs {
    pub fn new(reconciler: Arc<Reconciler>, stats: MountStats, read_only: bool) -> Self {
        Self {
            reconciler,
            stats,
            read_only,
        }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn stats(&self) -> &MountStats {
        &self.stats
    }

    pub fn mode(&self) -> BackingMode {
        if self.reconciler.mirror().is_some() {
            BackingMode::Mirrored
        } else {
            BackingMode::Synthetic
        }
    }

    fn home_links(&self) -> bool {
        self.reconciler.resolver().home_links()
    }

    fn root_attr(&self) -> FileAttr {
        let perm = if self.read_only { DIR_MODE_RO } else { DIR_MODE };
        FileAttr::directory(perm).with_mtime(self.stats.created.into())
    }

    fn stats_attr(&self) -> FileAttr {
        FileAttr::file(self.stats.render().len() as u64, ATTR_FILE_MODE)
            .with_mtime(self.stats.created.into())
    }

    /// Mirrored store, or `ReadOnly` in synthetic mode.
    fn writable_mirror(&self) -> VfsResult<&MirrorStore> {
        match self.reconciler.mirror() {
            Some(mirror) if !self.read_only => Ok(mirror),
            _ => Err(VfsError::ReadOnly),
        }
    }

    /// Record of an account listed in the current snapshot.
    fn listed(&self, user: &str, path: &Path) -> VfsResult<AccountRecord> {
        self.reconciler
            .snapshot()
            .listed_account(user)
            .cloned()
            .ok_or_else(|| not_found(path))
    }

    async fn resolve(&self, path: &Path) -> VfsResult<Resolved> {
        self.reconciler
            .resolver()
            .resolve(path)
            .await?
            .ok_or_else(|| not_found(path))
    }

    /// Run the post-mutation pass. The mutation already happened, so a
    /// failing pass is logged rather than reported.
    async fn settle(&self) {
        if let Err(e) = self.reconciler.reconcile().await {
            warn!(error = %e, "post-mutation reconciliation failed");
        }
    }

    /// Attributes for an account mkdir just created but the tree does not
    /// list, e.g. because its uid fell below the threshold.
    async fn created_attr(&self, user: &str, path: &Path) -> VfsResult<FileAttr> {
        let record = self
            .reconciler
            .resolver()
            .source()
            .lookup(user)
            .await?
            .ok_or_else(|| not_found(path))?;
        debug!(user = %user, uid = record.uid, "created account is not listed");
        Ok(FileAttr::directory(DIR_MODE_RO)
            .with_mtime(self.stats.created.into())
            .owned_by(record.uid, record.gid))
    }

    // ========================================================================
    // Synthetic reads
    // ========================================================================

    fn synthetic_attr(&self, resolved: &Resolved) -> FileAttr {
        let Resolved { node, record } = resolved;
        let attr = match (node, record) {
            (VirtualNode::Root, _) => return self.root_attr(),
            (VirtualNode::StatsFile, _) => return self.stats_attr(),
            (VirtualNode::AccountDir { .. }, _) => FileAttr::directory(DIR_MODE_RO),
            (VirtualNode::AttributeFile { kind, .. }, Some(record)) => {
                FileAttr::file(kind.render(record).len() as u64, ATTR_FILE_MODE)
            }
            (VirtualNode::HomeLink { .. }, Some(record)) => {
                FileAttr::symlink(record.home.as_os_str().len() as u64)
            }
            // Account nodes always resolve with a record.
            (_, None) => FileAttr::file(0, ATTR_FILE_MODE),
        };
        let attr = attr.with_mtime(self.stats.created.into());
        match record {
            Some(record) => attr.owned_by(record.uid, record.gid),
            None => attr,
        }
    }

    fn synthetic_content(&self, resolved: &Resolved, path: &Path) -> VfsResult<Vec<u8>> {
        match (&resolved.node, &resolved.record) {
            (VirtualNode::StatsFile, _) => Ok(self.stats.render()),
            (VirtualNode::AttributeFile { kind, .. }, Some(record)) => Ok(kind.render(record)),
            (VirtualNode::Root | VirtualNode::AccountDir { .. }, _) => {
                Err(VfsError::is_a_directory(display(path)))
            }
            _ => Err(not_found(path)),
        }
    }

    // ========================================================================
    // Mirrored reads
    // ========================================================================

    async fn mirrored_attr(&self, mirror: &MirrorStore, path: &Path) -> VfsResult<FileAttr> {
        match Location::parse(path)? {
            Location::Root => Ok(self.root_attr()),
            Location::Stats => match mirror.backend().getattr(path).await {
                Ok(attr) => Ok(attr),
                Err(VfsError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    Ok(self.stats_attr())
                }
                Err(e) => Err(e),
            },
            Location::Account(user) => {
                let record = self.listed(&user, path)?;
                let attr = mirror.backend().getattr(path).await.map_err(|e| missing(e, path))?;
                Ok(attr.owned_by(record.uid, record.gid))
            }
            Location::Inside { user, name, depth } => {
                let record = self.listed(&user, path)?;
                let attr = mirror.backend().getattr(path).await.map_err(|e| missing(e, path))?;
                if depth == 2 && is_reserved_name(&name, self.home_links()) {
                    Ok(attr.owned_by(record.uid, record.gid))
                } else {
                    Ok(attr)
                }
            }
        }
    }

    /// Check that a mirrored path lies inside a listed account directory
    /// and return its location.
    fn mirrored_inside(&self, path: &Path) -> VfsResult<(String, String, usize)> {
        match Location::parse(path)? {
            Location::Inside { user, name, depth } => {
                self.listed(&user, path)?;
                Ok((user, name, depth))
            }
            _ => Err(VfsError::permission_denied(display(path))),
        }
    }

    /// Reject mutations of the reserved entries of an account directory.
    fn check_not_reserved(&self, name: &str, depth: usize, path: &Path) -> VfsResult<()> {
        if depth == 2 && is_reserved_name(name, self.home_links()) {
            return Err(VfsError::permission_denied(display(path)));
        }
        Ok(())
    }
}

/// Backing-store NotFound surfaces as a plain NotFound.
fn missing(e: VfsError, path: &Path) -> VfsError {
    match e {
        VfsError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => not_found(path),
        other => other,
    }
}

#[async_trait]
impl VfsOps for UsersFs {
    async fn getattr(&self, path: &Path) -> VfsResult<FileAttr> {
        match self.reconciler.mirror() {
            Some(mirror) => self.mirrored_attr(mirror, path).await,
            None => {
                let resolved = self.resolve(path).await?;
                Ok(self.synthetic_attr(&resolved))
            }
        }
    }

    async fn readdir(&self, path: &Path) -> VfsResult<Vec<DirEntry>> {
        let mut entries: Vec<DirEntry> = DirEntry::dots().into();

        if let Location::Root = Location::parse(path)? {
            let snapshot = self.reconciler.snapshot();
            entries.push(DirEntry::file(STATS_FILE));
            entries.extend(snapshot.listed().map(DirEntry::directory));
            return Ok(entries);
        }

        match self.reconciler.mirror() {
            Some(mirror) => {
                let attr = self.mirrored_attr(mirror, path).await?;
                if !attr.is_dir() {
                    return Err(VfsError::not_a_directory(display(path)));
                }
                entries.extend(mirror.backend().readdir(path).await.map_err(|e| missing(e, path))?);
            }
            None => match self.resolve(path).await?.node {
                VirtualNode::AccountDir { .. } => entries.extend(account_entries(self.home_links())),
                _ => return Err(VfsError::not_a_directory(display(path))),
            },
        }
        Ok(entries)
    }

    async fn open(&self, path: &Path, flags: OpenFlags) -> VfsResult<()> {
        let wants_write = flags.write || flags.truncate;
        match self.reconciler.mirror() {
            None => {
                self.resolve(path).await?;
                if wants_write {
                    return Err(VfsError::permission_denied(display(path)));
                }
                Ok(())
            }
            Some(mirror) => {
                let attr = self.mirrored_attr(mirror, path).await?;
                if !wants_write {
                    return Ok(());
                }
                if self.read_only {
                    return Err(VfsError::ReadOnly);
                }
                if attr.is_dir() {
                    return Err(VfsError::is_a_directory(display(path)));
                }
                let (_, name, depth) = self.mirrored_inside(path)?;
                self.check_not_reserved(&name, depth, path)?;
                mirror.backend().open(path, flags).await
            }
        }
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        match self.reconciler.mirror() {
            None => {
                let resolved = self.resolve(path).await?;
                let content = self.synthetic_content(&resolved, path)?;
                Ok(slice(&content, offset, size))
            }
            Some(mirror) => {
                let attr = self.mirrored_attr(mirror, path).await?;
                if attr.is_dir() {
                    return Err(VfsError::is_a_directory(display(path)));
                }
                match mirror.backend().read(path, offset, size).await {
                    Ok(data) => Ok(data),
                    // The stats file is written at mount; before that it is synthesized.
                    Err(e) => match (missing(e, path), Location::parse(path)?) {
                        (VfsError::NotFound(_), Location::Stats) => {
                            Ok(slice(&self.stats.render(), offset, size))
                        }
                        (e, _) => Err(e),
                    },
                }
            }
        }
    }

    async fn readlink(&self, path: &Path) -> VfsResult<PathBuf> {
        match self.reconciler.mirror() {
            None => match self.resolve(path).await? {
                Resolved {
                    node: VirtualNode::HomeLink { .. },
                    record: Some(record),
                } => Ok(record.home),
                _ => Err(VfsError::NotASymlink(display(path))),
            },
            Some(mirror) => {
                self.mirrored_attr(mirror, path).await?;
                mirror.backend().readlink(path).await
            }
        }
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> VfsResult<u32> {
        let mirror = self.writable_mirror()?;
        let attr = self.mirrored_attr(mirror, path).await?;
        if attr.is_dir() {
            return Err(VfsError::is_a_directory(display(path)));
        }
        let (_, name, depth) = self.mirrored_inside(path)?;
        self.check_not_reserved(&name, depth, path)?;
        mirror.backend().write(path, offset, data).await
    }

    async fn create(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        let mirror = self.writable_mirror()?;
        let (_, name, depth) = self.mirrored_inside(path)?;
        self.check_not_reserved(&name, depth, path)?;
        mirror.backend().create(path, mode).await
    }

    async fn mkdir(&self, path: &Path, mode: u32) -> VfsResult<FileAttr> {
        match Location::parse(path)? {
            Location::Root | Location::Stats => Err(VfsError::already_exists(display(path))),
            Location::Account(user) => {
                if self.read_only {
                    return Err(VfsError::ReadOnly);
                }
                if !is_valid_username(&user) {
                    return Err(VfsError::invalid_path(display(path)));
                }
                if self.reconciler.resolver().source().lookup(&user).await?.is_some() {
                    return Err(VfsError::already_exists(display(path)));
                }
                if !self.reconciler.is_privileged() {
                    return Err(VfsError::permission_denied(display(path)));
                }
                // An account the tree would never list is refused up front.
                let shell = self.reconciler.default_shell();
                let shells = self.reconciler.resolver().source().list_valid_shells().await?;
                if !self.reconciler.eligibility().accepts_shell(shell, &shells) {
                    warn!(
                        user = %user,
                        shell = %shell.display(),
                        "default shell is not eligible, refusing mkdir"
                    );
                    return Err(VfsError::permission_denied(display(path)));
                }

                self.reconciler.create_account(&user).await?;
                info!(user = %user, "account created via mkdir");
                self.settle().await;
                match self.getattr(path).await {
                    Err(VfsError::NotFound(_)) => self.created_attr(&user, path).await,
                    other => other,
                }
            }
            Location::Inside { name, depth, .. } => {
                if self.reconciler.mirror().is_none() {
                    return Err(VfsError::permission_denied(display(path)));
                }
                let mirror = self.writable_mirror()?;
                self.mirrored_inside(path)?;
                self.check_not_reserved(&name, depth, path)?;
                mirror.backend().mkdir(path, mode).await
            }
        }
    }

    async fn unlink(&self, path: &Path) -> VfsResult<()> {
        let mirror = self.writable_mirror()?;
        let (_, name, depth) = self.mirrored_inside(path)?;
        self.check_not_reserved(&name, depth, path)?;
        mirror.backend().unlink(path).await.map_err(|e| missing(e, path))
    }

    async fn rmdir(&self, path: &Path) -> VfsResult<()> {
        match Location::parse(path)? {
            Location::Root => Err(VfsError::permission_denied(display(path))),
            Location::Stats => Err(VfsError::not_a_directory(display(path))),
            Location::Account(user) => {
                if self.read_only {
                    return Err(VfsError::ReadOnly);
                }
                let record = self
                    .reconciler
                    .resolver()
                    .exposed_account(&user)
                    .await?
                    .ok_or_else(|| not_found(path))?;
                if !self.reconciler.eligibility().is_deletable(&record) {
                    return Err(VfsError::permission_denied(display(path)));
                }
                if !self.reconciler.is_privileged() {
                    return Err(VfsError::permission_denied(display(path)));
                }

                self.reconciler.delete_account(&user).await?;
                info!(user = %user, "account deleted via rmdir");
                self.settle().await;
                Ok(())
            }
            Location::Inside { user, name, depth } => {
                if depth == 2 && is_reserved_name(&name, self.home_links()) {
                    // Existence first: an ineligible account has no entries.
                    self.reconciler
                        .resolver()
                        .exposed_account(&user)
                        .await?
                        .ok_or_else(|| not_found(path))?;
                    return Err(VfsError::permission_denied(display(path)));
                }
                let Some(mirror) = self.reconciler.mirror() else {
                    return Err(not_found(path));
                };
                if self.read_only {
                    return Err(VfsError::ReadOnly);
                }
                self.listed(&user, path)?;
                mirror.backend().rmdir(path).await.map_err(|e| missing(e, path))
            }
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        for path in [from, to] {
            match Location::parse(path)? {
                Location::Inside { name, depth, .. }
                    if !(depth == 2 && is_reserved_name(&name, self.home_links())) => {}
                _ => {
                    debug!(from = %from.display(), to = %to.display(), "rename refused");
                    return Err(VfsError::not_supported("rename of account entries"));
                }
            }
        }
        let mirror = self.writable_mirror()?;
        self.mirrored_inside(from)?;
        self.mirrored_inside(to)?;
        mirror.backend().rename(from, to).await.map_err(|e| missing(e, from))
    }

    async fn truncate(&self, path: &Path, size: u64) -> VfsResult<()> {
        let mirror = self.writable_mirror()?;
        let (_, name, depth) = self.mirrored_inside(path)?;
        self.check_not_reserved(&name, depth, path)?;
        mirror.backend().truncate(path, size).await.map_err(|e| missing(e, path))
    }

    async fn symlink(&self, path: &Path, target: &Path) -> VfsResult<FileAttr> {
        let mirror = self.writable_mirror()?;
        let (_, name, depth) = self.mirrored_inside(path)?;
        self.check_not_reserved(&name, depth, path)?;
        mirror.backend().symlink(path, target).await
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}
