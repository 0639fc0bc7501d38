//! # usersfs-kernel
//!
//! The host account database as a directory tree.
//!
//! Every account with an interactive login shell is a directory holding
//! its uid, home, shell and a summary; creating or removing a top-level
//! directory creates or removes the account. Components, leaf first:
//!
//! - [`accounts`]: read-only Account Source over `/etc/passwd`
//! - [`eligibility`]: which accounts are exposed
//! - [`resolver`]: path → node, content synthesis
//! - [`driver`]: the filesystem callbacks ([`UsersFs`] implements [`VfsOps`])
//! - [`reconcile`]: keeps directories and accounts equal
//! - [`provision`]: useradd/userdel bridge
//!
//! The FUSE binding lives in `usersfs-server`; everything here is
//! path-based and can be driven directly from tests.

pub mod accounts;
pub mod config;
pub mod constants;
pub mod driver;
pub mod eligibility;
pub mod mirror;
pub mod provision;
pub mod reconcile;
pub mod resolver;
pub mod vfs;

pub use accounts::{AccountError, AccountRecord, AccountSource, MemoryAccounts, PasswdSource};
pub use config::{BackingMode, ConfigError, MountConfig};
pub use driver::UsersFs;
pub use eligibility::{Eligibility, EligibilityPolicy};
pub use mirror::MirrorStore;
pub use provision::{CommandProvisioner, ProvisionError, Provisioner};
pub use reconcile::{PeriodicHandle, ReconcileReport, ReconcileSnapshot, Reconciler};
pub use resolver::{AttributeKind, MountStats, Resolver, VirtualNode};
pub use vfs::{DirEntry, FileAttr, FileType, LocalBackend, OpenFlags, VfsError, VfsOps, VfsResult};

use std::sync::Arc;

/// Assemble the driver and reconciler for a configuration.
///
/// Opens the mirror store in mirrored mode; no pass is run yet, see
/// [`Reconciler::initialize`].
pub async fn build(
    config: &MountConfig,
    source: Arc<dyn AccountSource>,
    provisioner: Arc<dyn Provisioner>,
) -> VfsResult<UsersFs> {
    let resolver = Resolver::new(source, Arc::new(config.eligibility()), config.home_links);
    let mut reconciler = Reconciler::new(resolver, provisioner)
        .privileged(config.is_privileged())
        .with_default_shell(config.default_shell.clone())
        .with_provision_timeout(config.provision_timeout());

    if config.backing == BackingMode::Mirrored {
        let root = config
            .backing_root
            .clone()
            .ok_or_else(|| VfsError::invalid_path("mirrored mode needs a backing root"))?;
        reconciler = reconciler.with_mirror(MirrorStore::open(root, config.home_links).await?);
    }

    Ok(UsersFs::new(
        Arc::new(reconciler),
        MountStats::now(config.backing),
        config.read_only,
    ))
}
