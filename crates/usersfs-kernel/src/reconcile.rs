//! Reconciliation Engine.
//!
//! Keeps the set of exposed directories equal to the set of eligible
//! accounts. Each pass compares three views: the directories present now,
//! the eligible accounts present now, and the snapshot recorded by the
//! previous pass. The snapshot tells an external removal apart from a new
//! arrival:
//!
//! | directory | account | previous snapshot            | action                      |
//! |-----------|---------|------------------------------|-----------------------------|
//! | present   | missing | account was known            | remove directory            |
//! | present   | missing | account exists, ineligible   | remove directory            |
//! | present   | missing | never seen                   | create account (privileged) |
//! | missing   | present | directory was present        | delete account (privileged) |
//! | missing   | present | directory never present      | populate directory          |
//!
//! Protected accounts (uid below the threshold) are never deleted; their
//! directory is restored instead. Without privilege an externally removed
//! directory is restored too.
//!
//! Passes are serialized. A caller that asks for a pass while another is
//! queued or running is satisfied by the first pass that starts after its
//! request, so bursts of triggers collapse into one pass. If that pass
//! fails, absorbed callers run their own pass instead of reusing an older
//! report.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::accounts::{AccountRecord, is_valid_username};
use crate::constants::{DEFAULT_PROVISION_TIMEOUT, DEFAULT_SHELL};
use crate::eligibility::Eligibility;
use crate::mirror::MirrorStore;
use crate::provision::{self, ProvisionError, Provisioner};
use crate::resolver::{MountStats, Resolver};
use crate::vfs::{VfsError, VfsResult};

/// State recorded at the end of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSnapshot {
    /// Directory names present in the tree.
    pub directories: BTreeSet<String>,
    /// Eligible accounts, by name.
    pub accounts: BTreeMap<String, AccountRecord>,
    /// Bumped by every completed pass. Zero before the first.
    pub generation: u64,
}

impl ReconcileSnapshot {
    /// Names listed at the root: eligible accounts that have a directory.
    pub fn listed(&self) -> impl Iterator<Item = &str> {
        self.accounts
            .keys()
            .filter(|name| self.directories.contains(*name))
            .map(String::as_str)
    }

    /// Record for a listed account.
    pub fn listed_account(&self, name: &str) -> Option<&AccountRecord> {
        if self.directories.contains(name) {
            self.accounts.get(name)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileFailure {
    pub name: String,
    pub error: String,
}

/// What one pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub generation: u64,
    /// Accounts created from bare directories.
    pub created: Vec<String>,
    /// Accounts deleted because their directory was removed.
    pub deleted: Vec<String>,
    /// Directories populated for newly seen accounts.
    pub populated: Vec<String>,
    /// Directories restored after an external removal that could not be
    /// turned into an account deletion.
    pub restored: Vec<String>,
    /// Directories removed because their account vanished or became
    /// ineligible.
    pub removed: Vec<String>,
    /// Directories whose attribute files were rewritten.
    pub refreshed: Vec<String>,
    /// Names left alone because acting on them needs privilege or a valid
    /// account name.
    pub skipped: Vec<String>,
    pub failures: Vec<ReconcileFailure>,
}

impl ReconcileReport {
    /// True when the pass changed nothing and nothing failed.
    pub fn is_quiet(&self) -> bool {
        self.created.is_empty()
            && self.deleted.is_empty()
            && self.populated.is_empty()
            && self.restored.is_empty()
            && self.removed.is_empty()
            && self.refreshed.is_empty()
            && self.failures.is_empty()
    }

    fn fail(&mut self, name: &str, error: impl std::fmt::Display) {
        warn!(name = %name, error = %error, "reconciliation step failed");
        self.failures.push(ReconcileFailure {
            name: name.to_string(),
            error: error.to_string(),
        });
    }
}

/// The reconciliation engine.
pub struct Reconciler {
    resolver: Resolver,
    provisioner: Arc<dyn Provisioner>,
    mirror: Option<MirrorStore>,
    privileged: bool,
    default_shell: PathBuf,
    provision_timeout: Duration,

    snapshot: RwLock<Arc<ReconcileSnapshot>>,
    /// Held for the duration of a pass. Holds the last pass's report, or
    /// `None` when that pass failed.
    pass: Mutex<Option<ReconcileReport>>,
    /// Last ticket handed out.
    requested: AtomicU64,
    /// Highest ticket covered by a pass that has started.
    started: AtomicU64,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("mirror", &self.mirror)
            .field("privileged", &self.privileged)
            .field("generation", &self.snapshot.read().generation)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Synthetic-mode reconciler without provisioning privilege.
    pub fn new(resolver: Resolver, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            resolver,
            provisioner,
            mirror: None,
            privileged: false,
            default_shell: PathBuf::from(DEFAULT_SHELL),
            provision_timeout: DEFAULT_PROVISION_TIMEOUT,
            snapshot: RwLock::new(Arc::new(ReconcileSnapshot::default())),
            pass: Mutex::new(None),
            requested: AtomicU64::new(0),
            started: AtomicU64::new(0),
        }
    }

    /// Keep directories on disk under `mirror`.
    pub fn with_mirror(mut self, mirror: MirrorStore) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Allow the pass to create and delete accounts.
    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn with_default_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.default_shell = shell.into();
        self
    }

    pub fn with_provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout = timeout;
        self
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn eligibility(&self) -> &Eligibility {
        self.resolver.eligibility()
    }

    pub fn mirror(&self) -> Option<&MirrorStore> {
        self.mirror.as_ref()
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Login shell given to accounts created through the mount.
    pub fn default_shell(&self) -> &Path {
        &self.default_shell
    }

    /// The snapshot recorded by the last completed pass.
    pub fn snapshot(&self) -> Arc<ReconcileSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    // ========================================================================
    // Provisioning
    // ========================================================================

    /// Create `username` with the default shell and an empty comment.
    pub async fn create_account(&self, username: &str) -> VfsResult<()> {
        let fut = self
            .provisioner
            .create_account(username, &self.default_shell, "");
        match provision::with_timeout(self.provision_timeout, username, fut).await {
            Ok(()) => Ok(()),
            Err(ProvisionError::AlreadyExists(name)) => Err(VfsError::AlreadyExists(name)),
            Err(ProvisionError::InvalidName(name)) => Err(VfsError::InvalidPath(name)),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete `username` and its home storage.
    pub async fn delete_account(&self, username: &str) -> VfsResult<()> {
        let fut = self.provisioner.delete_account(username);
        match provision::with_timeout(self.provision_timeout, username, fut).await {
            Ok(()) => Ok(()),
            Err(ProvisionError::NotFound(name)) => Err(VfsError::NotFound(name)),
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Passes
    // ========================================================================

    /// Mount-time initialization: write the stats file, then run a pass.
    pub async fn initialize(&self, stats: &MountStats) -> VfsResult<ReconcileReport> {
        if let Some(mirror) = &self.mirror {
            mirror.write_stats(stats).await?;
        }
        self.reconcile().await
    }

    /// Run a pass, or wait for one that covers this request.
    pub async fn reconcile(&self) -> VfsResult<ReconcileReport> {
        let ticket = self.requested.fetch_add(1, Ordering::SeqCst) + 1;
        let mut last = self.pass.lock().await;

        if self.started.load(Ordering::SeqCst) >= ticket {
            if let Some(report) = last.as_ref() {
                debug!(ticket, "request absorbed by an earlier pass");
                return Ok(report.clone());
            }
            debug!(ticket, "covering pass failed, running another");
        }
        self.started
            .store(self.requested.load(Ordering::SeqCst), Ordering::SeqCst);

        match self.run_pass().await {
            Ok(report) => {
                *last = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                *last = None;
                Err(e)
            }
        }
    }

    async fn run_pass(&self) -> VfsResult<ReconcileReport> {
        let prev = self.snapshot();
        let source = self.resolver.source();

        let shells = source.list_valid_shells().await?;
        let all: BTreeMap<String, AccountRecord> = source
            .list_accounts()
            .await?
            .into_iter()
            .map(|r| (r.username.clone(), r))
            .collect();
        let mut accounts: BTreeMap<String, AccountRecord> = self
            .resolver
            .filter_exposed(all.values().cloned().collect(), &shells)
            .into_iter()
            .map(|r| (r.username.clone(), r))
            .collect();

        let mut directories: BTreeSet<String> = match &self.mirror {
            Some(mirror) => mirror.directory_names().await?.into_iter().collect(),
            None => prev.directories.clone(),
        };

        let mut report = ReconcileReport {
            generation: prev.generation + 1,
            ..Default::default()
        };

        // Directories without an eligible account.
        let orphans: Vec<String> = directories
            .iter()
            .filter(|name| !accounts.contains_key(*name))
            .cloned()
            .collect();
        for name in orphans {
            if all.contains_key(&name) || prev.accounts.contains_key(&name) {
                match self.remove_directory(&name).await {
                    Ok(()) => {
                        directories.remove(&name);
                        report.removed.push(name);
                    }
                    Err(e) => report.fail(&name, e),
                }
            } else if !self.privileged || !is_valid_username(&name) {
                debug!(name = %name, "leaving directory without an account");
                report.skipped.push(name);
            } else {
                match self.adopt_directory(&name, &shells).await {
                    Ok(Some(record)) => {
                        accounts.insert(name.clone(), record);
                        report.created.push(name);
                    }
                    Ok(None) => report.created.push(name),
                    Err(e) => report.fail(&name, e),
                }
            }
        }

        // Eligible accounts without a directory.
        let missing: Vec<AccountRecord> = accounts
            .values()
            .filter(|r| !directories.contains(&r.username))
            .cloned()
            .collect();
        for record in missing {
            let name = record.username.clone();
            let removed_externally = prev.directories.contains(&name);

            if removed_externally && self.privileged && self.eligibility().is_deletable(&record) {
                match self.delete_account(&name).await {
                    Ok(()) | Err(VfsError::NotFound(_)) => {
                        accounts.remove(&name);
                        report.deleted.push(name);
                    }
                    Err(e) => report.fail(&name, e),
                }
                continue;
            }

            match self.populate(&record).await {
                Ok(()) => {
                    directories.insert(name.clone());
                    if removed_externally {
                        report.restored.push(name);
                    } else {
                        report.populated.push(name);
                    }
                }
                Err(e) => report.fail(&name, e),
            }
        }

        // Existing directories with stale content.
        if let Some(mirror) = &self.mirror {
            for (name, record) in &accounts {
                if !directories.contains(name)
                    || report.populated.contains(name)
                    || report.restored.contains(name)
                {
                    continue;
                }
                match mirror.refresh(record).await {
                    Ok(true) => report.refreshed.push(name.clone()),
                    Ok(false) => {}
                    Err(e) => report.fail(name, e),
                }
            }
        }

        let next = Arc::new(ReconcileSnapshot {
            directories,
            accounts,
            generation: report.generation,
        });
        *self.snapshot.write() = next;

        if report.is_quiet() {
            debug!(generation = report.generation, "reconciliation pass: no changes");
        } else {
            info!(
                generation = report.generation,
                created = report.created.len(),
                deleted = report.deleted.len(),
                populated = report.populated.len(),
                restored = report.restored.len(),
                removed = report.removed.len(),
                refreshed = report.refreshed.len(),
                failures = report.failures.len(),
                "reconciliation pass"
            );
        }
        Ok(report)
    }

    async fn remove_directory(&self, name: &str) -> VfsResult<()> {
        if let Some(mirror) = &self.mirror {
            mirror.remove(name).await?;
        }
        debug!(name = %name, "removed directory without an eligible account");
        Ok(())
    }

    async fn populate(&self, record: &AccountRecord) -> VfsResult<()> {
        if let Some(mirror) = &self.mirror {
            mirror.populate(record).await?;
        }
        Ok(())
    }

    /// Create an account for a bare directory and fill the directory in.
    ///
    /// Returns the record when the new account is eligible.
    async fn adopt_directory(
        &self,
        name: &str,
        shells: &BTreeSet<PathBuf>,
    ) -> VfsResult<Option<AccountRecord>> {
        match self.create_account(name).await {
            Ok(()) | Err(VfsError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
        let Some(record) = self.resolver.source().lookup(name).await? else {
            return Err(VfsError::not_found(name));
        };
        if !self.eligibility().is_exposed(&record, shells) {
            warn!(
                name = %name,
                shell = %record.shell.display(),
                "created account is not eligible; its directory will be pruned"
            );
            return Ok(None);
        }
        self.populate(&record).await?;
        Ok(Some(record))
    }

    /// Run passes every `period` until stopped.
    ///
    /// The first tick is skipped: the mount has already run its initial pass.
    pub fn spawn_periodic(self: &Arc<Self>, period: Duration) -> PeriodicHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let reconciler = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        info!("periodic reconciler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = reconciler.reconcile().await {
                            warn!(error = %e, "reconciliation pass failed");
                        }
                    }
                }
            }
        });

        info!(period_ms = period.as_millis() as u64, "periodic reconciler started");
        PeriodicHandle { task, shutdown_tx }
    }
}

/// Handle to a running periodic reconciler.
#[derive(Debug)]
pub struct PeriodicHandle {
    task: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

impl PeriodicHandle {
    /// Stop the timer and wait for an in-flight pass to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "periodic reconciler task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountError, AccountSource, MemoryAccounts};
    use crate::eligibility::EligibilityPolicy;
    use tempfile::TempDir;

    fn db() -> Arc<MemoryAccounts> {
        let db = MemoryAccounts::new().with_shells(["/bin/sh", "/bin/bash"]);
        db.add("root", 0, "/bin/bash");
        db.add("alice", 1000, "/bin/bash");
        db.add("svc", 1001, "/usr/sbin/nologin");
        Arc::new(db)
    }

    fn resolver(db: &Arc<MemoryAccounts>) -> Resolver {
        Resolver::new(
            db.clone(),
            Arc::new(Eligibility::new(EligibilityPolicy::ShellRegistry)),
            false,
        )
    }

    async fn mirrored(db: &Arc<MemoryAccounts>, dir: &TempDir, privileged: bool) -> Reconciler {
        let store = MirrorStore::open(dir.path(), false).await.unwrap();
        Reconciler::new(resolver(db), db.clone())
            .with_mirror(store)
            .privileged(privileged)
    }

    fn names(snapshot: &ReconcileSnapshot) -> Vec<&str> {
        snapshot.listed().collect()
    }

    #[tokio::test]
    async fn test_synthetic_fixed_point() {
        let db = db();
        let engine = Reconciler::new(resolver(&db), db.clone());
        assert_eq!(engine.snapshot().generation, 0);

        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.generation, 1);
        assert_eq!(report.populated, vec!["alice"]);
        assert_eq!(names(&engine.snapshot()), vec!["alice"]);

        db.add("bob", 1002, "/bin/sh");
        engine.reconcile().await.unwrap();
        assert_eq!(names(&engine.snapshot()), vec!["alice", "bob"]);

        db.remove("alice");
        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.removed, vec!["alice"]);
        assert_eq!(names(&engine.snapshot()), vec!["bob"]);
        assert_eq!(engine.snapshot().generation, 3);
    }

    #[tokio::test]
    async fn test_quiet_pass() {
        let db = db();
        let engine = Reconciler::new(resolver(&db), db.clone());
        engine.reconcile().await.unwrap();
        assert!(engine.reconcile().await.unwrap().is_quiet());
    }

    #[tokio::test]
    async fn test_mirrored_populates_and_removes() {
        let db = db();
        let dir = TempDir::new().unwrap();
        let engine = mirrored(&db, &dir, false).await;

        engine.reconcile().await.unwrap();
        assert!(dir.path().join("alice/id").exists());
        assert!(!dir.path().join("root").exists());

        db.remove("alice");
        engine.reconcile().await.unwrap();
        assert!(!dir.path().join("alice").exists());
    }

    #[tokio::test]
    async fn test_ineligible_directory_pruned() {
        let db = db();
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("svc")).unwrap();
        std::fs::create_dir(dir.path().join("root")).unwrap();
        let engine = mirrored(&db, &dir, true).await;

        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.removed, vec!["root", "svc"]);
        assert!(report.created.is_empty());
        assert!(!dir.path().join("svc").exists());
    }

    #[tokio::test]
    async fn test_bare_directory_creates_account_when_privileged() {
        let db = db();
        let dir = TempDir::new().unwrap();
        let engine = mirrored(&db, &dir, true).await;
        engine.reconcile().await.unwrap();

        std::fs::create_dir(dir.path().join("carol")).unwrap();
        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.created, vec!["carol"]);

        let carol = db.lookup("carol").await.unwrap().unwrap();
        assert_eq!(carol.shell, PathBuf::from("/bin/bash"));
        assert!(dir.path().join("carol/id").exists());
        assert!(names(&engine.snapshot()).contains(&"carol"));
    }

    #[tokio::test]
    async fn test_bare_directory_skipped_without_privilege() {
        let db = db();
        let dir = TempDir::new().unwrap();
        let engine = mirrored(&db, &dir, false).await;
        std::fs::create_dir(dir.path().join("carol")).unwrap();
        std::fs::create_dir(dir.path().join("Not Valid")).unwrap();

        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.skipped, vec!["Not Valid", "carol"]);
        assert!(report.failures.is_empty());
        assert!(db.names().iter().all(|n| n != "carol"));
        assert!(!names(&engine.snapshot()).contains(&"carol"));
    }

    #[tokio::test]
    async fn test_external_directory_removal_deletes_account() {
        let db = db();
        let dir = TempDir::new().unwrap();
        let engine = mirrored(&db, &dir, true).await;
        engine.reconcile().await.unwrap();

        std::fs::remove_dir_all(dir.path().join("alice")).unwrap();
        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.deleted, vec!["alice"]);
        assert!(!db.names().contains(&"alice".to_string()));
        assert!(names(&engine.snapshot()).is_empty());
    }

    #[tokio::test]
    async fn test_external_removal_restored_without_privilege() {
        let db = db();
        let dir = TempDir::new().unwrap();
        let engine = mirrored(&db, &dir, false).await;
        engine.reconcile().await.unwrap();

        std::fs::remove_dir_all(dir.path().join("alice")).unwrap();
        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.restored, vec!["alice"]);
        assert!(dir.path().join("alice/id").exists());
        assert!(db.names().contains(&"alice".to_string()));
    }

    #[tokio::test]
    async fn test_protected_account_restored_not_deleted() {
        let db = db();
        let dir = TempDir::new().unwrap();
        let store = MirrorStore::open(dir.path(), false).await.unwrap();
        let elig = Eligibility::new(EligibilityPolicy::ShellRegistry).with_system_accounts(true);
        let engine = Reconciler::new(Resolver::new(db.clone(), Arc::new(elig), false), db.clone())
            .with_mirror(store)
            .privileged(true);
        engine.reconcile().await.unwrap();
        assert!(dir.path().join("root/id").exists());

        std::fs::remove_dir_all(dir.path().join("root")).unwrap();
        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.restored, vec!["root"]);
        assert!(report.deleted.is_empty());
        assert!(db.names().contains(&"root".to_string()));
    }

    #[tokio::test]
    async fn test_refreshes_stale_files() {
        let db = db();
        let dir = TempDir::new().unwrap();
        let engine = mirrored(&db, &dir, false).await;
        engine.reconcile().await.unwrap();

        db.add("alice", 1000, "/bin/sh");
        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.refreshed, vec!["alice"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("alice/shell")).unwrap(),
            "/bin/sh\n"
        );
    }

    #[tokio::test]
    async fn test_provisioning_failure_recorded() {
        let db = db();
        let dir = TempDir::new().unwrap();
        let engine = mirrored(&db, &dir, true).await;
        db.fail_provisioning("dave", true);
        std::fs::create_dir(dir.path().join("dave")).unwrap();

        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "dave");
        // The rest of the pass still ran.
        assert_eq!(report.populated, vec!["alice"]);

        db.fail_provisioning("dave", false);
        let report = engine.reconcile().await.unwrap();
        assert_eq!(report.created, vec!["dave"]);
    }

    #[tokio::test]
    async fn test_concurrent_requests_collapse() {
        let db = db();
        let engine = Arc::new(Reconciler::new(resolver(&db), db.clone()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move { engine.reconcile().await.unwrap() }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let generation = engine.snapshot().generation;
        assert!(generation >= 1 && generation <= 16);
        assert_eq!(names(&engine.snapshot()), vec!["alice"]);
    }

    /// Sleeps on the first shell listing and fails the second.
    struct FlakyAccounts {
        inner: Arc<MemoryAccounts>,
        calls: AtomicU64,
    }

    #[async_trait::async_trait]
    impl AccountSource for FlakyAccounts {
        async fn list_accounts(&self) -> Result<Vec<AccountRecord>, AccountError> {
            self.inner.list_accounts().await
        }

        async fn lookup(&self, username: &str) -> Result<Option<AccountRecord>, AccountError> {
            self.inner.lookup(username).await
        }

        async fn list_valid_shells(&self) -> Result<BTreeSet<PathBuf>, AccountError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => tokio::time::sleep(Duration::from_millis(100)).await,
                1 => return Err(AccountError::Malformed("shells".into())),
                _ => {}
            }
            self.inner.list_valid_shells().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pass_not_reused_by_absorbed_requests() {
        let db = db();
        let flaky = Arc::new(FlakyAccounts {
            inner: db.clone(),
            calls: AtomicU64::new(0),
        });
        let resolver = Resolver::new(
            flaky.clone(),
            Arc::new(Eligibility::new(EligibilityPolicy::ShellRegistry)),
            false,
        );
        let engine = Arc::new(Reconciler::new(resolver, db.clone()));

        let spawn = |engine: &Arc<Reconciler>| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.reconcile().await })
        };
        let first = spawn(&engine);
        tokio::task::yield_now().await;
        // Both queue behind the sleeping pass.
        let second = spawn(&engine);
        let third = spawn(&engine);
        tokio::task::yield_now().await;

        assert!(first.await.unwrap().is_ok());
        assert!(matches!(second.await.unwrap(), Err(VfsError::Account(_))));
        // The pass covering the third request failed, so it ran its own.
        let report = third.await.unwrap().unwrap();
        assert_eq!(report.generation, 2);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_create_account_maps_errors() {
        let db = db();
        let engine = Reconciler::new(resolver(&db), db.clone());
        let err = engine.create_account("alice").await.unwrap_err();
        assert!(matches!(err, VfsError::AlreadyExists(_)));
        let err = engine.delete_account("ghost").await.unwrap_err();
        assert!(matches!(err, VfsError::NotFound(_)));
        let err = engine.create_account("Bad Name").await.unwrap_err();
        assert!(matches!(err, VfsError::InvalidPath(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_picks_up_changes() {
        let db = db();
        let engine = Arc::new(Reconciler::new(resolver(&db), db.clone()));
        engine.reconcile().await.unwrap();

        let handle = engine.spawn_periodic(Duration::from_millis(200));
        db.add("erin", 1003, "/bin/sh");
        tokio::time::sleep(Duration::from_millis(450)).await;
        assert!(names(&engine.snapshot()).contains(&"erin"));
        handle.stop().await;
    }
}
