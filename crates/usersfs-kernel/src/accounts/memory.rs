//! In-memory account database.
//!
//! Implements both [`AccountSource`] and [`Provisioner`] so the whole
//! driver/reconciler loop can run without touching the host.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use super::{AccountError, AccountRecord, AccountSource, is_valid_username};
use crate::constants::{DEFAULT_UID_THRESHOLD, FALLBACK_SHELLS};
use crate::provision::{ProvisionError, Provisioner};

#[derive(Debug)]
struct Inner {
    accounts: BTreeMap<String, AccountRecord>,
    shells: BTreeSet<PathBuf>,
    next_uid: u32,
    failing: HashSet<String>,
}

/// In-memory account database.
///
/// New accounts get the next free uid at or above the reserved threshold
/// and a home of `/home/<name>`.
#[derive(Debug)]
pub struct MemoryAccounts {
    inner: RwLock<Inner>,
}

impl Default for MemoryAccounts {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAccounts {
    /// Empty database with the fallback shell registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                accounts: BTreeMap::new(),
                shells: FALLBACK_SHELLS.iter().map(PathBuf::from).collect(),
                next_uid: DEFAULT_UID_THRESHOLD,
                failing: HashSet::new(),
            }),
        }
    }

    /// Replace the shell registry.
    pub fn with_shells<I, P>(self, shells: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.inner.write().shells = shells.into_iter().map(Into::into).collect();
        self
    }

    /// Insert or replace an account record directly, bypassing provisioning.
    pub fn insert(&self, record: AccountRecord) {
        let mut inner = self.inner.write();
        if record.uid >= inner.next_uid {
            inner.next_uid = record.uid + 1;
        }
        inner.accounts.insert(record.username.clone(), record);
    }

    /// Insert an account from its parts. The gid mirrors the uid.
    pub fn add(&self, username: &str, uid: u32, shell: impl Into<PathBuf>) {
        self.insert(AccountRecord {
            username: username.to_string(),
            uid,
            gid: uid,
            home: PathBuf::from("/home").join(username),
            shell: shell.into(),
            comment: String::new(),
        });
    }

    /// Remove an account directly, bypassing provisioning.
    pub fn remove(&self, username: &str) -> Option<AccountRecord> {
        self.inner.write().accounts.remove(username)
    }

    /// Make provisioning calls for `username` fail until cleared.
    pub fn fail_provisioning(&self, username: &str, fail: bool) {
        let mut inner = self.inner.write();
        if fail {
            inner.failing.insert(username.to_string());
        } else {
            inner.failing.remove(username);
        }
    }

    /// Sorted account names.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().accounts.keys().cloned().collect()
    }

    fn check_failing(inner: &Inner, username: &str) -> Result<(), ProvisionError> {
        if inner.failing.contains(username) {
            return Err(ProvisionError::Failed {
                program: "memory".to_string(),
                status: 1,
                stderr: format!("injected failure for {username}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AccountSource for MemoryAccounts {
    async fn list_accounts(&self) -> Result<Vec<AccountRecord>, AccountError> {
        Ok(self.inner.read().accounts.values().cloned().collect())
    }

    async fn lookup(&self, username: &str) -> Result<Option<AccountRecord>, AccountError> {
        Ok(self.inner.read().accounts.get(username).cloned())
    }

    async fn list_valid_shells(&self) -> Result<BTreeSet<PathBuf>, AccountError> {
        Ok(self.inner.read().shells.clone())
    }
}

#[async_trait]
impl Provisioner for MemoryAccounts {
    async fn create_account(
        &self,
        username: &str,
        shell: &Path,
        comment: &str,
    ) -> Result<(), ProvisionError> {
        if !is_valid_username(username) {
            return Err(ProvisionError::InvalidName(username.to_string()));
        }

        let mut inner = self.inner.write();
        Self::check_failing(&inner, username)?;
        if inner.accounts.contains_key(username) {
            return Err(ProvisionError::AlreadyExists(username.to_string()));
        }

        let uid = inner.next_uid;
        inner.next_uid += 1;
        inner.accounts.insert(
            username.to_string(),
            AccountRecord {
                username: username.to_string(),
                uid,
                gid: uid,
                home: PathBuf::from("/home").join(username),
                shell: shell.to_path_buf(),
                comment: comment.to_string(),
            },
        );
        Ok(())
    }

    async fn delete_account(&self, username: &str) -> Result<(), ProvisionError> {
        let mut inner = self.inner.write();
        Self::check_failing(&inner, username)?;
        inner
            .accounts
            .remove(username)
            .map(|_| ())
            .ok_or_else(|| ProvisionError::NotFound(username.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_assigns_uids() {
        let db = MemoryAccounts::new();
        db.add("root", 0, "/bin/bash");

        db.create_account("alice", Path::new("/bin/bash"), "").await.unwrap();
        db.create_account("bob", Path::new("/bin/sh"), "Bob").await.unwrap();

        let alice = db.lookup("alice").await.unwrap().unwrap();
        let bob = db.lookup("bob").await.unwrap().unwrap();
        assert_eq!(alice.uid, 1000);
        assert_eq!(bob.uid, 1001);
        assert_eq!(bob.comment, "Bob");
        assert_eq!(alice.home, PathBuf::from("/home/alice"));
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let db = MemoryAccounts::new();
        db.create_account("alice", Path::new("/bin/sh"), "").await.unwrap();
        let err = db
            .create_account("alice", Path::new("/bin/sh"), "")
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::AlreadyExists(_)));
        assert_eq!(db.names(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_delete_missing() {
        let db = MemoryAccounts::new();
        let err = db.delete_account("ghost").await.unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let db = MemoryAccounts::new();
        db.fail_provisioning("carol", true);
        assert!(db.create_account("carol", Path::new("/bin/sh"), "").await.is_err());
        db.fail_provisioning("carol", false);
        db.create_account("carol", Path::new("/bin/sh"), "").await.unwrap();
    }

    #[tokio::test]
    async fn test_inserted_uid_advances_allocator() {
        let db = MemoryAccounts::new();
        db.add("zed", 1500, "/bin/sh");
        db.create_account("amy", Path::new("/bin/sh"), "").await.unwrap();
        assert_eq!(db.lookup("amy").await.unwrap().unwrap().uid, 1501);
    }
}
