//! Eligibility Filter: which accounts appear in the tree.
//!
//! One [`Eligibility`] value is built from configuration and shared by the
//! resolver, the driver and the reconciler, so all three agree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

use crate::accounts::AccountRecord;
use crate::constants::DEFAULT_UID_THRESHOLD;

/// How an interactive login shell is recognized.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EligibilityPolicy {
    /// Shell is listed in the shell registry.
    #[default]
    ShellRegistry,
    /// Shell path ends in `sh`.
    ShellSuffix,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligibility {
    pub policy: EligibilityPolicy,
    /// Reserved uid threshold. Accounts below it are protected.
    pub uid_threshold: u32,
    /// List protected accounts in the tree.
    pub expose_system_accounts: bool,
}

impl Default for Eligibility {
    fn default() -> Self {
        Self::new(EligibilityPolicy::default())
    }
}

impl Eligibility {
    pub fn new(policy: EligibilityPolicy) -> Self {
        Self {
            policy,
            uid_threshold: DEFAULT_UID_THRESHOLD,
            expose_system_accounts: false,
        }
    }

    pub fn with_uid_threshold(mut self, threshold: u32) -> Self {
        self.uid_threshold = threshold;
        self
    }

    pub fn with_system_accounts(mut self, expose: bool) -> Self {
        self.expose_system_accounts = expose;
        self
    }

    /// Whether `shell` counts as an interactive shell under the policy.
    pub fn accepts_shell(&self, shell: &Path, registry: &BTreeSet<PathBuf>) -> bool {
        match self.policy {
            EligibilityPolicy::ShellRegistry => registry.contains(shell),
            EligibilityPolicy::ShellSuffix => shell.as_os_str().as_bytes().ends_with(b"sh"),
        }
    }

    /// Below the reserved threshold.
    pub fn is_protected(&self, record: &AccountRecord) -> bool {
        record.uid < self.uid_threshold
    }

    /// Whether the account appears in the tree.
    pub fn is_exposed(&self, record: &AccountRecord, registry: &BTreeSet<PathBuf>) -> bool {
        if self.is_protected(record) && !self.expose_system_accounts {
            return false;
        }
        self.accepts_shell(&record.shell, registry)
    }

    /// Whether the reconciler or driver may delete the account.
    pub fn is_deletable(&self, record: &AccountRecord) -> bool {
        !self.is_protected(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn record(name: &str, uid: u32, shell: &str) -> AccountRecord {
        AccountRecord {
            username: name.into(),
            uid,
            gid: uid,
            home: PathBuf::from("/home").join(name),
            shell: shell.into(),
            comment: String::new(),
        }
    }

    fn registry() -> BTreeSet<PathBuf> {
        ["/bin/sh", "/bin/bash"].into_iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_shell_registry() {
        let elig = Eligibility::new(EligibilityPolicy::ShellRegistry);
        assert!(elig.is_exposed(&record("alice", 1000, "/bin/bash"), &registry()));
        // Ends in "sh" but not registered.
        assert!(!elig.is_exposed(&record("bob", 1001, "/usr/bin/fish.sh"), &registry()));
        assert!(!elig.is_exposed(&record("svc", 1002, "/usr/sbin/nologin"), &registry()));
    }

    #[test]
    fn test_shell_suffix() {
        let elig = Eligibility::new(EligibilityPolicy::ShellSuffix);
        let empty = BTreeSet::new();
        assert!(elig.is_exposed(&record("bob", 1001, "/usr/local/bin/zsh"), &empty));
        assert!(!elig.is_exposed(&record("svc", 1002, "/bin/false"), &empty));
        assert!(!elig.is_exposed(&record("svc", 1002, "/usr/sbin/nologin"), &empty));
    }

    #[test]
    fn test_system_accounts_hidden_and_protected() {
        let root = record("root", 0, "/bin/bash");
        let elig = Eligibility::default();
        assert!(!elig.is_exposed(&root, &registry()));
        assert!(!elig.is_deletable(&root));

        let elig = elig.with_system_accounts(true);
        assert!(elig.is_exposed(&root, &registry()));
        assert!(!elig.is_deletable(&root));
    }

    #[test]
    fn test_threshold() {
        let elig = Eligibility::default().with_uid_threshold(500);
        assert!(elig.is_deletable(&record("old", 500, "/bin/sh")));
        assert!(elig.is_protected(&record("sys", 499, "/bin/sh")));
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(EligibilityPolicy::ShellSuffix.to_string(), "shell-suffix");
        assert_eq!(
            EligibilityPolicy::from_str("shell-registry").unwrap(),
            EligibilityPolicy::ShellRegistry
        );
    }
}
