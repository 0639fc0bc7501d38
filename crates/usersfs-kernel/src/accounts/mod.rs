//! Account Source: read-only access to the host's account database.
//!
//! Enumeration returns owned values; nothing here hands out a shared
//! cursor into the database.

mod memory;
mod passwd;

pub use memory::MemoryAccounts;
pub use passwd::{PasswdSource, parse_passwd_line, parse_shells};

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

use crate::constants::MAX_USERNAME_LEN;

/// One account, as fetched from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRecord {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: PathBuf,
    /// Free-text comment (GECOS). Empty when unset.
    pub comment: String,
}

/// Errors reading the account database.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed account entry: {0}")]
    Malformed(String),
}

/// Read-only accessor over the host's account database.
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// Every account in the database, in database order.
    async fn list_accounts(&self) -> Result<Vec<AccountRecord>, AccountError>;

    /// Fetch one account by name.
    async fn lookup(&self, username: &str) -> Result<Option<AccountRecord>, AccountError>;

    /// The shell registry (`/etc/shells`).
    async fn list_valid_shells(&self) -> Result<BTreeSet<PathBuf>, AccountError>;
}

/// Whether `name` is acceptable as a new login name.
///
/// 1 to 31 bytes, starting with a lowercase letter or `_`, followed by
/// lowercase letters, digits, `_` or `-`, with an optional trailing `$`.
pub fn is_valid_username(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_USERNAME_LEN {
        return false;
    }
    let body = name.strip_suffix('$').unwrap_or(name);
    let mut bytes = body.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_lowercase() || b == b'_' => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_usernames() {
        for name in ["alice", "_svc", "bob-2", "host$", "a", "x_y-z9"] {
            assert!(is_valid_username(name), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_usernames() {
        let too_long = "a".repeat(32);
        for name in ["", "Alice", "9lives", "-dash", "has space", "a/b", "$", "caf\u{e9}", &too_long] {
            assert!(!is_valid_username(name), "{name:?} should be invalid");
        }
        assert!(is_valid_username(&"a".repeat(31)));
    }
}
