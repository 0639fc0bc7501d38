//! `/etc/passwd` and `/etc/shells` backed account source.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

use super::{AccountError, AccountRecord, AccountSource};
use crate::constants::{DEFAULT_PASSWD_PATH, DEFAULT_SHELLS_PATH, FALLBACK_SHELLS};

/// Account source reading the flat-file account database.
///
/// Both files are re-read on every call; the database is small and the
/// caller decides how long a result may be trusted.
#[derive(Debug, Clone)]
pub struct PasswdSource {
    passwd_path: PathBuf,
    shells_path: PathBuf,
}

impl Default for PasswdSource {
    fn default() -> Self {
        Self::new(DEFAULT_PASSWD_PATH, DEFAULT_SHELLS_PATH)
    }
}

impl PasswdSource {
    pub fn new(passwd_path: impl Into<PathBuf>, shells_path: impl Into<PathBuf>) -> Self {
        Self {
            passwd_path: passwd_path.into(),
            shells_path: shells_path.into(),
        }
    }

    /// Path of the account database file.
    pub fn passwd_path(&self) -> &Path {
        &self.passwd_path
    }

    async fn read_passwd(&self) -> Result<String, AccountError> {
        fs::read_to_string(&self.passwd_path)
            .await
            .map_err(|source| AccountError::Read {
                path: self.passwd_path.clone(),
                source,
            })
    }
}

/// Parse one line of `/etc/passwd`.
///
/// Blank lines, comments and NIS compat entries (`+`/`-`) yield `Ok(None)`.
pub fn parse_passwd_line(line: &str) -> Result<Option<AccountRecord>, AccountError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.starts_with('#') || line.starts_with(['+', '-']) {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != 7 {
        return Err(AccountError::Malformed(format!(
            "expected 7 fields, found {}: {line:?}",
            fields.len()
        )));
    }

    let parse_id = |field: &str, what: &str| {
        field
            .parse::<u32>()
            .map_err(|_| AccountError::Malformed(format!("bad {what} {field:?} for {}", fields[0])))
    };

    if fields[0].is_empty() {
        return Err(AccountError::Malformed(format!("empty name: {line:?}")));
    }

    Ok(Some(AccountRecord {
        username: fields[0].to_string(),
        uid: parse_id(fields[2], "uid")?,
        gid: parse_id(fields[3], "gid")?,
        comment: fields[4].to_string(),
        home: PathBuf::from(fields[5]),
        shell: PathBuf::from(fields[6]),
    }))
}

/// Parse the contents of `/etc/shells`.
pub fn parse_shells(text: &str) -> BTreeSet<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect()
}

#[async_trait]
impl AccountSource for PasswdSource {
    async fn list_accounts(&self) -> Result<Vec<AccountRecord>, AccountError> {
        let text = self.read_passwd().await?;
        let mut records = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            match parse_passwd_line(line) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(
                    path = %self.passwd_path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping account entry"
                ),
            }
        }
        Ok(records)
    }

    async fn lookup(&self, username: &str) -> Result<Option<AccountRecord>, AccountError> {
        let text = self.read_passwd().await?;
        Ok(text
            .lines()
            .filter_map(|line| parse_passwd_line(line).ok().flatten())
            .find(|record| record.username == username))
    }

    async fn list_valid_shells(&self) -> Result<BTreeSet<PathBuf>, AccountError> {
        match fs::read_to_string(&self.shells_path).await {
            Ok(text) => Ok(parse_shells(&text)),
            // Same fallback the C library uses when the registry is absent.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(FALLBACK_SHELLS.iter().map(PathBuf::from).collect())
            }
            Err(source) => Err(AccountError::Read {
                path: self.shells_path.clone(),
                source,
            }),
        }
    }
}
