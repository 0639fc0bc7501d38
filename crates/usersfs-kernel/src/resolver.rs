//! Entry Resolver: virtual path → typed node, and content synthesis.
//!
//! Nothing here is cached. Each resolution consults the account source
//! afresh and allocates no state that outlives the call.

use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::accounts::{AccountRecord, AccountSource};
use crate::config::BackingMode;
use crate::constants::{HOME_LINK, STATS_FILE};
use crate::eligibility::Eligibility;
use crate::vfs::{DirEntry, VfsResult};

/// Per-account attribute files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum AttributeKind {
    Id,
    Home,
    Shell,
    Info,
}

impl AttributeKind {
    /// Render this attribute for `record`.
    pub fn render(self, record: &AccountRecord) -> Vec<u8> {
        let text = match self {
            Self::Id => format!("{}\n", record.uid),
            Self::Home => format!("{}\n", record.home.display()),
            Self::Shell => format!("{}\n", record.shell.display()),
            Self::Info => {
                let mut out = format!(
                    "name: {}\nuid: {}\ngid: {}\nhome: {}\nshell: {}\n",
                    record.username,
                    record.uid,
                    record.gid,
                    record.home.display(),
                    record.shell.display(),
                );
                if !record.comment.is_empty() {
                    out.push_str(&format!("comment: {}\n", record.comment));
                }
                out
            }
        };
        text.into_bytes()
    }
}

/// A path, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualNode {
    Root,
    StatsFile,
    AccountDir { username: String },
    AttributeFile { username: String, kind: AttributeKind },
    HomeLink { username: String },
}

impl VirtualNode {
    /// Classify a path by shape alone.
    ///
    /// Returns `None` for anything that can never exist: `.`/`..`
    /// components, non-UTF-8 names, depth beyond two, unknown file names.
    /// `home_link` is only recognized when `home_links` is set.
    pub fn parse(path: &Path, home_links: bool) -> Option<Self> {
        let mut parts = Vec::with_capacity(2);
        for component in path.components() {
            match component {
                Component::RootDir => {}
                Component::Normal(part) => parts.push(part.to_str()?),
                Component::CurDir | Component::ParentDir | Component::Prefix(_) => return None,
            }
        }

        match parts.as_slice() {
            [] => Some(Self::Root),
            [name] if *name == STATS_FILE => Some(Self::StatsFile),
            [user] => Some(Self::AccountDir {
                username: (*user).to_string(),
            }),
            [user, file] if *file == HOME_LINK => home_links.then(|| Self::HomeLink {
                username: (*user).to_string(),
            }),
            [user, file] => file.parse().ok().map(|kind| Self::AttributeFile {
                username: (*user).to_string(),
                kind,
            }),
            _ => None,
        }
    }

    /// The account this node belongs to, if any.
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Root | Self::StatsFile => None,
            Self::AccountDir { username }
            | Self::AttributeFile { username, .. }
            | Self::HomeLink { username } => Some(username),
        }
    }
}

/// File names inside an account directory, in listing order.
pub fn account_entries(home_links: bool) -> Vec<DirEntry> {
    let mut entries: Vec<DirEntry> = AttributeKind::iter().map(|k| DirEntry::file(k.as_ref())).collect();
    if home_links {
        entries.push(DirEntry::symlink(HOME_LINK));
    }
    entries
}

/// Whether `name` is reserved inside an account directory.
pub fn is_reserved_name(name: &str, home_links: bool) -> bool {
    name.parse::<AttributeKind>().is_ok() || (home_links && name == HOME_LINK)
}

/// Contents of `/stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountStats {
    pub mode: BackingMode,
    /// User name of the process owner.
    pub owner: String,
    pub created: DateTime<Utc>,
}

impl MountStats {
    /// Stats for a mount created now by the current process owner.
    pub fn now(mode: BackingMode) -> Self {
        Self {
            mode,
            owner: whoami::username(),
            created: Utc::now(),
        }
    }

    pub fn render(&self) -> Vec<u8> {
        format!(
            "mode: {}\nowner: {}\ncreated: {}\n",
            self.mode,
            self.owner,
            self.created.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
        .into_bytes()
    }
}

/// A resolved node with the account record it was resolved against.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub node: VirtualNode,
    pub record: Option<AccountRecord>,
}

/// Maps paths to nodes against the live account source.
#[derive(Clone)]
pub struct Resolver {
    source: Arc<dyn AccountSource>,
    eligibility: Arc<Eligibility>,
    home_links: bool,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("eligibility", &self.eligibility)
            .field("home_links", &self.home_links)
            .finish_non_exhaustive()
    }
}

impl Resolver {
    pub fn new(source: Arc<dyn AccountSource>, eligibility: Arc<Eligibility>, home_links: bool) -> Self {
        Self {
            source,
            eligibility,
            home_links,
        }
    }

    pub fn source(&self) -> &Arc<dyn AccountSource> {
        &self.source
    }

    pub fn eligibility(&self) -> &Eligibility {
        &self.eligibility
    }

    pub fn home_links(&self) -> bool {
        self.home_links
    }

    /// Fetch `username` if it exists and is exposed.
    pub async fn exposed_account(&self, username: &str) -> VfsResult<Option<AccountRecord>> {
        let Some(record) = self.source.lookup(username).await? else {
            return Ok(None);
        };
        let shells = self.source.list_valid_shells().await?;
        Ok(self.eligibility.is_exposed(&record, &shells).then_some(record))
    }

    /// Every exposed account, sorted by name.
    pub async fn exposed_accounts(&self) -> VfsResult<Vec<AccountRecord>> {
        let shells = self.source.list_valid_shells().await?;
        Ok(self.filter_exposed(self.source.list_accounts().await?, &shells))
    }

    pub(crate) fn filter_exposed(
        &self,
        accounts: Vec<AccountRecord>,
        shells: &BTreeSet<PathBuf>,
    ) -> Vec<AccountRecord> {
        let mut exposed: Vec<_> = accounts
            .into_iter()
            .filter(|r| self.eligibility.is_exposed(r, shells))
            .collect();
        exposed.sort_by(|a, b| a.username.cmp(&b.username));
        exposed.dedup_by(|a, b| a.username == b.username);
        exposed
    }

    /// Resolve a path against the account source.
    ///
    /// `Ok(None)` when the path does not name an exposed node.
    pub async fn resolve(&self, path: &Path) -> VfsResult<Option<Resolved>> {
        let Some(node) = VirtualNode::parse(path, self.home_links) else {
            return Ok(None);
        };
        let record = match node.username() {
            None => None,
            Some(username) => match self.exposed_account(username).await? {
                Some(record) => Some(record),
                None => return Ok(None),
            },
        };
        Ok(Some(Resolved { node, record }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::MemoryAccounts;
    use crate::eligibility::EligibilityPolicy;

    fn record() -> AccountRecord {
        AccountRecord {
            username: "alice".into(),
            uid: 1000,
            gid: 100,
            home: PathBuf::from("/home/alice"),
            shell: PathBuf::from("/bin/bash"),
            comment: String::new(),
        }
    }

    fn resolver(home_links: bool) -> Resolver {
        let db = MemoryAccounts::new().with_shells(["/bin/sh", "/bin/bash"]);
        db.add("root", 0, "/bin/bash");
        db.add("alice", 1000, "/bin/bash");
        db.add("svc", 1001, "/usr/sbin/nologin");
        Resolver::new(
            Arc::new(db),
            Arc::new(Eligibility::new(EligibilityPolicy::ShellRegistry)),
            home_links,
        )
    }

    #[test]
    fn test_parse_shapes() {
        let p = |s: &str| VirtualNode::parse(Path::new(s), false);
        assert_eq!(p("/"), Some(VirtualNode::Root));
        assert_eq!(p(""), Some(VirtualNode::Root));
        assert_eq!(p("/stats"), Some(VirtualNode::StatsFile));
        assert_eq!(p("/alice"), Some(VirtualNode::AccountDir { username: "alice".into() }));
        assert_eq!(p("alice/"), Some(VirtualNode::AccountDir { username: "alice".into() }));
        assert_eq!(
            p("/alice/shell"),
            Some(VirtualNode::AttributeFile {
                username: "alice".into(),
                kind: AttributeKind::Shell
            })
        );
        assert_eq!(p("/alice/Shell"), None);
        assert_eq!(p("/alice/id/extra"), None);
        assert_eq!(p("/alice/../bob"), None);
        assert_eq!(p("/alice/home_link"), None);
        assert_eq!(
            VirtualNode::parse(Path::new("/alice/home_link"), true),
            Some(VirtualNode::HomeLink { username: "alice".into() })
        );
    }

    #[test]
    fn test_parse_non_utf8() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        let path = Path::new(OsStr::from_bytes(b"/al\xffice"));
        assert_eq!(VirtualNode::parse(path, false), None);
    }

    #[test]
    fn test_render_attributes() {
        let r = record();
        assert_eq!(AttributeKind::Id.render(&r), b"1000\n");
        assert_eq!(AttributeKind::Home.render(&r), b"/home/alice\n");
        assert_eq!(AttributeKind::Shell.render(&r), b"/bin/bash\n");
        assert_eq!(
            String::from_utf8(AttributeKind::Info.render(&r)).unwrap(),
            "name: alice\nuid: 1000\ngid: 100\nhome: /home/alice\nshell: /bin/bash\n"
        );

        let with_comment = AccountRecord {
            comment: "Alice L".into(),
            ..r
        };
        assert!(
            String::from_utf8(AttributeKind::Info.render(&with_comment))
                .unwrap()
                .ends_with("comment: Alice L\n")
        );
    }

    #[test]
    fn test_render_stats() {
        let stats = MountStats {
            mode: BackingMode::Mirrored,
            owner: "amy".into(),
            created: DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        assert_eq!(
            String::from_utf8(stats.render()).unwrap(),
            "mode: mirrored\nowner: amy\ncreated: 2024-05-01T12:00:00Z\n"
        );
    }

    #[test]
    fn test_account_entries() {
        let names: Vec<_> = account_entries(true).into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["id", "home", "shell", "info", "home_link"]);
        assert_eq!(account_entries(false).len(), 4);
        assert!(is_reserved_name("info", false));
        assert!(!is_reserved_name("home_link", false));
        assert!(!is_reserved_name("notes.txt", true));
    }

    #[tokio::test]
    async fn test_resolve_filters_ineligible() {
        let resolver = resolver(false);
        let alice = resolver.resolve(Path::new("/alice/id")).await.unwrap().unwrap();
        assert_eq!(alice.record.unwrap().uid, 1000);

        assert!(resolver.resolve(Path::new("/svc")).await.unwrap().is_none());
        assert!(resolver.resolve(Path::new("/root")).await.unwrap().is_none());
        assert!(resolver.resolve(Path::new("/ghost/id")).await.unwrap().is_none());

        let root = resolver.resolve(Path::new("/")).await.unwrap().unwrap();
        assert!(root.record.is_none());
    }

    #[tokio::test]
    async fn test_exposed_accounts_sorted() {
        let resolver = resolver(false);
        let names: Vec<_> = resolver
            .exposed_accounts()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.username)
            .collect();
        assert_eq!(names, vec!["alice"]);
    }
}
