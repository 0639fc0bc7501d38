//! Account database watch.
//!
//! `useradd` and friends replace `/etc/passwd` by renaming a new file over
//! it, so the parent directory is watched and events are filtered by file
//! name. Bursts of events collapse into one reconciliation pass.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use usersfs_kernel::Reconciler;

use crate::constants::{WATCH_DEBOUNCE, WATCH_POLL_INTERVAL};

/// Handle to a running account database watcher.
pub struct AccountWatchHandle {
    /// Keep alive to continue watching.
    _watcher: RecommendedWatcher,
    shutdown_tx: oneshot::Sender<()>,
}

impl AccountWatchHandle {
    /// Stop the watcher.
    pub fn stop(self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Whether an event touches `file`.
fn touches(event: &Event, file: &Path) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant && event.paths.iter().any(|p| p.file_name() == file.file_name())
}

/// Start watching `passwd` and run a pass on every change.
pub fn watch_accounts(
    reconciler: Arc<Reconciler>,
    passwd: &Path,
) -> Result<AccountWatchHandle, notify::Error> {
    let file: PathBuf = passwd.to_path_buf();
    let dir = passwd
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("/"))
        .to_path_buf();

    let (tx, mut rx) = mpsc::channel::<()>(16);
    let filter = file.clone();
    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| {
            if let Ok(event) = result {
                if touches(&event, &filter) {
                    let _ = tx.try_send(());
                }
            }
        },
        notify::Config::default().with_poll_interval(WATCH_POLL_INTERVAL),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("account watcher shutting down");
                    break;
                }
                Some(()) = rx.recv() => {
                    tokio::time::sleep(WATCH_DEBOUNCE).await;
                    while rx.try_recv().is_ok() {}

                    match reconciler.reconcile().await {
                        Ok(report) => debug!(
                            generation = report.generation,
                            "pass after account database change"
                        ),
                        Err(e) => warn!(error = %e, "pass after account database change failed"),
                    }
                }
            }
        }
    });

    info!(path = %file.display(), "account watcher started");

    Ok(AccountWatchHandle {
        _watcher: watcher,
        shutdown_tx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};

    #[test]
    fn test_touches_filters_by_name() {
        let passwd = Path::new("/etc/passwd");
        let event = Event::new(EventKind::Modify(ModifyKind::Any)).add_path("/etc/passwd".into());
        assert!(touches(&event, passwd));

        let event = Event::new(EventKind::Create(CreateKind::File)).add_path("/etc/group".into());
        assert!(!touches(&event, passwd));

        let event = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path("/etc/passwd".into());
        assert!(!touches(&event, passwd));
    }
}
