//! Drive the FUSE adapter directly, without a kernel mount.
//!
//! Callbacks block on the runtime handle, so the tests call the adapter
//! from a plain thread and keep the runtime alongside.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use fuser::{FUSE_ROOT_ID, FileType};
use tempfile::TempDir;
use tokio::runtime::Runtime;
use usersfs_kernel::{BackingMode, MemoryAccounts, MountConfig};
use usersfs_server::session::prepare;
use usersfs_server::{FuseAdapter, errno};

struct Fixture {
    runtime: Runtime,
    fuse: FuseAdapter,
    db: Arc<MemoryAccounts>,
    backing: TempDir,
}

fn mirrored() -> Fixture {
    let runtime = Runtime::new().unwrap();
    let db = MemoryAccounts::new().with_shells(["/bin/sh", "/bin/bash"]);
    db.add("alice", 1000, "/bin/bash");
    db.add("bob", 1001, "/bin/sh");
    let db = Arc::new(db);

    let backing = TempDir::new().unwrap();
    let config = MountConfig {
        backing: BackingMode::Mirrored,
        backing_root: Some(backing.path().to_path_buf()),
        privileged: Some(true),
        home_links: true,
        ..Default::default()
    };
    let (fs, _) = runtime
        .block_on(prepare(&config, db.clone(), db.clone()))
        .unwrap();
    let fuse = FuseAdapter::new(fs, runtime.handle().clone());
    Fixture {
        runtime,
        fuse,
        db,
        backing,
    }
}

#[test]
fn user_files_round_trip_through_inodes() {
    let fx = mirrored();
    let alice = fx.fuse.lookup_entry(FUSE_ROOT_ID, OsStr::new("alice")).unwrap();

    let notes = fx.fuse.create_file(alice.ino, OsStr::new("notes"), 0o644).unwrap();
    assert_eq!(notes.kind, FileType::RegularFile);
    assert_eq!(fx.fuse.write_at(notes.ino, 0, b"hello").unwrap(), 5);
    assert_eq!(fx.fuse.read_at(notes.ino, 1, 3).unwrap(), b"ell");

    let resized = fx.fuse.resize(notes.ino, 2).unwrap();
    assert_eq!(resized.size, 2);
    assert_eq!(
        std::fs::read(fx.backing.path().join("alice/notes")).unwrap(),
        b"he"
    );

    // Renaming keeps the inode.
    fx.fuse
        .move_entry(alice.ino, OsStr::new("notes"), alice.ino, OsStr::new("todo"))
        .unwrap();
    assert_eq!(fx.fuse.read_at(notes.ino, 0, 16).unwrap(), b"he");

    fx.fuse.remove_file(alice.ino, OsStr::new("todo")).unwrap();
    assert_eq!(errno(&fx.fuse.attr_of(notes.ino).unwrap_err()), libc::ENOENT);
}

#[test]
fn attribute_files_are_guarded() {
    let fx = mirrored();
    let alice = fx.fuse.lookup_entry(FUSE_ROOT_ID, OsStr::new("alice")).unwrap();

    let err = fx.fuse.remove_file(alice.ino, OsStr::new("id")).unwrap_err();
    assert_eq!(errno(&err), libc::EPERM);

    let err = fx
        .fuse
        .move_entry(alice.ino, OsStr::new("shell"), alice.ino, OsStr::new("sh"))
        .unwrap_err();
    assert_eq!(errno(&err), libc::ENOTSUP);

    let link = fx.fuse.lookup_entry(alice.ino, OsStr::new("home_link")).unwrap();
    assert_eq!(link.kind, FileType::Symlink);
    assert_eq!(fx.fuse.link_target(link.ino).unwrap(), Path::new("/home/alice"));
}

#[test]
fn listing_tracks_account_changes() {
    let fx = mirrored();
    let names = |fx: &Fixture| -> Vec<String> {
        fx.fuse
            .list(FUSE_ROOT_ID, 0)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect()
    };
    assert_eq!(names(&fx), vec![".", "..", "stats", "alice", "bob"]);

    fx.db.add("carol", 1002, "/bin/sh");
    fx.runtime
        .block_on(fx.fuse.fs().reconciler().reconcile())
        .unwrap();
    assert_eq!(names(&fx), vec![".", "..", "stats", "alice", "bob", "carol"]);

    let bob = fx.fuse.lookup_entry(FUSE_ROOT_ID, OsStr::new("bob")).unwrap();
    fx.fuse.remove_dir(FUSE_ROOT_ID, OsStr::new("bob")).unwrap();
    assert!(!fx.db.names().contains(&"bob".to_string()));
    assert!(!fx.backing.path().join("bob").exists());
    assert_eq!(errno(&fx.fuse.attr_of(bob.ino).unwrap_err()), libc::ENOENT);
}
