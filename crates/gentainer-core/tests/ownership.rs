//! Container home ownership against the real filesystem.
//!
//! These tests chown paths to another account and require root.
//!
//! Run with: `cargo test -p gentainer-core --test ownership -- --ignored`

mod common;

use common::FakeIdentity;
use gentainer_core::{Account, UserManager};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::sync::Arc;

/// uid/gid of `nobody` on Gentoo.
const NOBODY: u32 = 65534;

fn nobody(home: &Path) -> Account {
    Account {
        name: "nobody".into(),
        uid: NOBODY,
        gid: NOBODY,
        home: home.to_path_buf(),
    }
}

fn owner(path: &Path) -> (u32, u32) {
    let meta = std::fs::metadata(path).unwrap();
    (meta.uid(), meta.gid())
}

fn manager(root: &Path) -> UserManager {
    let identity = Arc::new(FakeIdentity::new(&root.join("home")));
    UserManager::new(identity, root.join("lxc-usernet"), false)
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_ownership_corrected_for_every_component() {
    let root = tempfile::tempdir().unwrap();
    std::fs::set_permissions(root.path(), std::fs::Permissions::from_mode(0o755)).unwrap();
    let home = root.path().join("alice");
    std::fs::create_dir_all(home.join(".local/share")).unwrap();
    // pre-existing components owned by root
    assert_eq!(owner(&home.join(".local")), (0, 0));

    let path = manager(root.path())
        .ensure_container_home(&nobody(&home), "web")
        .await
        .unwrap();

    assert_eq!(path, home.join(".local/share/lxc/web"));
    for dir in [
        home.clone(),
        home.join(".local"),
        home.join(".local/share"),
        home.join(".local/share/lxc"),
        path.clone(),
    ] {
        assert_eq!(owner(&dir), (NOBODY, NOBODY), "{}", dir.display());
    }
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_missing_home_created_for_account() {
    let root = tempfile::tempdir().unwrap();
    let home = root.path().join("home/alice");

    manager(root.path())
        .ensure_container_home(&nobody(&home), "web")
        .await
        .unwrap();

    assert_eq!(owner(&home), (NOBODY, NOBODY));
    assert_eq!(owner(&home.join(".local/share/lxc/web")), (NOBODY, NOBODY));
}
