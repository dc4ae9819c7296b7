//! Integration tests for gentainer-host.
//!
//! These tests require:
//! - root
//! - a btrfs filesystem (path in `GENTAINER_BTRFS_DIR`)
//! - iproute2
//! - a Portage tree for package lookups
//!
//! Run with: `cargo test -p gentainer-host -- --ignored`

use gentainer_host::{Btrfs, Emerge, IpRoute, LayerBacking, NetDevices, PackageInstaller};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

/// Test full subvolume lifecycle: create -> snapshot -> delete
#[tokio::test]
#[ignore = "requires root + btrfs"]
async fn test_btrfs_layer_lifecycle() {
    let Ok(dir) = std::env::var("GENTAINER_BTRFS_DIR") else {
        eprintln!("Skipping test: set GENTAINER_BTRFS_DIR to a directory on btrfs");
        return;
    };
    let dir = PathBuf::from(dir);
    let base = dir.join("gentainer-it-base");
    let derived = dir.join("gentainer-it-derived");

    let backing = Btrfs::new();
    backing.create(&base).await.expect("Failed to create subvolume");
    std::fs::write(base.join("marker"), "base").expect("Failed to write marker");

    backing
        .snapshot(&base, &derived)
        .await
        .expect("Failed to snapshot subvolume");
    assert_eq!(
        std::fs::read_to_string(derived.join("marker")).unwrap(),
        "base"
    );

    backing.delete(&derived).await.expect("Failed to delete snapshot");
    backing.delete(&base).await.expect("Failed to delete subvolume");
    assert!(!base.exists());
}

/// Test bridge lifecycle: add -> address -> observe -> delete
#[tokio::test]
#[ignore = "requires root + iproute2"]
async fn test_bridge_lifecycle() {
    let ip = IpRoute::new();
    let name = "gtnit0";

    ip.add_interface(name, "bridge")
        .await
        .expect("Failed to add bridge");
    ip.add_address(name, IpAddr::V4(Ipv4Addr::new(10, 254, 0, 1)), 24)
        .await
        .expect("Failed to add address");

    let info = ip
        .interface(name)
        .await
        .expect("Failed to list interfaces")
        .expect("bridge should exist");
    assert_eq!(info.kind(), Some("bridge"));
    assert!(info.addresses.iter().any(|a| a.local == "10.254.0.1"));

    ip.delete_interface(name)
        .await
        .expect("Failed to delete bridge");
    assert!(!ip.interface_names().await.unwrap().contains(&name.to_string()));
}

/// Listing works unprivileged and always includes loopback
#[tokio::test]
#[ignore = "requires iproute2"]
async fn test_list_includes_loopback() {
    let names = IpRoute::new().interface_names().await.unwrap();
    assert!(names.contains(&"lo".to_string()));
}

/// Package lookup against the host's Portage tree
#[tokio::test]
#[ignore = "requires portage"]
async fn test_portage_package_lookup() {
    let emerge = Emerge::new();
    assert!(emerge.package_exists("sys-apps/portage").await.unwrap());
    assert!(!emerge
        .package_exists("app-misc/gentainer-does-not-exist")
        .await
        .unwrap());
}
