//! # gentainer-host
//!
//! Host tool layer for gentainer. Every piece of host state the
//! reconcilers touch goes through one of the capability traits here, so the
//! core can be driven against real tools or in-memory stand-ins.
//!
//! | Capability | Trait | Real implementation |
//! |------------|-------|---------------------|
//! | Layer storage | [`LayerBacking`] | [`Btrfs`] (`btrfs subvolume ...`) |
//! | Network devices | [`NetDevices`] | [`IpRoute`] (`ip -json ...`) |
//! | Accounts | [`IdentityDb`] | [`SystemIdentity`] (`getpwnam`, `useradd`) |
//! | Packages | [`PackageInstaller`] | [`Emerge`] (`emerge --root`, `portageq`) |
//!
//! ## Quick Start
//!
//! ```no_run
//! use gentainer_host::{Btrfs, LayerBacking};
//! use std::path::Path;
//!
//! # async fn example() -> gentainer_host::Result<()> {
//! let backing = Btrfs::new();
//! backing.create(Path::new("/var/lib/gentainer/base")).await?;
//! backing
//!     .snapshot(
//!         Path::new("/var/lib/gentainer/base"),
//!         Path::new("/var/lib/gentainer/web"),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! All calls block until the tool exits; there are no timeouts.

mod backing;
mod command;
mod error;
mod identity;
mod installer;
mod netdev;

pub use backing::{Btrfs, LayerBacking};
pub use command::{run, CommandOutput};
pub use error::{HostError, Result};
pub use identity::{Account, IdentityDb, SystemIdentity};
pub use installer::{Emerge, PackageInstaller};
pub use netdev::{parse_interfaces, AddressInfo, InterfaceInfo, IpRoute, LinkInfo, NetDevices};
