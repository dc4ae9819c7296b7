//! # gentainer-core
//!
//! Reconciles host resources for unprivileged LXC containers: storage
//! layers, host network interfaces, container users and their usernet
//! allocations. Each container is declared in its own TOML file; building
//! one builds its base image chain first.
//!
//! ## Quick Start
//!
//! ```no_run
//! use gentainer_core::{Gentainer, GlobalConfig, HostTools};
//! use std::path::Path;
//!
//! # async fn example() -> gentainer_core::Result<()> {
//! let config = GlobalConfig::load(Path::new("config.toml"))?;
//! let gentainer = Gentainer::load(config, HostTools::system(), false)?;
//!
//! // Snapshot chain base -> web, install packages into each layer
//! gentainer.build("web").await?;
//!
//! // Confirm the interfaces web needs are present
//! gentainer.check("web").await?;
//! # Ok(())
//! # }
//! ```
//!
//! Every reconciler refuses to overwrite diverging state unless `force` is
//! set, and nothing is retried.

mod config;
mod container;
mod error;
mod gentainer;
mod graph;
mod layers;
mod nets;
mod schema;
mod usernet;
mod users;

pub use config::{GlobalConfig, DEFAULT_BUILD_DIR, DEFAULT_USERNET_FILE};
pub use container::{lookup, ContainerRegistry, ContainerSpec};
pub use error::{CoreError, Result};
pub use gentainer::{Gentainer, HostTools};
pub use graph::build_order;
pub use layers::{BackingTable, LayerManager, StorageLayer};
pub use nets::{HostNet, HostNetworkConfig, InterfaceSpec, DEFAULT_KIND, DEFAULT_MASK, INTERFACE_PARAMETERS};
pub use schema::{
    default_module_names, ConfigSchema, Module, ParamType, Parameter, SchemaBuilder, Validator, BUILDER,
    LAYERS, MODULES, NETS, USERS,
};
pub use usernet::{ReconcileSummary, UsernetEntry, UsernetFile, USERNET_MODE, VETH};
pub use users::{UserManager, CONTAINER_HOME};

// Re-export host capabilities so callers can build their own HostTools.
pub use gentainer_host::{Account, CommandOutput, HostError, IdentityDb, InterfaceInfo, LayerBacking, NetDevices, PackageInstaller};
