//! Top-level orchestration: ties the loaded configuration to the
//! reconcilers and drives them in dependency order.

use crate::config::GlobalConfig;
use crate::container::{ContainerRegistry, ContainerSpec};
use crate::error::{CoreError, Result};
use crate::graph::build_order;
use crate::layers::{BackingTable, LayerManager, StorageLayer};
use crate::nets::{HostNet, HostNetworkConfig};
use crate::schema::ConfigSchema;
use crate::users::UserManager;
use gentainer_host::{Emerge, HostError, IdentityDb, IpRoute, NetDevices, PackageInstaller, SystemIdentity};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

/// Host capabilities the reconcilers act through.
#[derive(Clone)]
pub struct HostTools {
    pub backings: BackingTable,
    pub devices: Arc<dyn NetDevices>,
    pub identity: Arc<dyn IdentityDb>,
    pub installer: Arc<dyn PackageInstaller>,
}

impl HostTools {
    /// The real host tools: btrfs, iproute2, passwd/useradd and emerge.
    pub fn system() -> Self {
        Self {
            backings: BackingTable::with_defaults(),
            devices: Arc::new(IpRoute::new()),
            identity: Arc::new(SystemIdentity::new()),
            installer: Arc::new(Emerge::new()),
        }
    }
}

/// Loaded configuration plus the host tools to reconcile it with.
pub struct Gentainer {
    config: GlobalConfig,
    containers: ContainerRegistry,
    host_net: HostNet,
    tools: HostTools,
    force: bool,
}

impl Gentainer {
    /// Build the schema from the enabled modules and load every container
    /// and the host network config.
    ///
    /// A missing network config file is treated as declaring no interfaces.
    pub fn load(config: GlobalConfig, tools: HostTools, force: bool) -> Result<Self> {
        let schema = ConfigSchema::from_module_names(&config.modules)?;
        schema.check_defaults(&config.defaults)?;
        let containers = ContainerRegistry::load_dir(&config.config_dir, &schema, &config.defaults)?;

        let network = match HostNetworkConfig::from_file(&config.network_config) {
            Ok(network) => network,
            Err(CoreError::MissingFile(path)) => {
                tracing::warn!(path = %path.display(), "Network config not found, no interfaces declared");
                HostNetworkConfig::new()
            }
            Err(e) => return Err(e),
        };

        Ok(Self::new(config, containers, network, tools, force))
    }

    pub fn new(
        config: GlobalConfig,
        containers: ContainerRegistry,
        network: HostNetworkConfig,
        tools: HostTools,
        force: bool,
    ) -> Self {
        let host_net = HostNet::new(network, tools.devices.clone(), force);
        Self {
            config,
            containers,
            host_net,
            tools,
            force,
        }
    }

    pub fn containers(&self) -> &ContainerRegistry {
        &self.containers
    }

    pub fn network(&self) -> &HostNetworkConfig {
        self.host_net.config()
    }

    /// Render containers whose name contains `filter`, then the host
    /// network config.
    pub fn list(&self, filter: Option<&str>) -> String {
        let mut out = String::new();
        for spec in self
            .containers
            .iter()
            .filter(|s| filter.map_or(true, |f| s.name.contains(f)))
        {
            let _ = write!(out, "{}", spec);
        }
        if !self.network().is_empty() {
            let _ = write!(out, "networks:\n{}", self.network());
        }
        out
    }

    /// Network and user reconciliation for one container.
    pub async fn prepare(&self, name: &str) -> Result<()> {
        let spec = self.containers.get(name)?;
        self.prepare_spec(spec, &mut HashSet::new()).await
    }

    /// Build `name` and every ancestor, root first.
    pub async fn build(&self, name: &str) -> Result<()> {
        let order = build_order(&self.containers, name)?;
        let layers = self.layer_manager()?;
        self.check_packages(&order).await?;
        tracing::info!(container = %name, order = ?order, force = self.force, "Building container");

        let mut configured = HashSet::new();
        for member in &order {
            let spec = self.containers.get(member)?;
            self.prepare_spec(spec, &mut configured).await?;
            let layer = layers
                .prepare(&spec.name, spec.base_image.as_deref(), self.force)
                .await?;
            self.install(spec, &layer).await?;
        }
        tracing::info!(container = %name, "Build complete");
        Ok(())
    }

    /// Delete the container's layer.
    pub async fn clean(&self, name: &str) -> Result<()> {
        self.containers.get(name)?;
        self.layer_manager()?.clean(name).await
    }

    /// Verify the container's required interfaces exist on the host.
    pub async fn check(&self, name: &str) -> Result<()> {
        let spec = self.containers.get(name)?;
        self.host_net
            .validate_container_networks(&spec.name, &spec.networks)
            .await
    }

    /// Configure the named interfaces, or every declared one when empty.
    pub async fn net_prepare(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            self.host_net.prepare().await
        } else {
            self.host_net.configure(names).await
        }
    }

    /// Delete the named interfaces, or every declared one when empty.
    pub async fn net_clean(&self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            self.host_net.clean_all().await
        } else {
            self.host_net.clean(names).await
        }
    }

    /// Resolve every package atom of the chain against the package tree.
    async fn check_packages(&self, order: &[String]) -> Result<()> {
        let mut errors = Vec::new();
        for member in order {
            let spec = self.containers.get(member)?;
            let mut missing = Vec::new();
            for atom in &spec.packages {
                if !self.tools.installer.package_exists(atom).await? {
                    missing.push(atom.clone());
                }
            }
            if !missing.is_empty() {
                tracing::error!(container = %spec.name, packages = ?missing, "Unknown packages");
                errors.push(CoreError::UnknownPackages {
                    container: spec.name.clone(),
                    packages: missing,
                });
            }
        }
        CoreError::collect(errors)
    }

    async fn prepare_spec(&self, spec: &ContainerSpec, configured: &mut HashSet<String>) -> Result<()> {
        let pending: Vec<String> = spec
            .networks
            .iter()
            .filter(|n| !configured.contains(*n))
            .cloned()
            .collect();
        if pending.len() < spec.networks.len() {
            tracing::debug!(container = %spec.name, "Skipping interfaces configured earlier in this run");
        }
        if !pending.is_empty() {
            self.host_net.configure(&pending).await?;
            configured.extend(pending);
        }

        match &spec.username {
            Some(username) => {
                self.users()
                    .prepare(username, &spec.usernet_allocation, &spec.name)
                    .await?
            }
            None => tracing::debug!(container = %spec.name, "No username, skipping user setup"),
        }
        Ok(())
    }

    async fn install(&self, spec: &ContainerSpec, layer: &StorageLayer) -> Result<()> {
        if spec.packages.is_empty() {
            tracing::warn!(container = %spec.name, "No packages declared");
            return Ok(());
        }
        tracing::info!(container = %spec.name, packages = ?spec.packages, "Installing packages");
        match self.tools.installer.install(&layer.path, &spec.packages).await {
            Ok(output) => {
                tracing::trace!(container = %spec.name, stdout = %output.stdout, "Installer output");
                Ok(())
            }
            Err(HostError::ToolFailed { stderr, .. }) => Err(CoreError::Install {
                container: spec.name.clone(),
                output: stderr,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn layer_manager(&self) -> Result<LayerManager> {
        LayerManager::from_table(&self.config.build_dir, &self.tools.backings, &self.config.dir_backing)
    }

    fn users(&self) -> UserManager {
        UserManager::new(
            self.tools.identity.clone(),
            self.config.lxc_usernet_file.clone(),
            self.force,
        )
        .with_groups(self.config.user_groups.clone())
    }
}
