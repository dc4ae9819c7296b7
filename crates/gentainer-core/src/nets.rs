//! Host network interfaces.
//!
//! [`HostNetworkConfig`] is the validated set of interfaces the host should
//! carry; [`HostNet`] reconciles the live host against it through a
//! [`NetDevices`] implementation.

use crate::error::{CoreError, Result};
use gentainer_host::NetDevices;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use toml::{Table, Value};

/// Keys accepted in an interface table.
pub const INTERFACE_PARAMETERS: [&str; 3] = ["type", "address", "mask"];

/// Interface kind when `type` is omitted.
pub const DEFAULT_KIND: &str = "bridge";

/// Prefix length when `address` is given without `mask`.
pub const DEFAULT_MASK: u8 = 32;

// IFNAMSIZ including the trailing NUL
const IFNAMSIZ: usize = 16;

pub(crate) fn check_interface_name(name: &str) -> std::result::Result<(), String> {
    let valid = !name.is_empty()
        && name.len() < IFNAMSIZ
        && name != "."
        && name != ".."
        && !name.chars().any(|c| c == '/' || c == ':' || c.is_whitespace());
    if valid {
        Ok(())
    } else {
        Err(format!("invalid interface name: {:?}", name))
    }
}

/// Declared host interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSpec {
    pub name: String,
    pub kind: String,
    pub address: Option<IpAddr>,
    /// Prefix length; present iff `address` is.
    pub mask: Option<u8>,
}

impl InterfaceSpec {
    /// Interface of `kind` with no address.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            address: None,
            mask: None,
        }
    }

    pub fn with_address(mut self, address: IpAddr, mask: u8) -> Self {
        self.address = Some(address);
        self.mask = Some(mask);
        self
    }

    /// Validate one `[name]` table from the network config.
    ///
    /// Unknown keys and a mask without an address are dropped and logged.
    /// An address without a mask gets [`DEFAULT_MASK`].
    pub fn from_table(name: &str, table: &Table, source_name: &str) -> Result<Self> {
        check_interface_name(name).map_err(|reason| CoreError::validation(source_name, reason))?;

        for key in table.keys() {
            if !INTERFACE_PARAMETERS.contains(&key.as_str()) {
                tracing::error!(interface = %name, parameter = %key, "Invalid interface parameter, ignoring");
            }
        }

        let kind = match table.get("type") {
            Some(Value::String(kind)) if !kind.is_empty() => kind.clone(),
            Some(other) => {
                return Err(CoreError::validation(
                    source_name,
                    format!("invalid type for {}: {}", name, other),
                ))
            }
            None => {
                tracing::warn!(interface = %name, "Interface type not specified, defaulting to {}", DEFAULT_KIND);
                DEFAULT_KIND.to_string()
            }
        };

        let address = match table.get("address") {
            Some(Value::String(addr)) => Some(addr.parse::<IpAddr>().map_err(|e| {
                CoreError::validation(source_name, format!("invalid address for {}: {}: {}", name, addr, e))
            })?),
            Some(other) => {
                return Err(CoreError::validation(
                    source_name,
                    format!("invalid address for {}: {}", name, other),
                ))
            }
            None => None,
        };

        let mut spec = Self::new(name, kind);
        match (address, table.get("mask")) {
            (Some(address), Some(mask)) => {
                let max = if address.is_ipv4() { 32 } else { 128 };
                let mask = mask
                    .as_integer()
                    .filter(|m| (0..=max).contains(m))
                    .and_then(|m| u8::try_from(m).ok())
                    .ok_or_else(|| {
                        CoreError::validation(source_name, format!("invalid mask for {}: {}", name, mask))
                    })?;
                spec = spec.with_address(address, mask);
            }
            (Some(address), None) => {
                tracing::warn!(interface = %name, %address, "Mask not specified, defaulting to {}", DEFAULT_MASK);
                spec = spec.with_address(address, DEFAULT_MASK);
            }
            (None, Some(_)) => {
                tracing::error!(interface = %name, "Mask specified without address, ignoring");
            }
            (None, None) => {}
        }
        Ok(spec)
    }
}

impl fmt::Display for InterfaceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)?;
        if let (Some(address), Some(mask)) = (self.address, self.mask) {
            write!(f, " {}/{}", address, mask)?;
        }
        Ok(())
    }
}

/// Interfaces declared for the host, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostNetworkConfig {
    interfaces: BTreeMap<String, InterfaceSpec>,
}

impl HostNetworkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the network config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::MissingFile(path.to_path_buf()),
            _ => CoreError::Io(e),
        })?;
        let config = Self::parse(&contents, &path.display().to_string())?;
        tracing::debug!(path = %path.display(), interfaces = config.len(), "Loaded network config");
        Ok(config)
    }

    /// Parse TOML text where each top-level table is one interface.
    pub fn parse(contents: &str, source_name: &str) -> Result<Self> {
        let table: Table = contents.parse()?;
        Self::from_table(&table, source_name)
    }

    pub fn from_table(table: &Table, source_name: &str) -> Result<Self> {
        let mut config = Self::new();
        for (name, value) in table {
            let Value::Table(params) = value else {
                return Err(CoreError::validation(
                    source_name,
                    format!("interface {} must be a table", name),
                ));
            };
            config.insert(InterfaceSpec::from_table(name, params, source_name)?);
        }
        Ok(config)
    }

    pub fn insert(&mut self, spec: InterfaceSpec) -> Option<InterfaceSpec> {
        self.interfaces.insert(spec.name.clone(), spec)
    }

    pub fn get(&self, name: &str) -> Option<&InterfaceSpec> {
        self.interfaces.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.interfaces.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterfaceSpec> {
        self.interfaces.values()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

impl fmt::Display for HostNetworkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for spec in self.iter() {
            writeln!(f, "{}", spec)?;
        }
        Ok(())
    }
}

/// Reconciles host interfaces against a [`HostNetworkConfig`].
pub struct HostNet {
    config: HostNetworkConfig,
    devices: Arc<dyn NetDevices>,
    force: bool,
}

impl HostNet {
    pub fn new(config: HostNetworkConfig, devices: Arc<dyn NetDevices>, force: bool) -> Self {
        Self {
            config,
            devices,
            force,
        }
    }

    pub fn config(&self) -> &HostNetworkConfig {
        &self.config
    }

    /// Configure every declared interface.
    pub async fn prepare(&self) -> Result<()> {
        self.configure(&self.config.names()).await
    }

    /// Delete every declared interface.
    pub async fn clean_all(&self) -> Result<()> {
        self.clean(&self.config.names()).await
    }

    /// Configure each named interface, collecting per-interface failures.
    pub async fn configure(&self, names: &[String]) -> Result<()> {
        let mut errors = Vec::new();
        for name in names {
            if let Err(e) = self.configure_interface(name).await {
                tracing::error!(interface = %name, error = %e, "Failed to configure interface");
                errors.push(e);
            }
        }
        CoreError::collect(errors)
    }

    /// Delete each named interface; absent ones are skipped.
    pub async fn clean(&self, names: &[String]) -> Result<()> {
        let mut errors = Vec::new();
        for name in names {
            if let Err(e) = self.clean_interface(name).await {
                tracing::error!(interface = %name, error = %e, "Failed to clean interface");
                errors.push(e);
            }
        }
        CoreError::collect(errors)
    }

    async fn configure_interface(&self, name: &str) -> Result<()> {
        let spec = self
            .config
            .get(name)
            .ok_or_else(|| CoreError::not_found("network config", name))?;

        if let Some(existing) = self.devices.interface(name).await? {
            if !self.force {
                tracing::debug!(interface = %existing, "Interface already present");
                return Err(CoreError::already_exists("interface", name));
            }
            tracing::warn!(interface = %name, "Interface exists, recreating");
            self.devices.delete_interface(name).await?;
        }

        tracing::info!(interface = %spec, "Creating interface");
        self.devices.add_interface(name, &spec.kind).await?;
        if let (Some(address), Some(mask)) = (spec.address, spec.mask) {
            self.devices.add_address(name, address, mask).await?;
        }
        match self.devices.interface(name).await? {
            Some(observed) => tracing::info!(interface = %observed, "Interface configured"),
            None => tracing::warn!(interface = %name, "Interface not visible after creation"),
        }
        Ok(())
    }

    async fn clean_interface(&self, name: &str) -> Result<()> {
        if self.devices.interface(name).await?.is_none() {
            tracing::warn!(interface = %name, "Interface does not exist, skipping");
            return Ok(());
        }
        tracing::info!(interface = %name, "Deleting interface");
        self.devices.delete_interface(name).await?;
        Ok(())
    }

    /// Fail if any of `networks` is absent from the host.
    pub async fn validate_container_networks(&self, container: &str, networks: &[String]) -> Result<()> {
        if networks.is_empty() {
            tracing::debug!(container = %container, "No networks required");
            return Ok(());
        }
        let present = self.devices.interface_names().await?;
        let missing: Vec<String> = networks
            .iter()
            .filter(|n| !present.contains(*n))
            .cloned()
            .collect();
        if missing.is_empty() {
            tracing::info!(container = %container, networks = ?networks, "All networks present");
            Ok(())
        } else {
            Err(CoreError::MissingInterfaces {
                container: container.to_string(),
                interfaces: missing,
            })
        }
    }
}
