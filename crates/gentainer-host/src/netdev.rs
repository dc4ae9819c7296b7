//! Host network devices.
//!
//! The real implementation shells out to iproute2 and reads its JSON
//! output (`ip -json -details addr show`), which carries link kind and
//! addresses in one listing.

use crate::command::run;
use crate::error::{HostError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

/// An address assigned to an interface.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddressInfo {
    /// Address family as printed by iproute2 (`inet`, `inet6`).
    #[serde(default)]
    pub family: String,
    /// The address itself.
    pub local: String,
    /// Prefix length.
    #[serde(rename = "prefixlen")]
    pub prefix_len: u8,
}

/// Link-type details.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkInfo {
    /// Kernel link kind (`bridge`, `veth`, ...).
    #[serde(rename = "info_kind", default)]
    pub kind: Option<String>,
}

/// Observed attributes of one host interface.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InterfaceInfo {
    /// Kernel interface index.
    #[serde(rename = "ifindex")]
    pub index: u32,
    /// Interface name.
    #[serde(rename = "ifname")]
    pub name: String,
    /// Interface flags (`UP`, `BROADCAST`, ...).
    #[serde(default)]
    pub flags: Vec<String>,
    /// MTU.
    #[serde(default)]
    pub mtu: Option<u32>,
    /// Operational state.
    #[serde(rename = "operstate", default)]
    pub oper_state: Option<String>,
    /// Link details, present with `-details`.
    #[serde(rename = "linkinfo", default)]
    pub link_info: Option<LinkInfo>,
    /// Assigned addresses.
    #[serde(rename = "addr_info", default)]
    pub addresses: Vec<AddressInfo>,
}

impl InterfaceInfo {
    /// Minimal record, mostly useful for in-memory device tables.
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            flags: Vec::new(),
            mtu: None,
            oper_state: None,
            link_info: None,
            addresses: Vec::new(),
        }
    }

    /// Kernel link kind, if reported.
    pub fn kind(&self) -> Option<&str> {
        self.link_info.as_ref().and_then(|info| info.kind.as_deref())
    }
}

impl fmt::Display for InterfaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (index {}, kind {}",
            self.name,
            self.index,
            self.kind().unwrap_or("unknown")
        )?;
        if let Some(state) = &self.oper_state {
            write!(f, ", state {}", state)?;
        }
        for addr in &self.addresses {
            write!(f, ", {}/{}", addr.local, addr.prefix_len)?;
        }
        write!(f, ")")
    }
}

/// Parse `ip -json` interface output.
pub fn parse_interfaces(json: &str) -> Result<Vec<InterfaceInfo>> {
    // iproute2 prints nothing at all for an empty namespace
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(json).map_err(|e| HostError::Output {
        program: "ip".into(),
        message: e.to_string(),
    })
}

/// Network device operations the reconciler needs.
#[async_trait]
pub trait NetDevices: Send + Sync {
    /// Every interface currently present on the host.
    async fn interfaces(&self) -> Result<Vec<InterfaceInfo>>;

    /// Create interface `name` of link kind `kind`.
    async fn add_interface(&self, name: &str, kind: &str) -> Result<()>;

    /// Assign `address/prefix_len` to interface `name`.
    async fn add_address(&self, name: &str, address: IpAddr, prefix_len: u8) -> Result<()>;

    /// Delete interface `name`.
    async fn delete_interface(&self, name: &str) -> Result<()>;

    /// Names of every interface currently present on the host.
    async fn interface_names(&self) -> Result<Vec<String>> {
        Ok(self
            .interfaces()
            .await?
            .into_iter()
            .map(|iface| iface.name)
            .collect())
    }

    /// Observed attributes of one interface, `None` when absent.
    async fn interface(&self, name: &str) -> Result<Option<InterfaceInfo>> {
        Ok(self
            .interfaces()
            .await?
            .into_iter()
            .find(|iface| iface.name == name))
    }
}

/// iproute2 (`ip`) backed device table.
#[derive(Debug, Clone)]
pub struct IpRoute {
    binary: PathBuf,
}

impl Default for IpRoute {
    fn default() -> Self {
        Self::new()
    }
}

impl IpRoute {
    /// Use `ip` from `$PATH`.
    pub fn new() -> Self {
        Self::with_binary("ip")
    }

    /// Use a specific `ip` binary.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl NetDevices for IpRoute {
    async fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        let out = run(&self.binary, ["-json", "-details", "addr", "show"]).await?;
        let interfaces = parse_interfaces(&out.stdout)?;
        tracing::trace!(count = interfaces.len(), "Listed host interfaces");
        Ok(interfaces)
    }

    async fn add_interface(&self, name: &str, kind: &str) -> Result<()> {
        tracing::debug!(interface = %name, kind = %kind, "Adding interface");
        run(&self.binary, ["link", "add", "name", name, "type", kind]).await?;
        Ok(())
    }

    async fn add_address(&self, name: &str, address: IpAddr, prefix_len: u8) -> Result<()> {
        let cidr = format!("{}/{}", address, prefix_len);
        tracing::debug!(interface = %name, address = %cidr, "Adding address");
        run(&self.binary, ["addr", "add", cidr.as_str(), "dev", name]).await?;
        Ok(())
    }

    async fn delete_interface(&self, name: &str) -> Result<()> {
        tracing::debug!(interface = %name, "Deleting interface");
        run(&self.binary, ["link", "del", "dev", name]).await?;
        Ok(())
    }
}
