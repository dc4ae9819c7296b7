//! In-memory host tools for driving the reconcilers without root.

#![allow(dead_code)]

use async_trait::async_trait;
use gentainer_core::{
    BackingTable, ContainerRegistry, ContainerSpec, Gentainer, GlobalConfig, HostNetworkConfig,
    HostTools,
};
use gentainer_host::{
    Account, AddressInfo, CommandOutput, HostError, IdentityDb, InterfaceInfo, LayerBacking, LinkInfo,
    NetDevices, PackageInstaller, Result,
};
use nix::unistd::{getgid, getuid};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

fn tool_failed(command: String, stderr: &str) -> HostError {
    HostError::ToolFailed {
        command,
        exit_code: 1,
        stderr: stderr.to_string(),
    }
}

/// Layers are plain directories; every call is recorded.
#[derive(Default)]
pub struct FakeBacking {
    pub ops: Mutex<Vec<String>>,
}

impl FakeBacking {
    pub const KIND: &'static str = "fake";

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }
}

fn leaf(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl LayerBacking for FakeBacking {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    async fn create(&self, path: &Path) -> Result<()> {
        self.record(format!("create {}", leaf(path)));
        std::fs::create_dir(path)?;
        Ok(())
    }

    async fn snapshot(&self, source: &Path, dest: &Path) -> Result<()> {
        self.record(format!("snapshot {} {}", leaf(source), leaf(dest)));
        if !source.is_dir() {
            return Err(tool_failed(
                format!("snapshot {}", source.display()),
                "ERROR: cannot snapshot: not a subvolume",
            ));
        }
        std::fs::create_dir(dest)?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.record(format!("delete {}", leaf(path)));
        std::fs::remove_dir_all(path)?;
        Ok(())
    }
}

/// Interface table kept in memory.
#[derive(Default)]
pub struct FakeNetDevices {
    pub interfaces: Mutex<BTreeMap<String, InterfaceInfo>>,
}

impl FakeNetDevices {
    /// Pre-populate an interface as if it already existed on the host.
    pub fn with_interface(self, name: &str, kind: &str) -> Self {
        {
            let mut interfaces = self.interfaces.lock().unwrap();
            let mut info = InterfaceInfo::new(interfaces.len() as u32 + 1, name);
            info.link_info = Some(LinkInfo {
                kind: Some(kind.to_string()),
            });
            interfaces.insert(name.to_string(), info);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<InterfaceInfo> {
        self.interfaces.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl NetDevices for FakeNetDevices {
    async fn interfaces(&self) -> Result<Vec<InterfaceInfo>> {
        Ok(self.interfaces.lock().unwrap().values().cloned().collect())
    }

    async fn add_interface(&self, name: &str, kind: &str) -> Result<()> {
        let mut interfaces = self.interfaces.lock().unwrap();
        if interfaces.contains_key(name) {
            return Err(tool_failed(
                format!("ip link add name {} type {}", name, kind),
                "RTNETLINK answers: File exists",
            ));
        }
        let mut info = InterfaceInfo::new(interfaces.len() as u32 + 1, name);
        info.link_info = Some(LinkInfo {
            kind: Some(kind.to_string()),
        });
        interfaces.insert(name.to_string(), info);
        Ok(())
    }

    async fn add_address(&self, name: &str, address: IpAddr, prefix_len: u8) -> Result<()> {
        let mut interfaces = self.interfaces.lock().unwrap();
        let info = interfaces.get_mut(name).ok_or_else(|| {
            tool_failed(
                format!("ip addr add {}/{} dev {}", address, prefix_len, name),
                "Cannot find device",
            )
        })?;
        info.addresses.push(AddressInfo {
            family: if address.is_ipv4() { "inet" } else { "inet6" }.to_string(),
            local: address.to_string(),
            prefix_len,
        });
        Ok(())
    }

    async fn delete_interface(&self, name: &str) -> Result<()> {
        self.interfaces
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| tool_failed(format!("ip link del dev {}", name), "Cannot find device"))
    }
}

/// Accounts with the caller's uid/gid and homes under a temp directory.
pub struct FakeIdentity {
    pub home_root: PathBuf,
    pub accounts: Mutex<BTreeMap<String, Account>>,
    pub created: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeIdentity {
    pub fn new(home_root: &Path) -> Self {
        Self {
            home_root: home_root.to_path_buf(),
            accounts: Mutex::new(BTreeMap::new()),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> Vec<(String, Vec<String>)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityDb for FakeIdentity {
    async fn lookup(&self, username: &str) -> Result<Option<Account>> {
        Ok(self.accounts.lock().unwrap().get(username).cloned())
    }

    async fn create_account(&self, username: &str, groups: &[String]) -> Result<CommandOutput> {
        let home = self.home_root.join(username);
        std::fs::create_dir_all(&home)?;
        self.accounts.lock().unwrap().insert(
            username.to_string(),
            Account {
                name: username.to_string(),
                uid: getuid().as_raw(),
                gid: getgid().as_raw(),
                home,
            },
        );
        self.created
            .lock()
            .unwrap()
            .push((username.to_string(), groups.to_vec()));
        Ok(CommandOutput::default())
    }
}

/// Records installs; never touches the layer. Every atom exists unless
/// forgotten.
#[derive(Default)]
pub struct FakeInstaller {
    pub installs: Mutex<Vec<(String, Vec<String>)>>,
    pub unknown: Mutex<Vec<String>>,
}

impl FakeInstaller {
    pub fn installs(&self) -> Vec<(String, Vec<String>)> {
        self.installs.lock().unwrap().clone()
    }

    /// Make `atom` absent from the package tree.
    pub fn forget(&self, atom: &str) {
        self.unknown.lock().unwrap().push(atom.to_string());
    }
}

#[async_trait]
impl PackageInstaller for FakeInstaller {
    async fn install(&self, root: &Path, packages: &[String]) -> Result<CommandOutput> {
        self.installs
            .lock()
            .unwrap()
            .push((leaf(root), packages.to_vec()));
        Ok(CommandOutput::default())
    }

    async fn package_exists(&self, atom: &str) -> Result<bool> {
        Ok(!self.unknown.lock().unwrap().iter().any(|a| a == atom))
    }
}

/// A gentainer instance over fakes, rooted in a temp directory.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub backing: Arc<FakeBacking>,
    pub devices: Arc<FakeNetDevices>,
    pub identity: Arc<FakeIdentity>,
    pub installer: Arc<FakeInstaller>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_devices(FakeNetDevices::default())
    }

    pub fn with_devices(devices: FakeNetDevices) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let homes = dir.path().join("home");
        std::fs::create_dir(&homes).unwrap();
        Self {
            identity: Arc::new(FakeIdentity::new(&homes)),
            dir,
            backing: Arc::new(FakeBacking::default()),
            devices: Arc::new(devices),
            installer: Arc::new(FakeInstaller::default()),
        }
    }

    pub fn config(&self) -> GlobalConfig {
        GlobalConfig {
            build_dir: self.dir.path().join("build"),
            config_dir: self.dir.path().join("config"),
            lxc_usernet_file: self.dir.path().join("lxc-usernet"),
            network_config: self.dir.path().join("networks.toml"),
            dir_backing: FakeBacking::KIND.to_string(),
            ..GlobalConfig::default()
        }
    }

    pub fn tools(&self) -> HostTools {
        let mut backings = BackingTable::new();
        backings.register(self.backing.clone());
        HostTools {
            backings,
            devices: self.devices.clone(),
            identity: self.identity.clone(),
            installer: self.installer.clone(),
        }
    }

    /// Gentainer over the given containers and network config.
    pub fn gentainer(&self, containers: Vec<ContainerSpec>, network: HostNetworkConfig, force: bool) -> Gentainer {
        let mut registry = ContainerRegistry::new();
        for spec in containers {
            registry.insert(spec);
        }
        Gentainer::new(
            self.config(),
            registry,
            network,
            self.tools(),
            force,
        )
    }

    pub fn layer(&self, name: &str) -> PathBuf {
        self.dir.path().join("build").join(name)
    }

    pub fn usernet(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("lxc-usernet")).unwrap_or_default()
    }
}

/// Container with packages and an optional base.
pub fn container(name: &str, base: Option<&str>) -> ContainerSpec {
    let mut spec = ContainerSpec::new(name);
    spec.packages = vec![format!("app-misc/{}", name)];
    spec.base_image = base.map(String::from);
    spec
}
