//! Declared containers.
//!
//! Each `*.toml` file in the config directory declares one container named
//! after the file stem. Values absent from a file fall back to the global
//! `[defaults]` table for parameters the schema marks inheritable.

use crate::error::{CoreError, Result};
use crate::schema::ConfigSchema;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

/// Resolve `key` from the container table, then from `defaults` if the
/// parameter is inheritable.
pub fn lookup<'a>(
    schema: &ConfigSchema,
    key: &str,
    container: &'a Table,
    defaults: &'a Table,
) -> Option<&'a Value> {
    container.get(key).or_else(|| {
        schema
            .parameter(key)
            .filter(|p| p.inheritable)
            .and_then(|_| defaults.get(key))
    })
}

/// A validated container declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub packages: Vec<String>,
    pub base_image: Option<String>,
    pub username: Option<String>,
    /// Interface name to veth count.
    pub usernet_allocation: BTreeMap<String, u32>,
    /// Required host interfaces, deduplicated in declaration order.
    pub networks: Vec<String>,
}

impl ContainerSpec {
    /// Container with no parameters set.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Validate `table` against `schema` and resolve every parameter.
    pub fn from_table(
        name: impl Into<String>,
        table: &Table,
        schema: &ConfigSchema,
        defaults: &Table,
        source_name: &str,
    ) -> Result<Self> {
        schema.check_table(source_name, table)?;
        let get = |key: &str| lookup(schema, key, table, defaults);
        schema.check_required(source_name, get)?;

        let strings = |key: &str| -> Vec<String> {
            get(key)
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(Value::as_str).map(String::from).collect())
                .unwrap_or_default()
        };

        let mut networks: Vec<String> = Vec::new();
        for network in strings("networks") {
            if networks.contains(&network) {
                tracing::warn!(source = %source_name, network = %network, "Duplicate network entry");
            } else {
                networks.push(network);
            }
        }

        let usernet_allocation = get("usernet_allocation")
            .and_then(Value::as_table)
            .map(|t| {
                t.iter()
                    .filter_map(|(iface, count)| {
                        let count = u32::try_from(count.as_integer()?).ok()?;
                        Some((iface.clone(), count))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            name: name.into(),
            packages: strings("packages"),
            base_image: get("base_image").and_then(Value::as_str).map(String::from),
            username: get("username").and_then(Value::as_str).map(String::from),
            usernet_allocation,
            networks,
        })
    }

    /// Load one container file; the container is named after the file stem.
    pub fn from_file(path: &Path, schema: &ConfigSchema, defaults: &Table) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| CoreError::validation(path.display().to_string(), "invalid file name"))?;
        let contents = std::fs::read_to_string(path)?;
        let table: Table = contents.parse()?;
        let spec = Self::from_table(name, &table, schema, defaults, &path.display().to_string())?;
        tracing::debug!(container = %spec.name, path = %path.display(), "Loaded container config");
        Ok(spec)
    }
}

impl fmt::Display for ContainerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;
        writeln!(f, "  packages: {}", self.packages.join(" "))?;
        if let Some(base) = &self.base_image {
            writeln!(f, "  base_image: {}", base)?;
        }
        if let Some(user) = &self.username {
            writeln!(f, "  username: {}", user)?;
        }
        if !self.usernet_allocation.is_empty() {
            let allocation: Vec<String> = self
                .usernet_allocation
                .iter()
                .map(|(iface, count)| format!("{}={}", iface, count))
                .collect();
            writeln!(f, "  usernet_allocation: {}", allocation.join(", "))?;
        }
        if !self.networks.is_empty() {
            writeln!(f, "  networks: {}", self.networks.join(", "))?;
        }
        Ok(())
    }
}

/// All declared containers, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ContainerRegistry {
    containers: BTreeMap<String, ContainerSpec>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.toml` file in `dir`, in file name order.
    pub fn load_dir(dir: &Path, schema: &ConfigSchema, defaults: &Table) -> Result<Self> {
        if !dir.is_dir() {
            return Err(CoreError::not_found(
                "container config directory",
                dir.display().to_string(),
            ));
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut registry = Self::new();
        for path in paths {
            registry.insert(ContainerSpec::from_file(&path, schema, defaults)?);
        }
        tracing::info!(dir = %dir.display(), count = registry.len(), "Loaded container configs");
        Ok(registry)
    }

    /// Add or replace a container.
    pub fn insert(&mut self, spec: ContainerSpec) -> Option<ContainerSpec> {
        self.containers.insert(spec.name.clone(), spec)
    }

    pub fn get(&self, name: &str) -> Result<&ContainerSpec> {
        self.containers
            .get(name)
            .ok_or_else(|| CoreError::not_found("container", name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.containers.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContainerSpec> {
        self.containers.values()
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ConfigSchema {
        ConfigSchema::standard().unwrap()
    }

    fn table(s: &str) -> Table {
        s.parse().unwrap()
    }

    #[test]
    fn test_from_table() {
        let spec = ContainerSpec::from_table(
            "web",
            &table(
                r#"
                packages = ["www-servers/nginx"]
                base_image = "base"
                username = "alice"
                networks = ["lxcbr0", "lxcbr0"]
                [usernet_allocation]
                lxcbr0 = 2
                "#,
            ),
            &schema(),
            &Table::new(),
            "web.toml",
        )
        .unwrap();

        assert_eq!(spec.name, "web");
        assert_eq!(spec.packages, vec!["www-servers/nginx"]);
        assert_eq!(spec.base_image.as_deref(), Some("base"));
        assert_eq!(spec.username.as_deref(), Some("alice"));
        assert_eq!(spec.networks, vec!["lxcbr0"]);
        assert_eq!(spec.usernet_allocation.get("lxcbr0"), Some(&2));
    }

    #[test]
    fn test_defaults_fill_inheritable() {
        let defaults = table("username = 'lxc'\npackages = ['sys-apps/busybox']");
        let spec =
            ContainerSpec::from_table("base", &Table::new(), &schema(), &defaults, "base.toml")
                .unwrap();
        assert_eq!(spec.username.as_deref(), Some("lxc"));
        assert_eq!(spec.packages, vec!["sys-apps/busybox"]);

        let own = ContainerSpec::from_table(
            "web",
            &table("username = 'bob'"),
            &schema(),
            &defaults,
            "web.toml",
        )
        .unwrap();
        assert_eq!(own.username.as_deref(), Some("bob"));
    }

    #[test]
    fn test_base_image_not_inherited() {
        let schema = schema();
        let defaults = table("base_image = 'base'");
        assert!(lookup(&schema, "base_image", &Table::new(), &defaults).is_none());
    }

    #[test]
    fn test_missing_packages() {
        let err = ContainerSpec::from_table("web", &Table::new(), &schema(), &Table::new(), "web.toml")
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn test_registry_get() {
        let mut registry = ContainerRegistry::new();
        registry.insert(ContainerSpec::new("web"));
        assert!(registry.get("web").is_ok());
        assert!(registry.get("db").unwrap_err().is_not_found());
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("base.toml"), "packages = ['sys-apps/busybox']").unwrap();
        std::fs::write(
            dir.path().join("web.toml"),
            "packages = ['www-servers/nginx']\nbase_image = 'base'",
        )
        .unwrap();
        std::fs::write(dir.path().join("README"), "not a config").unwrap();

        let registry = ContainerRegistry::load_dir(dir.path(), &schema(), &Table::new()).unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["base", "web"]);
    }

    #[test]
    fn test_load_dir_rejects_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("web.toml"), "packages = ['a']\ncolor = 'blue'").unwrap();
        let err = ContainerRegistry::load_dir(dir.path(), &schema(), &Table::new()).unwrap_err();
        assert!(err.to_string().contains("unknown parameter: color"));
    }

    #[test]
    fn test_load_missing_dir() {
        let err = ContainerRegistry::load_dir(Path::new("/nonexistent/gentainer"), &schema(), &Table::new())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_display() {
        let mut spec = ContainerSpec::new("web");
        spec.packages = vec!["a".into(), "b".into()];
        spec.networks = vec!["lxcbr0".into()];
        assert_eq!(spec.to_string(), "web:\n  packages: a b\n  networks: lxcbr0\n");
    }
}
