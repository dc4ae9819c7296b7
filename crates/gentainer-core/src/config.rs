//! Global configuration.
//!
//! Loaded from a TOML file, then individual values may be overridden from
//! the environment. Every field has a default so an empty file is valid.

use crate::error::{CoreError, Result};
use crate::schema::default_module_names;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use toml::Table;

/// Default layer build directory.
pub const DEFAULT_BUILD_DIR: &str = "/tmp/gentainer_build";

/// Default LXC usernet file.
pub const DEFAULT_USERNET_FILE: &str = "/etc/lxc/lxc-usernet";

fn default_build_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BUILD_DIR)
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("./config")
}

fn default_usernet_file() -> PathBuf {
    PathBuf::from(DEFAULT_USERNET_FILE)
}

fn default_network_config() -> PathBuf {
    PathBuf::from("networks.toml")
}

fn default_dir_backing() -> String {
    "btrfs".to_string()
}

fn default_user_groups() -> Vec<String> {
    vec!["lxc".to_string()]
}

/// Host-wide gentainer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Directory holding one storage layer per container.
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,

    /// Directory of per-container `*.toml` files.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// LXC usernet file.
    #[serde(default = "default_usernet_file")]
    pub lxc_usernet_file: PathBuf,

    /// Host network interface config.
    #[serde(default = "default_network_config")]
    pub network_config: PathBuf,

    /// Layer backing kind.
    #[serde(default = "default_dir_backing")]
    pub dir_backing: String,

    /// Enabled config modules.
    #[serde(default = "default_module_names")]
    pub modules: Vec<String>,

    /// Supplementary groups for created container users.
    #[serde(default = "default_user_groups")]
    pub user_groups: Vec<String>,

    /// Fallback values for inheritable container parameters.
    #[serde(default)]
    pub defaults: Table,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            build_dir: default_build_dir(),
            config_dir: default_config_dir(),
            lxc_usernet_file: default_usernet_file(),
            network_config: default_network_config(),
            dir_backing: default_dir_backing(),
            modules: default_module_names(),
            user_groups: default_user_groups(),
            defaults: Table::new(),
        }
    }
}

impl GlobalConfig {
    /// Load from `path` and apply environment overrides.
    ///
    /// A missing file is an error; use [`GlobalConfig::default`] to run
    /// without one.
    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::from_file(path)?.apply_env())
    }

    /// Parse the TOML file at `path`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CoreError::MissingFile(path.to_path_buf()),
            _ => CoreError::Io(e),
        })?;
        let config = Self::parse(&contents)?;
        tracing::debug!(path = %path.display(), "Loaded global config");
        Ok(config)
    }

    /// Parse TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply overrides from the process environment.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `GENTAINER_BUILD_DIR` | `build_dir` |
    /// | `GENTAINER_CONFIG_DIR` | `config_dir` |
    /// | `GENTAINER_USERNET_FILE` | `lxc_usernet_file` |
    /// | `GENTAINER_NETWORK_CONFIG` | `network_config` |
    /// | `GENTAINER_DIR_BACKING` | `dir_backing` |
    pub fn apply_env(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides(self, var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            build_dir: var("GENTAINER_BUILD_DIR")
                .map(PathBuf::from)
                .unwrap_or(self.build_dir),
            config_dir: var("GENTAINER_CONFIG_DIR")
                .map(PathBuf::from)
                .unwrap_or(self.config_dir),
            lxc_usernet_file: var("GENTAINER_USERNET_FILE")
                .map(PathBuf::from)
                .unwrap_or(self.lxc_usernet_file),
            network_config: var("GENTAINER_NETWORK_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(self.network_config),
            dir_backing: var("GENTAINER_DIR_BACKING").unwrap_or(self.dir_backing),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GlobalConfig::default();
        assert_eq!(config.build_dir, PathBuf::from("/tmp/gentainer_build"));
        assert_eq!(config.lxc_usernet_file, PathBuf::from("/etc/lxc/lxc-usernet"));
        assert_eq!(config.dir_backing, "btrfs");
        assert_eq!(config.modules, vec!["builder", "layers", "users", "nets"]);
        assert_eq!(config.user_groups, vec!["lxc"]);
        assert!(config.defaults.is_empty());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        assert_eq!(GlobalConfig::parse("").unwrap(), GlobalConfig::default());
    }

    #[test]
    fn test_parse_partial() {
        let config = GlobalConfig::parse(
            r#"
            build_dir = "/var/lib/gentainer"
            modules = ["builder", "layers"]

            [defaults]
            username = "lxcuser"
            "#,
        )
        .unwrap();
        assert_eq!(config.build_dir, PathBuf::from("/var/lib/gentainer"));
        assert_eq!(config.modules, vec!["builder", "layers"]);
        assert_eq!(config.config_dir, PathBuf::from("./config"));
        assert_eq!(
            config.defaults.get("username").and_then(|v| v.as_str()),
            Some("lxcuser")
        );
    }

    #[test]
    fn test_parse_error() {
        let err = GlobalConfig::parse("build_dir = [").unwrap_err();
        assert!(matches!(err, CoreError::Toml(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = GlobalConfig::from_file(Path::new("/nonexistent/gentainer.toml")).unwrap_err();
        assert!(matches!(err, CoreError::MissingFile(_)));
    }

    #[test]
    fn test_overrides() {
        let config = GlobalConfig::default().apply_overrides(|key| match key {
            "GENTAINER_BUILD_DIR" => Some("/srv/layers".into()),
            "GENTAINER_DIR_BACKING" => Some("zfs".into()),
            _ => None,
        });
        assert_eq!(config.build_dir, PathBuf::from("/srv/layers"));
        assert_eq!(config.dir_backing, "zfs");
        assert_eq!(config.lxc_usernet_file, PathBuf::from("/etc/lxc/lxc-usernet"));
    }
}
