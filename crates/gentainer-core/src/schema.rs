//! Container configuration schema.
//!
//! The set of keys a container file may contain is closed: it is the union
//! of the parameters declared by the enabled [`Module`]s, assembled once at
//! startup into a [`ConfigSchema`] value that is passed to every loader.
//! Two modules declaring the same parameter is a startup error.

use crate::error::{CoreError, Result};
use crate::nets::check_interface_name;
use std::collections::BTreeMap;
use std::fmt;
use toml::{Table, Value};

/// Per-parameter validator. Receives a value already known to have the
/// declared [`ParamType`]; returns a human-readable reason on rejection.
pub type Validator = fn(&Value) -> std::result::Result<(), String>;

/// TOML shape a parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// A string.
    String,
    /// An array.
    List,
    /// A table.
    Table,
}

impl ParamType {
    fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ParamType::String, Value::String(_))
                | (ParamType::List, Value::Array(_))
                | (ParamType::Table, Value::Table(_))
        )
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::String => write!(f, "string"),
            ParamType::List => write!(f, "list"),
            ParamType::Table => write!(f, "table"),
        }
    }
}

/// One recognized container parameter.
#[derive(Clone, Copy)]
pub struct Parameter {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
    /// Whether the global `[defaults]` table may supply this parameter.
    pub inheritable: bool,
    pub validate: Option<Validator>,
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("required", &self.required)
            .field("inheritable", &self.inheritable)
            .field("validated", &self.validate.is_some())
            .finish()
    }
}

/// A named group of parameters contributed by one reconciler.
#[derive(Debug, Clone, Copy)]
pub struct Module {
    pub name: &'static str,
    pub parameters: &'static [Parameter],
}

/// Packages to install into the layer.
pub const BUILDER: Module = Module {
    name: "builder",
    parameters: &[Parameter {
        name: "packages",
        ty: ParamType::List,
        required: true,
        inheritable: true,
        validate: Some(validate_packages),
    }],
};

/// Base image to snapshot.
pub const LAYERS: Module = Module {
    name: "layers",
    parameters: &[Parameter {
        name: "base_image",
        ty: ParamType::String,
        required: false,
        inheritable: false,
        validate: Some(validate_base_image),
    }],
};

/// Container user and its usernet allocation.
pub const USERS: Module = Module {
    name: "users",
    parameters: &[
        Parameter {
            name: "username",
            ty: ParamType::String,
            required: false,
            inheritable: true,
            validate: Some(validate_username),
        },
        Parameter {
            name: "usernet_allocation",
            ty: ParamType::Table,
            required: false,
            inheritable: true,
            validate: Some(validate_usernet_allocation),
        },
    ],
};

/// Host interfaces the container requires.
pub const NETS: Module = Module {
    name: "nets",
    parameters: &[Parameter {
        name: "networks",
        ty: ParamType::List,
        required: false,
        inheritable: true,
        validate: Some(validate_networks),
    }],
};

/// Every module gentainer knows about.
pub const MODULES: &[Module] = &[BUILDER, LAYERS, USERS, NETS];

/// Default module list when the global config names none.
pub fn default_module_names() -> Vec<String> {
    MODULES.iter().map(|m| m.name.to_string()).collect()
}

fn validate_packages(value: &Value) -> std::result::Result<(), String> {
    let packages = value.as_array().map(Vec::as_slice).unwrap_or_default();
    if packages.is_empty() {
        return Err("packages must not be empty".into());
    }
    for package in packages {
        match package.as_str() {
            Some(atom) if !atom.is_empty() && !atom.chars().any(char::is_whitespace) => {}
            Some(atom) => return Err(format!("invalid package atom: {:?}", atom)),
            None => return Err(format!("package must be a string, got {}", package.type_str())),
        }
    }
    Ok(())
}

fn validate_base_image(value: &Value) -> std::result::Result<(), String> {
    match value.as_str() {
        Some(name) if !name.is_empty() && !name.contains('/') => Ok(()),
        Some(name) => Err(format!("invalid base image name: {:?}", name)),
        None => Err("base_image must be a string".into()),
    }
}

fn validate_username(value: &Value) -> std::result::Result<(), String> {
    let name = value.as_str().unwrap_or_default();
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if valid_start && valid_rest && name.len() <= 32 {
        Ok(())
    } else {
        Err(format!("invalid username: {:?}", name))
    }
}

fn validate_usernet_allocation(value: &Value) -> std::result::Result<(), String> {
    let Some(table) = value.as_table() else {
        return Err("usernet_allocation must be a table".into());
    };
    for (interface, count) in table {
        check_interface_name(interface)?;
        match count.as_integer() {
            Some(n) if (0..=i64::from(u32::MAX)).contains(&n) => {}
            Some(n) => return Err(format!("usernet count for {} out of range: {}", interface, n)),
            None => {
                return Err(format!(
                    "usernet count for {} must be an integer, got {}",
                    interface,
                    count.type_str()
                ))
            }
        }
    }
    Ok(())
}

fn validate_networks(value: &Value) -> std::result::Result<(), String> {
    for network in value.as_array().map(Vec::as_slice).unwrap_or_default() {
        match network.as_str() {
            Some(name) => check_interface_name(name)?,
            None => return Err(format!("network must be a string, got {}", network.type_str())),
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Registered {
    module: &'static str,
    parameter: Parameter,
}

/// The closed set of recognized container parameters.
#[derive(Debug, Clone, Default)]
pub struct ConfigSchema {
    parameters: BTreeMap<&'static str, Registered>,
}

impl ConfigSchema {
    /// Start an empty schema.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Schema with every known module registered.
    pub fn standard() -> Result<Self> {
        MODULES
            .iter()
            .try_fold(Self::builder(), |builder, module| builder.module(*module))
            .map(SchemaBuilder::build)
    }

    /// Schema from module names as written in the global config.
    ///
    /// `layers` and the dotted `layers.Layers` form are both accepted.
    pub fn from_module_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut builder = Self::builder();
        for name in names {
            let name = name.as_ref();
            let short = name.split('.').next().unwrap_or(name);
            let module = MODULES
                .iter()
                .find(|m| m.name == short)
                .ok_or_else(|| CoreError::validation("modules", format!("unknown module: {}", name)))?;
            builder = builder.module(*module)?;
        }
        Ok(builder.build())
    }

    /// Look up a registered parameter.
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name).map(|r| &r.parameter)
    }

    /// Module that registered `name`.
    pub fn module_of(&self, name: &str) -> Option<&'static str> {
        self.parameters.get(name).map(|r| r.module)
    }

    /// Every registered parameter, sorted by name.
    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.values().map(|r| &r.parameter)
    }

    /// Reject unknown keys, ill-typed values and values their validator refuses.
    pub fn check_table(&self, source_name: &str, table: &Table) -> Result<()> {
        for (key, value) in table {
            let param = self
                .parameter(key)
                .ok_or_else(|| CoreError::validation(source_name, format!("unknown parameter: {}", key)))?;
            if !param.ty.matches(value) {
                return Err(CoreError::validation(
                    source_name,
                    format!(
                        "invalid type for {}: expected {}, got {}",
                        key,
                        param.ty,
                        value.type_str()
                    ),
                ));
            }
            if let Some(validate) = param.validate {
                tracing::trace!(source = %source_name, parameter = %key, "Validating parameter");
                validate(value).map_err(|reason| CoreError::validation(source_name, reason))?;
            }
        }
        Ok(())
    }

    /// Like [`check_table`](Self::check_table), and additionally reject
    /// parameters that may not be inherited.
    pub fn check_defaults(&self, table: &Table) -> Result<()> {
        self.check_table("[defaults]", table)?;
        for key in table.keys() {
            if self.parameter(key).is_some_and(|p| !p.inheritable) {
                return Err(CoreError::validation(
                    "[defaults]",
                    format!("parameter cannot be set as a default: {}", key),
                ));
            }
        }
        Ok(())
    }

    /// Fail on the first required parameter `lookup` cannot resolve.
    pub fn check_required<'a>(
        &self,
        source_name: &str,
        lookup: impl Fn(&str) -> Option<&'a Value>,
    ) -> Result<()> {
        for param in self.parameters().filter(|p| p.required) {
            if lookup(param.name).is_none() {
                return Err(CoreError::validation(
                    source_name,
                    format!("missing required parameter: {}", param.name),
                ));
            }
        }
        Ok(())
    }
}

/// Assembles a [`ConfigSchema`] one module at a time.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    parameters: BTreeMap<&'static str, Registered>,
}

impl SchemaBuilder {
    /// Register every parameter of `module`.
    pub fn module(mut self, module: Module) -> Result<Self> {
        for parameter in module.parameters {
            if let Some(existing) = self.parameters.get(parameter.name) {
                tracing::error!(
                    module = module.name,
                    registered_by = existing.module,
                    parameter = parameter.name,
                    "Duplicate parameter registration"
                );
                return Err(CoreError::DuplicateParameter {
                    module: module.name.to_string(),
                    parameter: parameter.name.to_string(),
                });
            }
            tracing::debug!(module = module.name, parameter = parameter.name, "Registered parameter");
            self.parameters.insert(
                parameter.name,
                Registered {
                    module: module.name,
                    parameter: *parameter,
                },
            );
        }
        Ok(self)
    }

    /// Finish the schema.
    pub fn build(self) -> ConfigSchema {
        ConfigSchema {
            parameters: self.parameters,
        }
    }
}
