//! Per-module configuration access.
//!
//! Every module may own a section in the host configuration:
//!
//! ```yaml
//! modules:
//!   storage:
//!     config:
//!       pool_size: 8
//! ```
//!
//! Two loaders are provided:
//! - [`module_config_or_default`]: falls back to `T::default()` when the section is absent.
//! - [`module_config_required`]: fails when the section is absent.
//!
//! Both fail when a present section does not deserialize into `T`.

use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("module '{module}' has no configuration entry")]
    ModuleNotFound { module: String },
    #[error("configuration entry of module '{module}' must be an object")]
    InvalidModuleStructure { module: String },
    #[error("missing 'config' section in module '{module}'")]
    MissingConfigSection { module: String },
    #[error("invalid config for module '{module}': {source}")]
    InvalidConfig {
        module: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Provider of module-specific configuration entries (raw JSON).
pub trait ConfigProvider: Send + Sync {
    /// Returns the raw entry for the module (`modules.<name>`), if any.
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value>;
}

/// Provider with no entries; every module gets its defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyConfigProvider;

impl ConfigProvider for EmptyConfigProvider {
    fn get_module_config(&self, _module_name: &str) -> Option<&serde_json::Value> {
        None
    }
}

/// Provider backed by an in-memory map of module entries.
#[derive(Debug, Default, Clone)]
pub struct MapConfigProvider {
    modules: BTreeMap<String, serde_json::Value>,
}

impl MapConfigProvider {
    #[must_use]
    pub fn new(modules: BTreeMap<String, serde_json::Value>) -> Self {
        Self { modules }
    }

    /// Add or replace the `config` section of one module.
    #[must_use]
    pub fn with_module_config(mut self, module: &str, config: serde_json::Value) -> Self {
        self.modules
            .insert(module.to_owned(), serde_json::json!({ "config": config }));
        self
    }
}

impl ConfigProvider for MapConfigProvider {
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value> {
        self.modules.get(module_name)
    }
}

/// Locate `modules.<name>.config`, distinguishing the ways it can be missing.
fn config_section<'a>(
    provider: &'a dyn ConfigProvider,
    module_name: &str,
) -> Result<&'a serde_json::Value, ConfigError> {
    let entry = provider
        .get_module_config(module_name)
        .ok_or_else(|| ConfigError::ModuleNotFound {
            module: module_name.to_owned(),
        })?;
    let obj = entry
        .as_object()
        .ok_or_else(|| ConfigError::InvalidModuleStructure {
            module: module_name.to_owned(),
        })?;
    obj.get("config")
        .ok_or_else(|| ConfigError::MissingConfigSection {
            module: module_name.to_owned(),
        })
}

fn parse_section<T: DeserializeOwned>(
    section: &serde_json::Value,
    module_name: &str,
) -> Result<T, ConfigError> {
    T::deserialize(section).map_err(|source| ConfigError::InvalidConfig {
        module: module_name.to_owned(),
        source,
    })
}

/// Lenient loader.
///
/// - module entry missing, not an object, or without `config` → `Ok(T::default())`
/// - `config` present but invalid → `Err(ConfigError::InvalidConfig)`
///
/// # Errors
/// Returns `ConfigError::InvalidConfig` if the section exists but cannot be deserialized.
pub fn module_config_or_default<T: DeserializeOwned + Default>(
    provider: &dyn ConfigProvider,
    module_name: &str,
) -> Result<T, ConfigError> {
    let Ok(section) = config_section(provider, module_name) else {
        return Ok(T::default());
    };
    parse_section(section, module_name)
}

/// Strict loader: the module entry and its `config` section must both exist.
///
/// # Errors
/// Returns `ConfigError` if the entry is missing, malformed, or does not deserialize.
pub fn module_config_required<T: DeserializeOwned>(
    provider: &dyn ConfigProvider,
    module_name: &str,
) -> Result<T, ConfigError> {
    let section = config_section(provider, module_name)?;
    parse_section(section, module_name)
}
