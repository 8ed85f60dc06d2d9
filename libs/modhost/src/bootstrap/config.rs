//! Host configuration.
//!
//! Sources are layered in this order, later ones winning:
//! 1. built-in defaults
//! 2. a YAML file (optional)
//! 3. environment variables prefixed with `MODHOST__`, nested with `__`
//!    (e.g. `MODHOST__LOGGING__LEVEL=debug`)
//!
//! ```yaml
//! discovery:
//!   search_paths: ["./modules.d"]
//!   recursive: true
//! deployment: local
//! lifecycle:
//!   stop_timeout: 10s
//! logging:
//!   level: info
//!   format: text
//! modules:
//!   storage:
//!     config:
//!       root: /var/lib/modhost
//! ```

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConfigProvider;
use crate::discovery::DiscoveryOptions;
use crate::dispatch::DeploymentMode;
use crate::runtime::RuntimeOptions;

pub const ENV_PREFIX: &str = "MODHOST__";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    pub discovery: DiscoveryOptions,
    pub deployment: DeploymentMode,
    pub lifecycle: LifecycleConfig,
    pub logging: LoggingConfig,
    /// Raw per-module entries, keyed by module name.
    pub modules: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LifecycleConfig {
    #[serde(with = "humantime_serde")]
    pub stop_timeout: Option<Duration>,
    /// Debug-log every hook invocation.
    pub lifecycle_logging: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
        }
    }
}

impl HostConfig {
    /// Load from defaults, the optional YAML file and the environment.
    ///
    /// # Errors
    /// Returns an error if `path` does not exist or any source fails to parse.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::figment(path)?
            .extract()
            .context("invalid host configuration")
    }

    /// The layered figment, for callers that want to merge extra providers.
    ///
    /// # Errors
    /// Returns an error if `path` is given but does not exist.
    pub fn figment(path: Option<&Path>) -> anyhow::Result<Figment> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            anyhow::ensure!(
                path.is_file(),
                "config file not found: {}",
                path.display()
            );
            figment = figment.merge(Yaml::file(path));
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Runtime options derived from this configuration.
    #[must_use]
    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            config: Arc::new(self.clone()),
            deployment: self.deployment,
            stop_timeout: self.lifecycle.stop_timeout,
            lifecycle_logging: self.lifecycle.lifecycle_logging,
            ..RuntimeOptions::default()
        }
    }

    /// Module names that have a configuration entry, sorted.
    #[must_use]
    pub fn list_module_names(&self) -> Vec<String> {
        self.modules.keys().cloned().collect()
    }

    /// Effective configuration as JSON, for `--print-config`.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("failed to render configuration")
    }
}

impl ConfigProvider for HostConfig {
    fn get_module_config(&self, module_name: &str) -> Option<&serde_json::Value> {
        self.modules.get(module_name)
    }
}
