//! Host bootstrap: layered configuration and logging setup for processes that embed
//! the module host.
//!
//! - [`config`]: `HostConfig` loading (defaults, YAML file, `MODHOST__` environment)
//! - [`logging`]: `tracing` subscriber initialization

pub mod config;
pub mod logging;

pub use config::{ENV_PREFIX, HostConfig, LifecycleConfig, LogFormat, LoggingConfig};
pub use logging::init_logging;
