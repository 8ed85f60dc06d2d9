//! Pluggable module host.
//!
//! Finds modules (linked registrations and on-disk manifests), orders them by their
//! declared dependencies, wires them through a type-keyed service hub and drives
//! them through a phased lifecycle:
//!
//! `pre_configure` → `configure` → `post_configure` → `configure_schema`
//! → `instantiate` → `on_starting` → `on_started` … `on_stopping` → `on_stopped`
//!
//! ```ignore
//! use modhost::{ModuleDescriptor, ModuleRegistration, Module, HostRuntime, RuntimeOptions};
//!
//! struct Audit;
//! impl Module for Audit {}
//!
//! modhost::inventory::submit! {
//!     modhost::Registrator(|sink| sink.register(
//!         ModuleRegistration::new(ModuleDescriptor::new("audit"), |_| Ok(std::sync::Arc::new(Audit)))
//!     ))
//! }
//! ```
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub use async_trait::async_trait;

// Re-exported for `inventory::submit!` in module crates
pub use inventory;

pub mod config;
pub mod context;
pub mod contracts;
pub mod descriptor;
pub mod discovery;
pub mod dispatch;
pub mod factory;
pub mod graph;
pub mod runtime;
pub mod schema;
pub mod services;
pub mod version;

#[cfg(feature = "bootstrap")]
pub mod bootstrap;

pub use config::{
    ConfigError, ConfigProvider, EmptyConfigProvider, MapConfigProvider,
    module_config_or_default, module_config_required,
};
pub use context::{ModuleContextBuilder, ModuleCtx};
pub use contracts::{Module, ModuleInstantiator, ModuleSetup, NoSetup};
pub use descriptor::{DependencySpec, ModuleDescriptor, ModuleSource};
pub use discovery::{
    Discovered, DiscoveryError, DiscoveryOptions, DiscoveryWarning, ModuleDiscovery,
    ModuleRegistration, RegistrationSink, Registrator, linked_registrations,
};
pub use dispatch::{DeploymentMode, DispatchError, ServiceDispatch};
pub use factory::{ModuleFactory, ModuleInstantiationError};
pub use graph::{DependencyGraph, ResolveError, ResolveWarning, ResolvedOrder};
pub use runtime::{
    BootstrapOutcome, BootstrapReport, HostMonitor, HostRuntime, HostSnapshot, HostState,
    LifecycleError, ModuleState, ModuleStatus, Phase, PhaseOutcome, PhaseResult, RunOptions,
    RunSummary, RuntimeOptions, ShutdownOptions, ShutdownTrigger, TeardownReport, run,
};
pub use schema::{SchemaEntry, SchemaError, SchemaRegistry};
pub use services::{ResolutionScope, ServiceHub, ServiceHubError, TypeKey};
pub use version::{Version, VersionError, VersionReq};
