mod error;
mod host_runtime;
mod report;
mod runner;
mod state;

pub use error::LifecycleError;
pub use host_runtime::{HostRuntime, RuntimeOptions};
pub use report::{BootstrapOutcome, BootstrapReport, PhaseOutcome, PhaseResult, TeardownReport};
pub use runner::{RunOptions, RunSummary, ShutdownOptions, ShutdownTrigger, run};
pub use state::{HostMonitor, HostSnapshot, HostState, ModuleState, ModuleStatus, Phase};
