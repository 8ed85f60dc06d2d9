use thiserror::Error;

use super::state::{HostState, Phase};
use crate::discovery::DiscoveryError;
use crate::factory::ModuleInstantiationError;
use crate::graph::ResolveError;

/// Errors surfaced by the host lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Instantiation(#[from] ModuleInstantiationError),

    /// A configuration hook failed; bootstrap stops here.
    #[error("module '{module}' failed in phase {phase}: {source}")]
    PhaseExecution {
        module: String,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },

    /// A start notification failed; only this module and its dependents are affected.
    #[error("module '{module}' failed to start ({phase}): {source}")]
    StartupNotification {
        module: String,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },

    /// A stop hook failed or timed out; teardown continued.
    #[error("module '{module}' failed during {phase}: {source}")]
    Teardown {
        module: String,
        phase: Phase,
        #[source]
        source: anyhow::Error,
    },

    #[error("cancelled during phase {phase}")]
    Cancelled { phase: Phase },

    #[error("unknown module '{module}'")]
    UnknownModule { module: String },

    #[error("module '{module}' has no instance")]
    NotInstantiated { module: String },

    /// A module was asked to start while one of its dependencies is down.
    #[error("cannot start '{module}': dependency '{dependency}' is not started")]
    DependencyNotStarted { module: String, dependency: String },

    #[error("cannot {operation} while host is {state}")]
    InvalidState {
        operation: &'static str,
        state: HostState,
    },
}

impl LifecycleError {
    /// Module the error is attributed to, if any.
    #[must_use]
    pub fn module(&self) -> Option<&str> {
        match self {
            Self::Instantiation(e) => Some(&e.module),
            Self::PhaseExecution { module, .. }
            | Self::StartupNotification { module, .. }
            | Self::Teardown { module, .. }
            | Self::UnknownModule { module }
            | Self::NotInstantiated { module }
            | Self::DependencyNotStarted { module, .. } => Some(module),
            _ => None,
        }
    }
}
