//! Lifecycle states and the published host snapshot.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// One step of the module lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PreConfigure,
    Configure,
    PostConfigure,
    ConfigureSchema,
    Instantiate,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl Phase {
    /// Phases whose failure aborts the whole bootstrap.
    pub const CONFIGURATION: [Phase; 4] = [
        Phase::PreConfigure,
        Phase::Configure,
        Phase::PostConfigure,
        Phase::ConfigureSchema,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreConfigure => "pre_configure",
            Self::Configure => "configure",
            Self::PostConfigure => "post_configure",
            Self::ConfigureSchema => "configure_schema",
            Self::Instantiate => "instantiate",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    /// State a module reaches after completing this phase.
    #[must_use]
    pub const fn completed_state(self) -> ModuleState {
        match self {
            Self::PreConfigure => ModuleState::PreConfigured,
            Self::Configure => ModuleState::Configured,
            Self::PostConfigure => ModuleState::PostConfigured,
            Self::ConfigureSchema => ModuleState::DbSchemaConfigured,
            Self::Instantiate => ModuleState::Instantiated,
            Self::Starting => ModuleState::Starting,
            Self::Started => ModuleState::Started,
            Self::Stopping => ModuleState::Stopping,
            Self::Stopped => ModuleState::Stopped,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-module lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "phase")]
pub enum ModuleState {
    /// Initial state: placed in the resolved order, no hook called yet.
    Resolved,
    PreConfigured,
    Configured,
    PostConfigured,
    DbSchemaConfigured,
    Instantiated,
    Starting,
    Started,
    Stopping,
    Stopped,
    /// A hook failed in the given phase.
    Failed(Phase),
    /// Start was withheld because a dependency did not start.
    Skipped,
    /// Cancelled while a hook for this module was in flight.
    Aborted(Phase),
}

impl ModuleState {
    /// Whether dependents may be started on top of a module in this state.
    #[must_use]
    pub const fn is_startable_dependency(self) -> bool {
        matches!(self, Self::Starting | Self::Started)
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved => f.write_str("resolved"),
            Self::PreConfigured => f.write_str("pre_configured"),
            Self::Configured => f.write_str("configured"),
            Self::PostConfigured => f.write_str("post_configured"),
            Self::DbSchemaConfigured => f.write_str("db_schema_configured"),
            Self::Instantiated => f.write_str("instantiated"),
            Self::Starting => f.write_str("starting"),
            Self::Started => f.write_str("started"),
            Self::Stopping => f.write_str("stopping"),
            Self::Stopped => f.write_str("stopped"),
            Self::Failed(phase) => write!(f, "failed({phase})"),
            Self::Skipped => f.write_str("skipped"),
            Self::Aborted(phase) => write!(f, "aborted({phase})"),
        }
    }
}

/// Host-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Idle,
    Bootstrapping,
    Running,
    Failed,
    Aborted,
    Stopping,
    Stopped,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Bootstrapping => "bootstrapping",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    pub name: String,
    pub version: String,
    pub state: ModuleState,
    pub dependencies: Vec<String>,
}

/// Read-only view of the host, published after every state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostSnapshot {
    pub instance_id: Uuid,
    pub state: HostState,
    /// Modules in resolved order.
    pub modules: Vec<ModuleStatus>,
}

impl HostSnapshot {
    #[must_use]
    pub fn module(&self, name: &str) -> Option<&ModuleStatus> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Running with every module started.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == HostState::Running
            && self.modules.iter().all(|m| m.state == ModuleState::Started)
    }

    /// Modules that are not in the `Started` state.
    pub fn unhealthy_modules(&self) -> impl Iterator<Item = &ModuleStatus> {
        self.modules
            .iter()
            .filter(|m| m.state != ModuleState::Started)
    }
}

/// Cheap, lock-free handle for concurrent readers such as health checks.
#[derive(Clone)]
pub struct HostMonitor {
    inner: Arc<ArcSwap<HostSnapshot>>,
}

impl HostMonitor {
    pub(crate) fn new(initial: HostSnapshot) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<HostSnapshot> {
        self.inner.load_full()
    }

    pub(crate) fn publish(&self, snapshot: HostSnapshot) {
        self.inner.store(Arc::new(snapshot));
    }
}

impl fmt::Debug for HostMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snap = self.inner.load();
        f.debug_struct("HostMonitor")
            .field("state", &snap.state)
            .field("modules", &snap.modules.len())
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn status(name: &str, state: ModuleState) -> ModuleStatus {
        ModuleStatus {
            name: name.to_owned(),
            version: "1.0.0".to_owned(),
            state,
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn health_requires_every_module_started() {
        let mut snap = HostSnapshot {
            instance_id: Uuid::new_v4(),
            state: HostState::Running,
            modules: vec![
                status("a", ModuleState::Started),
                status("b", ModuleState::Failed(Phase::Starting)),
            ],
        };
        assert!(!snap.is_healthy());
        let unhealthy: Vec<_> = snap.unhealthy_modules().map(|m| m.name.as_str()).collect();
        assert_eq!(unhealthy, vec!["b"]);

        snap.modules[1].state = ModuleState::Started;
        assert!(snap.is_healthy());
    }

    #[test]
    fn monitor_publishes_latest() {
        let monitor = HostMonitor::new(HostSnapshot {
            instance_id: Uuid::new_v4(),
            state: HostState::Idle,
            modules: vec![],
        });
        let reader = monitor.clone();
        let mut next = (*reader.snapshot()).clone();
        next.state = HostState::Running;
        monitor.publish(next);
        assert_eq!(reader.snapshot().state, HostState::Running);
    }

    #[test]
    fn states_serialize_with_phase() {
        let json = serde_json::to_value(ModuleState::Failed(Phase::Configure)).unwrap();
        assert_eq!(json, serde_json::json!({"state": "failed", "phase": "configure"}));
        assert_eq!(ModuleState::Failed(Phase::Configure).to_string(), "failed(configure)");
    }
}
