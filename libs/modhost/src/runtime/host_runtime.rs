//! Host Runtime - drives the module lifecycle.
//!
//! Lifecycle phases:
//!   `pre_configure` → `configure` → `post_configure` → `configure_schema`
//!   → `instantiate` → `starting` → `started`
//!   ... host running ...
//!   `stopping` → `stopped` (reverse order)
//!
//! Every phase visits all modules in resolved order before the next phase begins.
//! While the host is running, single modules can be stopped, started and restarted;
//! stopping a module always stops its dependents first.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::LifecycleError;
use super::report::{BootstrapOutcome, BootstrapReport, PhaseOutcome, TeardownReport};
use super::state::{HostMonitor, HostSnapshot, HostState, ModuleState, ModuleStatus, Phase};
use crate::config::{ConfigProvider, EmptyConfigProvider};
use crate::context::{ModuleContextBuilder, ModuleCtx};
use crate::contracts::{Module, ModuleSetup};
use crate::discovery::{Discovered, ModuleRegistration};
use crate::dispatch::{DeploymentMode, ServiceDispatch};
use crate::factory::ModuleFactory;
use crate::graph::{DependencyGraph, ResolvedOrder};
use crate::schema::SchemaRegistry;
use crate::services::ServiceHub;

/// Host-wide settings fixed at construction.
#[derive(Clone)]
pub struct RuntimeOptions {
    pub config: Arc<dyn ConfigProvider>,
    pub deployment: DeploymentMode,
    /// Upper bound for each `on_stopping`/`on_stopped` call.
    pub stop_timeout: Option<Duration>,
    /// Emit a debug event for every hook invocation.
    pub lifecycle_logging: bool,
    pub instance_id: Uuid,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            config: Arc::new(EmptyConfigProvider),
            deployment: DeploymentMode::default(),
            stop_timeout: None,
            lifecycle_logging: false,
            instance_id: Uuid::new_v4(),
        }
    }
}

struct ModuleSlot {
    registration: ModuleRegistration,
    state: ModuleState,
    instance: Option<Arc<dyn Module>>,
    /// `on_starting` was invoked, so the module takes part in teardown.
    start_attempted: bool,
    /// Parent of the tokens handed to the runtime hooks; cancelled when the module stops.
    scope: CancellationToken,
}

impl ModuleSlot {
    fn new(registration: ModuleRegistration) -> Self {
        Self {
            registration,
            state: ModuleState::Resolved,
            instance: None,
            start_attempted: false,
            scope: CancellationToken::new(),
        }
    }

    fn reset(&mut self) {
        self.state = ModuleState::Resolved;
        self.instance = None;
        self.start_attempted = false;
        self.scope = CancellationToken::new();
    }

    fn takes_part_in_teardown(&self) -> bool {
        self.start_attempted && !matches!(self.state, ModuleState::Aborted(_))
    }
}

/// Why bootstrap stopped early.
enum Halt {
    Failed,
    Aborted,
}

enum HookRun {
    Completed(anyhow::Result<()>),
    TimedOut(Duration),
    Cancelled,
}

impl HookRun {
    /// `None` when cancellation won the race.
    fn into_result(self) -> Option<anyhow::Result<()>> {
        match self {
            Self::Completed(result) => Some(result),
            Self::TimedOut(limit) => Some(Err(anyhow::anyhow!(
                "timed out after {}ms",
                limit.as_millis()
            ))),
            Self::Cancelled => None,
        }
    }
}

/// Await `fut`, racing it against `cancel` and an optional time limit.
async fn run_hook<F>(cancel: &CancellationToken, limit: Option<Duration>, fut: F) -> HookRun
where
    F: Future<Output = anyhow::Result<()>>,
{
    let bounded = async {
        match limit {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => HookRun::Completed(result),
                Err(_) => HookRun::TimedOut(limit),
            },
            None => HookRun::Completed(fut.await),
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => HookRun::Cancelled,
        run = bounded => run,
    }
}

async fn invoke_setup(
    setup: &dyn ModuleSetup,
    phase: Phase,
    ctx: &ModuleCtx,
    schema: &SchemaRegistry,
) -> anyhow::Result<()> {
    match phase {
        Phase::PreConfigure => setup.pre_configure(ctx).await,
        Phase::Configure => setup.configure(ctx).await,
        Phase::PostConfigure => setup.post_configure(ctx).await,
        Phase::ConfigureSchema => setup.configure_schema(ctx, schema).await,
        other => anyhow::bail!("{other} is not a configuration phase"),
    }
}

async fn invoke_module(module: &dyn Module, phase: Phase, ctx: &ModuleCtx) -> anyhow::Result<()> {
    match phase {
        Phase::Starting => module.on_starting(ctx).await,
        Phase::Started => module.on_started(ctx).await,
        Phase::Stopping => module.on_stopping(ctx).await,
        Phase::Stopped => module.on_stopped(ctx).await,
        other => anyhow::bail!("{other} is not a runtime phase"),
    }
}

/// Owns every module registration and instance of one host and moves them through
/// the lifecycle.
pub struct HostRuntime {
    /// In resolved order.
    slots: Vec<ModuleSlot>,
    graph: DependencyGraph,
    order: ResolvedOrder,
    services: Arc<ServiceHub>,
    schema: Arc<SchemaRegistry>,
    dispatch: Arc<ServiceDispatch>,
    ctx_builder: ModuleContextBuilder,
    factory: ModuleFactory,
    run_token: CancellationToken,
    stop_timeout: Option<Duration>,
    lifecycle_logging: bool,
    instance_id: Uuid,
    state: HostState,
    monitor: HostMonitor,
}

impl HostRuntime {
    /// Resolve `modules` into a host. No module code runs here.
    ///
    /// # Errors
    /// Returns `LifecycleError::Resolve` for duplicate names, missing dependencies,
    /// version mismatches and cycles.
    pub fn new(
        modules: Vec<ModuleRegistration>,
        options: RuntimeOptions,
    ) -> Result<Self, LifecycleError> {
        let descriptors: Vec<_> = modules.iter().map(|m| m.descriptor().clone()).collect();
        let graph = DependencyGraph::build(&descriptors)?;
        for warning in graph.warnings() {
            tracing::warn!(%warning, "Dependency resolution warning");
        }
        let order = graph.resolve()?;
        tracing::info!(%order, "Resolved module order");

        let mut by_name: HashMap<String, ModuleRegistration> = modules
            .into_iter()
            .map(|m| (m.name().to_owned(), m))
            .collect();
        let slots = order
            .iter()
            .filter_map(|name| by_name.remove(name))
            .map(ModuleSlot::new)
            .collect();

        let services = Arc::new(ServiceHub::new());
        let dispatch = Arc::new(ServiceDispatch::new(options.deployment, services.clone()));
        let run_token = CancellationToken::new();
        let ctx_builder = ModuleContextBuilder::new(
            options.instance_id,
            options.config,
            services.clone(),
            dispatch.clone(),
            run_token.clone(),
        );

        let runtime = Self {
            slots,
            graph,
            order,
            services,
            schema: Arc::new(SchemaRegistry::new()),
            dispatch,
            ctx_builder,
            factory: ModuleFactory::new(),
            run_token,
            stop_timeout: options.stop_timeout,
            lifecycle_logging: options.lifecycle_logging,
            instance_id: options.instance_id,
            state: HostState::Idle,
            monitor: HostMonitor::new(HostSnapshot {
                instance_id: options.instance_id,
                state: HostState::Idle,
                modules: Vec::new(),
            }),
        };
        runtime.publish();
        Ok(runtime)
    }

    /// Build a host from the result of a discovery pass.
    ///
    /// # Errors
    /// See [`HostRuntime::new`].
    pub fn from_discovered(
        discovered: Discovered,
        options: RuntimeOptions,
    ) -> Result<Self, LifecycleError> {
        for warning in &discovered.warnings {
            tracing::warn!(%warning, "Discovery warning");
        }
        Self::new(discovered.modules, options)
    }

    #[must_use]
    pub fn state(&self) -> HostState {
        self.state
    }

    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    #[must_use]
    pub fn order(&self) -> &ResolvedOrder {
        &self.order
    }

    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    #[must_use]
    pub fn services(&self) -> &Arc<ServiceHub> {
        &self.services
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    #[must_use]
    pub fn dispatch(&self) -> &Arc<ServiceDispatch> {
        &self.dispatch
    }

    #[must_use]
    pub fn module_state(&self, module: &str) -> Option<ModuleState> {
        self.slot_index(module).map(|idx| self.slots[idx].state)
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<HostSnapshot> {
        self.monitor.snapshot()
    }

    /// Handle for reading snapshots from other tasks.
    #[must_use]
    pub fn snapshot_reader(&self) -> HostMonitor {
        self.monitor.clone()
    }

    /// Run configuration, instantiation and start for every module.
    ///
    /// Configuration and instantiation failures stop the bootstrap and are reported
    /// as `Failed`; start failures only affect the failing module and its dependents.
    /// The returned report records every hook that ran.
    ///
    /// # Errors
    /// Returns `LifecycleError::InvalidState` unless the host is idle or stopped.
    pub async fn bootstrap(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<BootstrapReport, LifecycleError> {
        match self.state {
            HostState::Idle => {}
            HostState::Stopped => self.reset(),
            state => {
                return Err(LifecycleError::InvalidState {
                    operation: "bootstrap",
                    state,
                });
            }
        }

        self.run_token = cancel.child_token();
        self.ctx_builder.set_root_token(self.run_token.clone());
        self.set_host_state(HostState::Bootstrapping);
        tracing::info!(
            instance_id = %self.instance_id,
            modules = self.slots.len(),
            "Bootstrapping host"
        );

        let mut report = BootstrapReport::new(self.instance_id, self.order.as_slice().to_vec());
        report.outcome = match self.run_bootstrap_phases(cancel, &mut report).await {
            Ok(()) if self.slots.iter().all(|s| s.state == ModuleState::Started) => {
                BootstrapOutcome::Started
            }
            Ok(()) => BootstrapOutcome::PartiallyStarted,
            Err(Halt::Failed) => BootstrapOutcome::Failed,
            Err(Halt::Aborted) => BootstrapOutcome::Aborted,
        };

        let host_state = match report.outcome {
            BootstrapOutcome::Started | BootstrapOutcome::PartiallyStarted => HostState::Running,
            BootstrapOutcome::Failed => HostState::Failed,
            BootstrapOutcome::Aborted => HostState::Aborted,
        };
        self.set_host_state(host_state);
        tracing::info!(outcome = %report.outcome, "Bootstrap finished");
        Ok(report)
    }

    async fn run_bootstrap_phases(
        &mut self,
        cancel: &CancellationToken,
        report: &mut BootstrapReport,
    ) -> Result<(), Halt> {
        for phase in Phase::CONFIGURATION {
            self.run_configuration_phase(phase, cancel, report).await?;
        }
        self.run_instantiate_phase(cancel, report)?;
        self.dispatch.mark_ready();
        self.run_starting_phase(cancel, report).await?;
        self.run_started_phase(cancel, report).await
    }

    /// Configuration phases: the first failure ends the bootstrap.
    async fn run_configuration_phase(
        &mut self,
        phase: Phase,
        cancel: &CancellationToken,
        report: &mut BootstrapReport,
    ) -> Result<(), Halt> {
        tracing::info!("Phase: {phase}");
        let schema = self.schema.clone();

        for idx in 0..self.slots.len() {
            if cancel.is_cancelled() {
                return Err(self.abort(phase, None, report));
            }
            let name = self.slots[idx].registration.name().to_owned();
            let setup = self.slots[idx].registration.setup().clone();
            let ctx = self.ctx_builder.for_module(&name);
            self.trace_hook(&name, phase);

            let started = Instant::now();
            let run = run_hook(cancel, None, invoke_setup(&*setup, phase, &ctx, &schema)).await;
            let elapsed = started.elapsed();

            match run.into_result() {
                Some(Ok(())) => {
                    self.slots[idx].state = phase.completed_state();
                    report.push(&name, phase, PhaseOutcome::Succeeded, elapsed);
                }
                Some(Err(source)) => {
                    tracing::error!(module = %name, %phase, error = %source, "Configuration failed");
                    self.slots[idx].state = ModuleState::Failed(phase);
                    let err = LifecycleError::PhaseExecution {
                        module: name.clone(),
                        phase,
                        source,
                    };
                    report.push(&name, phase, PhaseOutcome::Failed(err), elapsed);
                    self.publish();
                    return Err(Halt::Failed);
                }
                None => return Err(self.abort(phase, Some((idx, elapsed)), report)),
            }
        }

        self.publish();
        Ok(())
    }

    fn run_instantiate_phase(
        &mut self,
        cancel: &CancellationToken,
        report: &mut BootstrapReport,
    ) -> Result<(), Halt> {
        tracing::info!("Phase: instantiate");

        for idx in 0..self.slots.len() {
            if cancel.is_cancelled() {
                return Err(self.abort(Phase::Instantiate, None, report));
            }
            let name = self.slots[idx].registration.name().to_owned();
            self.trace_hook(&name, Phase::Instantiate);

            let started = Instant::now();
            let slot = &mut self.slots[idx];
            match self.factory.instantiate(&slot.registration, &self.services) {
                Ok(instance) => {
                    slot.instance = Some(instance);
                    slot.state = ModuleState::Instantiated;
                    report.push(
                        &name,
                        Phase::Instantiate,
                        PhaseOutcome::Succeeded,
                        started.elapsed(),
                    );
                }
                Err(err) => {
                    tracing::error!(module = %name, error = %err, "Instantiation failed");
                    slot.state = ModuleState::Failed(Phase::Instantiate);
                    report.push(
                        &name,
                        Phase::Instantiate,
                        PhaseOutcome::Failed(err.into()),
                        started.elapsed(),
                    );
                    self.publish();
                    return Err(Halt::Failed);
                }
            }
        }

        self.publish();
        Ok(())
    }

    /// `on_starting` for every module whose dependencies are starting.
    async fn run_starting_phase(
        &mut self,
        cancel: &CancellationToken,
        report: &mut BootstrapReport,
    ) -> Result<(), Halt> {
        tracing::info!("Phase: starting");

        for idx in 0..self.slots.len() {
            if cancel.is_cancelled() {
                return Err(self.abort(Phase::Starting, None, report));
            }
            if !self.start_notification(idx, Phase::Starting, cancel, report).await {
                return Err(self.abort(Phase::Starting, None, report));
            }
        }
        Ok(())
    }

    /// `on_started` for every module that completed `on_starting`.
    async fn run_started_phase(
        &mut self,
        cancel: &CancellationToken,
        report: &mut BootstrapReport,
    ) -> Result<(), Halt> {
        tracing::info!("Phase: started");

        for idx in 0..self.slots.len() {
            if self.slots[idx].state != ModuleState::Starting {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(self.abort(Phase::Started, None, report));
            }
            if !self.start_notification(idx, Phase::Started, cancel, report).await {
                return Err(self.abort(Phase::Started, None, report));
            }
        }
        Ok(())
    }

    /// Deliver one start notification. Returns `false` if cancellation interrupted it.
    async fn start_notification(
        &mut self,
        idx: usize,
        phase: Phase,
        cancel: &CancellationToken,
        report: &mut BootstrapReport,
    ) -> bool {
        let name = self.slots[idx].registration.name().to_owned();

        if let Some(dependency) = self.blocking_dependency(&name) {
            tracing::warn!(module = %name, %dependency, "Skipping start: dependency did not start");
            self.slots[idx].state = ModuleState::Skipped;
            report.push(
                &name,
                phase,
                PhaseOutcome::Skipped(format!("dependency '{dependency}' did not start")),
                Duration::ZERO,
            );
            self.publish();
            return true;
        }

        let Some(instance) = self.slots[idx].instance.clone() else {
            return true;
        };
        if phase == Phase::Starting {
            self.slots[idx].start_attempted = true;
            self.slots[idx].scope = self.ctx_builder.module_scope();
        }
        let ctx = self.ctx_builder.for_module_scoped(&name, &self.slots[idx].scope);
        self.trace_hook(&name, phase);

        let started = Instant::now();
        let run = run_hook(cancel, None, invoke_module(&*instance, phase, &ctx)).await;
        let elapsed = started.elapsed();

        match run.into_result() {
            Some(Ok(())) => {
                if phase == Phase::Started {
                    tracing::info!(module = %name, "Started module");
                }
                self.slots[idx].state = phase.completed_state();
                report.push(&name, phase, PhaseOutcome::Succeeded, elapsed);
            }
            Some(Err(source)) => {
                tracing::warn!(module = %name, %phase, error = %source, "Failed to start module");
                self.slots[idx].state = ModuleState::Failed(phase);
                let err = LifecycleError::StartupNotification {
                    module: name.clone(),
                    phase,
                    source,
                };
                report.push(&name, phase, PhaseOutcome::Failed(err), elapsed);
            }
            None => {
                self.mark_aborted(idx, phase, elapsed, report);
                return false;
            }
        }
        self.publish();
        true
    }

    /// First dependency of `module` that has not come up.
    fn blocking_dependency(&self, module: &str) -> Option<String> {
        self.graph
            .dependencies_of(module)
            .iter()
            .find(|dep| {
                self.slot_index(dep)
                    .is_some_and(|idx| !self.slots[idx].state.is_startable_dependency())
            })
            .cloned()
    }

    /// Stop every module that took part in start, in reverse resolved order.
    ///
    /// Every `on_stopping` runs before any `on_stopped`. Failures and timeouts are
    /// logged and recorded; the pass always continues. If `cancel` fires, the hook
    /// in flight is abandoned and the remaining hooks are skipped. Instances are
    /// released before this returns.
    ///
    /// # Errors
    /// Returns `LifecycleError::InvalidState` unless the host is running, failed or
    /// aborted.
    pub async fn shutdown(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<TeardownReport, LifecycleError> {
        let aborted = match self.state {
            HostState::Running | HostState::Failed => false,
            HostState::Aborted => true,
            state => {
                return Err(LifecycleError::InvalidState {
                    operation: "shutdown",
                    state,
                });
            }
        };

        self.set_host_state(HostState::Stopping);
        self.run_token.cancel();

        let targets: Vec<usize> = (0..self.slots.len())
            .rev()
            .filter(|&idx| {
                let slot = &self.slots[idx];
                if aborted {
                    slot.state == ModuleState::Started
                } else {
                    slot.takes_part_in_teardown()
                }
            })
            .collect();

        let mut report = TeardownReport::default();
        for phase in [Phase::Stopping, Phase::Stopped] {
            tracing::info!("Phase: {phase}");
            for &idx in &targets {
                self.stop_one_module(idx, phase, cancel, &mut report).await;
            }
        }

        for slot in &mut self.slots {
            slot.instance = None;
        }
        self.dispatch.mark_not_ready();
        self.set_host_state(HostState::Stopped);
        tracing::info!(
            failures = report.failures().count(),
            "Host stopped"
        );
        Ok(report)
    }

    /// Run one stop hook, logging errors but continuing execution.
    async fn stop_one_module(
        &mut self,
        idx: usize,
        phase: Phase,
        cancel: &CancellationToken,
        report: &mut TeardownReport,
    ) {
        let name = self.slots[idx].registration.name().to_owned();
        let Some(instance) = self.slots[idx].instance.clone() else {
            return;
        };
        if cancel.is_cancelled() {
            report.push(
                &name,
                phase,
                PhaseOutcome::Skipped("teardown cancelled".to_owned()),
                Duration::ZERO,
            );
            return;
        }

        let ctx = self.ctx_builder.for_module_scoped(&name, &self.slots[idx].scope);
        self.trace_hook(&name, phase);
        let started = Instant::now();
        let run = run_hook(cancel, self.stop_timeout, invoke_module(&*instance, phase, &ctx)).await;
        let elapsed = started.elapsed();

        let slot = &mut self.slots[idx];
        match run.into_result() {
            Some(Ok(())) => {
                if slot.state != ModuleState::Failed(Phase::Stopping) {
                    slot.state = phase.completed_state();
                }
                if phase == Phase::Stopped {
                    tracing::info!(module = %name, "Stopped module");
                }
                report.push(&name, phase, PhaseOutcome::Succeeded, elapsed);
            }
            Some(Err(source)) => {
                tracing::warn!(module = %name, %phase, error = %source, "Failed to stop module");
                slot.state = ModuleState::Failed(phase);
                let err = LifecycleError::Teardown {
                    module: name.clone(),
                    phase,
                    source,
                };
                report.push(&name, phase, PhaseOutcome::Failed(err), elapsed);
            }
            None => {
                tracing::warn!(module = %name, %phase, "Teardown cancelled");
                report.push(&name, phase, PhaseOutcome::Aborted, elapsed);
            }
        }
        self.publish();
    }

    /// Start one module of a running host, typically after [`HostRuntime::stop_module`].
    ///
    /// Runs `on_starting` then `on_started`. A module that is already started is left
    /// alone.
    ///
    /// # Errors
    /// `InvalidState` unless the host is running, `UnknownModule`,
    /// `DependencyNotStarted` while a dependency is down, `StartupNotification` when a
    /// hook fails and `Cancelled` when `cancel` interrupts a hook.
    pub async fn start_module(
        &mut self,
        module: &str,
        cancel: &CancellationToken,
    ) -> Result<(), LifecycleError> {
        self.ensure_running("start module")?;
        let idx = self.require_slot(module)?;
        if self.slots[idx].state == ModuleState::Started {
            return Ok(());
        }
        if let Some(dependency) = self.stopped_dependency(module) {
            return Err(LifecycleError::DependencyNotStarted {
                module: module.to_owned(),
                dependency,
            });
        }
        let Some(instance) = self.slots[idx].instance.clone() else {
            return Err(LifecycleError::NotInstantiated {
                module: module.to_owned(),
            });
        };

        let scope = self.ctx_builder.module_scope();
        self.slots[idx].scope = scope.clone();
        self.slots[idx].start_attempted = true;

        for phase in [Phase::Starting, Phase::Started] {
            let ctx = self.ctx_builder.for_module_scoped(module, &scope);
            self.trace_hook(module, phase);
            let run = run_hook(cancel, None, invoke_module(&*instance, phase, &ctx)).await;

            let slot = &mut self.slots[idx];
            match run.into_result() {
                Some(Ok(())) => slot.state = phase.completed_state(),
                Some(Err(source)) => {
                    tracing::warn!(module, %phase, error = %source, "Failed to start module");
                    slot.state = ModuleState::Failed(phase);
                    self.publish();
                    return Err(LifecycleError::StartupNotification {
                        module: module.to_owned(),
                        phase,
                        source,
                    });
                }
                None => {
                    tracing::warn!(module, %phase, "Module start cancelled");
                    slot.state = ModuleState::Aborted(phase);
                    self.publish();
                    return Err(LifecycleError::Cancelled { phase });
                }
            }
            self.publish();
        }

        tracing::info!(module, "Started module");
        Ok(())
    }

    /// Stop one module of a running host together with everything that depends on it.
    ///
    /// Dependents go first: `on_stopping` for the whole set in reverse resolved order,
    /// then `on_stopped`. Each stopped module's context token is cancelled before its
    /// hooks run. Modules that are not running are left out, so a second call is a
    /// no-op. Instances are kept for [`HostRuntime::start_module`] and the host stays
    /// running; a later [`HostRuntime::shutdown`] does not stop these modules again.
    ///
    /// # Errors
    /// `InvalidState` unless the host is running, `UnknownModule` for a name the
    /// host does not know.
    pub async fn stop_module(
        &mut self,
        module: &str,
        cancel: &CancellationToken,
    ) -> Result<TeardownReport, LifecycleError> {
        self.ensure_running("stop module")?;
        self.require_slot(module)?;

        let mut affected = self.graph.transitive_dependents(module);
        affected.insert(module.to_owned());
        let targets: Vec<usize> = (0..self.slots.len())
            .rev()
            .filter(|&idx| {
                let slot = &self.slots[idx];
                affected.contains(slot.registration.name()) && slot.takes_part_in_teardown()
            })
            .collect();

        for &idx in &targets {
            self.slots[idx].scope.cancel();
        }
        let mut report = TeardownReport::default();
        for phase in [Phase::Stopping, Phase::Stopped] {
            for &idx in &targets {
                self.stop_one_module(idx, phase, cancel, &mut report).await;
            }
        }
        // an interrupted stop leaves the rest to the final shutdown
        if !cancel.is_cancelled() {
            for &idx in &targets {
                self.slots[idx].start_attempted = false;
            }
        }

        tracing::info!(
            module,
            stopped = targets.len(),
            failures = report.failures().count(),
            "Stopped module and its dependents"
        );
        Ok(report)
    }

    /// Stop `module` and its dependents, then start it again together with every
    /// dependent that was started before, in resolved order.
    ///
    /// Returns the report of the stop pass. Nothing is started again if `cancel`
    /// fired during the stop.
    ///
    /// # Errors
    /// Any error of [`HostRuntime::stop_module`], or the first error of
    /// [`HostRuntime::start_module`]; modules after the failing one stay stopped.
    pub async fn restart_module(
        &mut self,
        module: &str,
        cancel: &CancellationToken,
    ) -> Result<TeardownReport, LifecycleError> {
        self.ensure_running("restart module")?;
        let idx = self.require_slot(module)?;

        let dependents = self.graph.transitive_dependents(module);
        let restart: Vec<String> = self
            .slots
            .iter()
            .enumerate()
            .filter(|&(i, slot)| {
                i == idx
                    || (slot.state == ModuleState::Started
                        && dependents.contains(slot.registration.name()))
            })
            .map(|(_, slot)| slot.registration.name().to_owned())
            .collect();

        let report = self.stop_module(module, cancel).await?;
        if cancel.is_cancelled() {
            return Ok(report);
        }
        for name in &restart {
            self.start_module(name, cancel).await?;
        }
        Ok(report)
    }

    /// First dependency of `module` that is not started right now.
    fn stopped_dependency(&self, module: &str) -> Option<String> {
        self.graph
            .dependencies_of(module)
            .iter()
            .find(|dep| {
                self.slot_index(dep)
                    .is_some_and(|idx| self.slots[idx].state != ModuleState::Started)
            })
            .cloned()
    }

    fn ensure_running(&self, operation: &'static str) -> Result<(), LifecycleError> {
        match self.state {
            HostState::Running => Ok(()),
            state => Err(LifecycleError::InvalidState { operation, state }),
        }
    }

    fn require_slot(&self, module: &str) -> Result<usize, LifecycleError> {
        self.slot_index(module)
            .ok_or_else(|| LifecycleError::UnknownModule {
                module: module.to_owned(),
            })
    }

    fn abort(
        &mut self,
        phase: Phase,
        in_flight: Option<(usize, Duration)>,
        report: &mut BootstrapReport,
    ) -> Halt {
        tracing::warn!(%phase, "Cancellation observed, aborting bootstrap");
        if let Some((idx, elapsed)) = in_flight {
            self.mark_aborted(idx, phase, elapsed, report);
        }
        report.aborted_phase = Some(phase);
        self.publish();
        Halt::Aborted
    }

    fn mark_aborted(
        &mut self,
        idx: usize,
        phase: Phase,
        elapsed: Duration,
        report: &mut BootstrapReport,
    ) {
        let slot = &mut self.slots[idx];
        slot.state = ModuleState::Aborted(phase);
        report.push(slot.registration.name(), phase, PhaseOutcome::Aborted, elapsed);
    }

    /// Forget everything produced by the previous run.
    fn reset(&mut self) {
        self.services.clear();
        self.schema.clear();
        for slot in &mut self.slots {
            slot.reset();
        }
    }

    fn slot_index(&self, module: &str) -> Option<usize> {
        self.order.position(module)
    }

    fn trace_hook(&self, module: &str, phase: Phase) {
        if self.lifecycle_logging {
            tracing::debug!(module, %phase, "Invoking lifecycle hook");
        }
    }

    fn set_host_state(&mut self, state: HostState) {
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        let modules = self
            .slots
            .iter()
            .map(|slot| {
                let descriptor = slot.registration.descriptor();
                ModuleStatus {
                    name: descriptor.name().to_owned(),
                    version: descriptor.version().to_owned(),
                    state: slot.state,
                    dependencies: self.graph.dependencies_of(descriptor.name()).to_vec(),
                }
            })
            .collect();
        self.monitor.publish(HostSnapshot {
            instance_id: self.instance_id,
            state: self.state,
            modules,
        });
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::descriptor::ModuleDescriptor;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        journal: Journal,
        fail_in: Option<Phase>,
    }

    impl Recorder {
        fn hit(&self, phase: Phase) -> anyhow::Result<()> {
            self.journal.lock().push(format!("{}:{phase}", self.name));
            if self.fail_in == Some(phase) {
                anyhow::bail!("{} refused {phase}", self.name);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Module for Recorder {
        async fn on_starting(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            self.hit(Phase::Starting)
        }
        async fn on_started(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            self.hit(Phase::Started)
        }
        async fn on_stopping(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            self.hit(Phase::Stopping)
        }
        async fn on_stopped(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
            self.hit(Phase::Stopped)
        }
    }

    fn module(
        name: &'static str,
        deps: &[&'static str],
        journal: &Journal,
        fail_in: Option<Phase>,
    ) -> ModuleRegistration {
        let mut descriptor = ModuleDescriptor::new(name);
        for dep in deps {
            descriptor = descriptor.depends_on(*dep);
        }
        let journal = journal.clone();
        ModuleRegistration::new(descriptor, move |_| {
            Ok(Arc::new(Recorder {
                name,
                journal: journal.clone(),
                fail_in,
            }) as Arc<dyn Module>)
        })
    }

    fn entries(journal: &Journal, phase: Phase) -> Vec<String> {
        let suffix = format!(":{phase}");
        journal
            .lock()
            .iter()
            .filter_map(|e| e.strip_suffix(&suffix).map(str::to_owned))
            .collect()
    }

    #[tokio::test]
    async fn test_stop_phase_reverse_order() {
        let journal = Journal::default();
        let mut host = HostRuntime::new(
            vec![
                module("c", &["b"], &journal, None),
                module("a", &[], &journal, None),
                module("b", &["a"], &journal, None),
            ],
            RuntimeOptions::default(),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let report = host.bootstrap(&cancel).await.unwrap();
        assert!(report.is_success());
        assert_eq!(entries(&journal, Phase::Starting), vec!["a", "b", "c"]);

        let teardown = host.shutdown(&cancel).await.unwrap();
        assert!(teardown.is_clean());
        assert_eq!(entries(&journal, Phase::Stopping), vec!["c", "b", "a"]);
        assert_eq!(entries(&journal, Phase::Stopped), vec!["c", "b", "a"]);
        assert_eq!(teardown.order_of(Phase::Stopping), vec!["c", "b", "a"]);

        // every stopping hook precedes every stopped hook
        let log = journal.lock().clone();
        let last_stopping = log.iter().rposition(|e| e.ends_with(":stopping")).unwrap();
        let first_stopped = log.iter().position(|e| e.ends_with(":stopped")).unwrap();
        assert!(last_stopping < first_stopped);
        assert_eq!(host.state(), HostState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_phase_continues_on_error() {
        let journal = Journal::default();
        let mut host = HostRuntime::new(
            vec![
                module("a", &[], &journal, None),
                module("b", &["a"], &journal, Some(Phase::Stopping)),
                module("c", &["b"], &journal, None),
            ],
            RuntimeOptions::default(),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        host.bootstrap(&cancel).await.unwrap();
        let teardown = host.shutdown(&cancel).await.unwrap();

        assert!(!teardown.is_clean());
        let failed: Vec<_> = teardown.failures().map(|r| r.module.as_str()).collect();
        assert_eq!(failed, vec!["b"]);
        assert_eq!(entries(&journal, Phase::Stopping), vec!["c", "b", "a"]);
        assert_eq!(entries(&journal, Phase::Stopped), vec!["c", "b", "a"]);
        assert_eq!(host.module_state("b"), Some(ModuleState::Failed(Phase::Stopping)));
        assert_eq!(host.module_state("a"), Some(ModuleState::Stopped));
    }

    #[tokio::test]
    async fn start_failure_skips_dependents_only() {
        let journal = Journal::default();
        let mut host = HostRuntime::new(
            vec![
                module("db", &[], &journal, Some(Phase::Starting)),
                module("api", &["db"], &journal, None),
                module("metrics", &[], &journal, None),
            ],
            RuntimeOptions::default(),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let report = host.bootstrap(&cancel).await.unwrap();

        assert_eq!(report.outcome, BootstrapOutcome::PartiallyStarted);
        assert_eq!(host.state(), HostState::Running);
        assert_eq!(host.module_state("db"), Some(ModuleState::Failed(Phase::Starting)));
        assert_eq!(host.module_state("api"), Some(ModuleState::Skipped));
        assert_eq!(host.module_state("metrics"), Some(ModuleState::Started));
        assert_eq!(entries(&journal, Phase::Started), vec!["metrics"]);

        let err = report.failures().next().and_then(|r| r.error()).unwrap();
        assert!(matches!(err, LifecycleError::StartupNotification { module, .. } if module == "db"));

        // db took part in start, api never did
        let teardown = host.shutdown(&cancel).await.unwrap();
        assert_eq!(teardown.order_of(Phase::Stopping), vec!["metrics", "db"]);
    }

    #[tokio::test]
    async fn re_entrant_bootstrap_is_rejected() {
        let journal = Journal::default();
        let mut host =
            HostRuntime::new(vec![module("a", &[], &journal, None)], RuntimeOptions::default())
                .unwrap();
        let cancel = CancellationToken::new();
        host.bootstrap(&cancel).await.unwrap();

        let err = host.bootstrap(&cancel).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidState {
                operation: "bootstrap",
                state: HostState::Running
            }
        ));
    }

    #[tokio::test]
    async fn shutdown_before_bootstrap_is_rejected() {
        let mut host = HostRuntime::new(vec![], RuntimeOptions::default()).unwrap();
        let err = host.shutdown(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidState { state: HostState::Idle, .. }));
    }

    #[tokio::test]
    async fn snapshot_tracks_states() {
        let journal = Journal::default();
        let mut host = HostRuntime::new(
            vec![module("a", &[], &journal, None), module("b", &["a"], &journal, None)],
            RuntimeOptions::default(),
        )
        .unwrap();
        let reader = host.snapshot_reader();

        let before = reader.snapshot();
        assert_eq!(before.state, HostState::Idle);
        assert_eq!(before.module("b").unwrap().state, ModuleState::Resolved);
        assert_eq!(before.module("b").unwrap().dependencies, vec!["a".to_owned()]);

        let cancel = CancellationToken::new();
        host.bootstrap(&cancel).await.unwrap();
        assert!(reader.snapshot().is_healthy());

        host.shutdown(&cancel).await.unwrap();
        let after = reader.snapshot();
        assert_eq!(after.state, HostState::Stopped);
        assert!(after.modules.iter().all(|m| m.state == ModuleState::Stopped));
    }

    #[tokio::test]
    async fn stop_timeout_is_recorded_as_teardown_failure() {
        struct Hangs;
        #[async_trait]
        impl Module for Hangs {
            async fn on_stopping(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
                std::future::pending::<()>().await;
                Ok(())
            }
        }

        let mut host = HostRuntime::new(
            vec![ModuleRegistration::new(ModuleDescriptor::new("hangs"), |_| {
                Ok(Arc::new(Hangs) as Arc<dyn Module>)
            })],
            RuntimeOptions {
                stop_timeout: Some(Duration::from_millis(20)),
                ..RuntimeOptions::default()
            },
        )
        .unwrap();

        let cancel = CancellationToken::new();
        host.bootstrap(&cancel).await.unwrap();
        let teardown = host.shutdown(&cancel).await.unwrap();

        let failure = teardown.failures().next().unwrap();
        assert_eq!(failure.phase, Phase::Stopping);
        assert!(failure.error().unwrap().to_string().contains("timed out"));
        assert_eq!(teardown.order_of(Phase::Stopped), vec!["hangs"]);
        assert_eq!(host.state(), HostState::Stopped);
    }
}
