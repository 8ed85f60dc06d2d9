//! Periodic heartbeat job that writes its last tick into storage.

use modhost::{
    DependencySpec, Module, ModuleCtx, ModuleDescriptor, ModuleRegistration, ModuleSetup,
    RegistrationSink,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::storage::{self, KeyValueStore};

pub const MODULE_NAME: &str = "tasks";
pub const LAST_TICK_KEY: &str = "tasks.last_tick";
const STORAGE_REQUIREMENT: &str = "^0.3";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TasksConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

struct TasksSetup;

#[async_trait::async_trait]
impl ModuleSetup for TasksSetup {
    async fn configure(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let cfg: TasksConfig = ctx.config()?;
        anyhow::ensure!(!cfg.interval.is_zero(), "tasks.interval must be positive");
        ctx.services().register(Arc::new(cfg));
        Ok(())
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct TasksModule {
    cfg: Arc<TasksConfig>,
    store: Arc<dyn KeyValueStore>,
    worker: Mutex<Option<Worker>>,
}

impl TasksModule {
    fn spawn(&self, parent: &CancellationToken) -> Worker {
        let cancel = parent.child_token();
        let token = cancel.clone();
        let store = self.store.clone();
        let interval = self.cfg.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut ticks: u64 = 0;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        ticks += 1;
                        store.put(LAST_TICK_KEY, ticks.to_string());
                        tracing::debug!(ticks, "Heartbeat");
                    }
                }
            }
            tracing::debug!(ticks, "Heartbeat loop finished");
        });
        Worker { cancel, handle }
    }
}

#[async_trait::async_trait]
impl Module for TasksModule {
    async fn on_started(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let worker = self.spawn(ctx.cancellation_token());
        *self.worker.lock() = Some(worker);
        tracing::info!(interval = ?self.cfg.interval, "Heartbeat started");
        Ok(())
    }

    async fn on_stopping(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            worker.handle.await?;
        }
        Ok(())
    }
}

fn storage_dependency() -> DependencySpec {
    let dep = DependencySpec::required(storage::MODULE_NAME);
    match dep.clone().with_version(STORAGE_REQUIREMENT) {
        Ok(dep) => dep,
        Err(err) => {
            tracing::warn!(error = %err, "Ignoring storage version requirement");
            dep
        }
    }
}

fn register(sink: &mut RegistrationSink) {
    let descriptor = ModuleDescriptor::new(MODULE_NAME)
        .with_version("0.2.1")
        .with_description("Periodic heartbeat job")
        .depends_on(storage_dependency());
    sink.register(
        ModuleRegistration::new(descriptor, |scope| {
            Ok(Arc::new(TasksModule {
                cfg: scope.resolve::<TasksConfig>()?,
                store: scope.resolve::<dyn KeyValueStore>()?,
                worker: Mutex::new(None),
            }) as Arc<dyn Module>)
        })
        .with_setup(TasksSetup),
    );
}

modhost::inventory::submit! {
    modhost::Registrator(register)
}
