//! Records host lifecycle transitions into storage.
//!
//! The store is looked up through the dispatch layer once the host is running,
//! so the module works unchanged when storage is served remotely.

use modhost::{
    DependencySpec, Module, ModuleCtx, ModuleDescriptor, ModuleRegistration, RegistrationSink,
};
use parking_lot::Mutex;
use std::sync::Arc;

use super::storage::{self, KeyValueStore};
use super::tasks;

pub const MODULE_NAME: &str = "audit";

#[derive(Default)]
struct AuditModule {
    store: Mutex<Option<Arc<dyn KeyValueStore>>>,
}

impl AuditModule {
    fn record(&self, ctx: &ModuleCtx, event: &str) {
        let store = self.store.lock().clone();
        if let Some(store) = store {
            store.put(&format!("audit.{event}"), ctx.instance_id().to_string());
        }
        tracing::info!(instance_id = %ctx.instance_id(), event, "Lifecycle event");
    }
}

#[async_trait::async_trait]
impl Module for AuditModule {
    async fn on_started(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let store = ctx.dispatch().resolve::<dyn KeyValueStore>()?;
        *self.store.lock() = Some(store);
        self.record(ctx, "started");
        Ok(())
    }

    async fn on_stopping(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let last_tick = self
            .store
            .lock()
            .as_ref()
            .and_then(|store| store.get(tasks::LAST_TICK_KEY));
        if let Some(ticks) = last_tick {
            tracing::info!(ticks = %ticks, "Heartbeat count at shutdown");
        }
        self.record(ctx, "stopping");
        Ok(())
    }

    async fn on_stopped(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.store.lock().take();
        Ok(())
    }
}

fn register(sink: &mut RegistrationSink) {
    let descriptor = ModuleDescriptor::new(MODULE_NAME)
        .with_version("0.1.0")
        .with_description("Lifecycle audit trail")
        .depends_on(storage::MODULE_NAME)
        .depends_on(DependencySpec::optional(tasks::MODULE_NAME));
    sink.register(ModuleRegistration::new(descriptor, |_| {
        Ok(Arc::new(AuditModule::default()) as Arc<dyn Module>)
    }));
}

modhost::inventory::submit! {
    modhost::Registrator(register)
}
