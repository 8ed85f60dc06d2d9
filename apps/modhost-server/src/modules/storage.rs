//! In-memory key/value store published to other modules as `dyn KeyValueStore`.

use modhost::{
    Module, ModuleCtx, ModuleDescriptor, ModuleRegistration, ModuleSetup, RegistrationSink,
    SchemaRegistry,
};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const MODULE_NAME: &str = "storage";

pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &str, value: String);
    fn get(&self, key: &str) -> Option<String>;
    fn entry_count(&self) -> usize;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StorageConfig {
    /// Prefix applied to every key.
    namespace: String,
    /// Entries present from the start.
    seed: BTreeMap<String, String>,
}

struct InMemoryStore {
    namespace: String,
    entries: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStore {
    fn new(cfg: StorageConfig) -> Self {
        let store = Self {
            namespace: cfg.namespace,
            entries: RwLock::new(BTreeMap::new()),
        };
        for (key, value) in cfg.seed {
            store.put(&key, value);
        }
        store
    }

    fn key(&self, key: &str) -> String {
        if self.namespace.is_empty() {
            key.to_owned()
        } else {
            format!("{}/{key}", self.namespace)
        }
    }
}

impl KeyValueStore for InMemoryStore {
    fn put(&self, key: &str, value: String) {
        self.entries.write().insert(self.key(key), value);
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(&self.key(key)).cloned()
    }

    fn entry_count(&self) -> usize {
        self.entries.read().len()
    }
}

struct StorageSetup;

#[async_trait::async_trait]
impl ModuleSetup for StorageSetup {
    async fn configure(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let cfg: StorageConfig = ctx.config()?;
        tracing::info!(namespace = %cfg.namespace, seeded = cfg.seed.len(), "Configuring storage");
        ctx.services()
            .register::<dyn KeyValueStore>(Arc::new(InMemoryStore::new(cfg)));
        Ok(())
    }

    async fn configure_schema(&self, ctx: &ModuleCtx, schema: &SchemaRegistry) -> anyhow::Result<()> {
        schema.register(
            ctx.module_name(),
            "kv_entry",
            serde_json::json!({ "key": "string", "value": "string" }),
        )?;
        Ok(())
    }
}

struct StorageModule {
    store: Arc<dyn KeyValueStore>,
}

#[async_trait::async_trait]
impl Module for StorageModule {
    async fn on_started(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        tracing::info!(entries = self.store.entry_count(), "Storage ready");
        Ok(())
    }

    async fn on_stopped(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        tracing::info!(entries = self.store.entry_count(), "Storage closed");
        Ok(())
    }
}

fn register(sink: &mut RegistrationSink) {
    let descriptor = ModuleDescriptor::new(MODULE_NAME)
        .with_version("0.3.0")
        .with_description("In-memory key/value storage");
    sink.register(
        ModuleRegistration::new(descriptor, |scope| {
            Ok(Arc::new(StorageModule {
                store: scope.resolve::<dyn KeyValueStore>()?,
            }) as Arc<dyn Module>)
        })
        .with_setup(StorageSetup),
    );
}

modhost::inventory::submit! {
    modhost::Registrator(register)
}
