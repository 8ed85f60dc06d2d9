use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ConfigError, ConfigProvider, module_config_or_default, module_config_required};
use crate::dispatch::ServiceDispatch;
use crate::services::ServiceHub;

/// Module execution context, passed to every lifecycle hook.
///
/// Provides access to:
/// - **Configuration**: typed loading of the module's `config` section via `config()`
/// - **Services**: the [`ServiceHub`] for publishing and consuming interfaces
/// - **Dispatch**: local/remote resolution of other modules' interfaces
/// - **Lifecycle**: a cancellation token that fires when the host aborts or shuts down,
///   or when the module alone is stopped
///
/// ```ignore
/// async fn configure(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
///     let cfg: StorageConfig = ctx.config()?;
///     ctx.services().register::<dyn BlobStore>(Arc::new(FsBlobStore::new(cfg.root)));
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ModuleCtx {
    module_name: Arc<str>,
    instance_id: Uuid,
    config_provider: Arc<dyn ConfigProvider>,
    services: Arc<ServiceHub>,
    dispatch: Arc<ServiceDispatch>,
    cancellation_token: CancellationToken,
}

/// Factory for per-module contexts.
///
/// Created once by the host runtime; each lifecycle call gets a context whose
/// cancellation token is a child of the host token.
pub struct ModuleContextBuilder {
    instance_id: Uuid,
    config_provider: Arc<dyn ConfigProvider>,
    services: Arc<ServiceHub>,
    dispatch: Arc<ServiceDispatch>,
    root_token: CancellationToken,
}

impl ModuleContextBuilder {
    #[must_use]
    pub fn new(
        instance_id: Uuid,
        config_provider: Arc<dyn ConfigProvider>,
        services: Arc<ServiceHub>,
        dispatch: Arc<ServiceDispatch>,
        root_token: CancellationToken,
    ) -> Self {
        Self {
            instance_id,
            config_provider,
            services,
            dispatch,
            root_token,
        }
    }

    #[must_use]
    pub fn for_module(&self, module_name: &str) -> ModuleCtx {
        self.for_module_scoped(module_name, &self.root_token)
    }

    /// Context whose token is a child of `scope` rather than of the host token.
    #[must_use]
    pub fn for_module_scoped(&self, module_name: &str, scope: &CancellationToken) -> ModuleCtx {
        ModuleCtx {
            module_name: Arc::<str>::from(module_name),
            instance_id: self.instance_id,
            config_provider: self.config_provider.clone(),
            services: self.services.clone(),
            dispatch: self.dispatch.clone(),
            cancellation_token: scope.child_token(),
        }
    }

    /// Child of the host token, for scoping one module's run.
    #[must_use]
    pub fn module_scope(&self) -> CancellationToken {
        self.root_token.child_token()
    }

    /// Replace the root token, e.g. when the host is bootstrapped again.
    pub fn set_root_token(&mut self, token: CancellationToken) {
        self.root_token = token;
    }
}

impl ModuleCtx {
    #[inline]
    #[must_use]
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Process-wide identifier of the host instance.
    #[inline]
    #[must_use]
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    #[inline]
    #[must_use]
    pub fn config_provider(&self) -> &dyn ConfigProvider {
        &*self.config_provider
    }

    /// Service registry shared by all modules of the host.
    #[inline]
    #[must_use]
    pub fn services(&self) -> &ServiceHub {
        &self.services
    }

    #[inline]
    #[must_use]
    pub fn dispatch(&self) -> &ServiceDispatch {
        &self.dispatch
    }

    #[inline]
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Deserialize the module's config section into `T`, or use defaults if missing.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidConfig` if the section exists but does not deserialize.
    pub fn config<T: DeserializeOwned + Default>(&self) -> Result<T, ConfigError> {
        module_config_or_default(self.config_provider.as_ref(), &self.module_name)
    }

    /// Deserialize the module's config section into `T`; the section must exist.
    ///
    /// # Errors
    /// Returns `ConfigError` if the section is missing or invalid.
    pub fn config_required<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        module_config_required(self.config_provider.as_ref(), &self.module_name)
    }
}

impl std::fmt::Debug for ModuleCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCtx")
            .field("module_name", &self.module_name)
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::MapConfigProvider;
    use crate::dispatch::DeploymentMode;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Deserialize, Default)]
    struct TestConfig {
        #[serde(default)]
        api_key: String,
        #[serde(default)]
        timeout_ms: u64,
    }

    fn builder(root: CancellationToken) -> ModuleContextBuilder {
        let provider = MapConfigProvider::default().with_module_config(
            "test_module",
            json!({ "api_key": "secret123", "timeout_ms": 5000 }),
        );
        let services = Arc::new(ServiceHub::new());
        let dispatch = Arc::new(ServiceDispatch::new(
            DeploymentMode::Local,
            services.clone(),
        ));
        ModuleContextBuilder::new(Uuid::new_v4(), Arc::new(provider), services, dispatch, root)
    }

    #[test]
    fn config_reads_module_section() {
        let ctx = builder(CancellationToken::new()).for_module("test_module");
        let cfg: TestConfig = ctx.config().unwrap();
        assert_eq!(cfg.api_key, "secret123");
        assert_eq!(cfg.timeout_ms, 5000);
        assert_eq!(ctx.module_name(), "test_module");
    }

    #[test]
    fn config_defaults_for_unknown_module() {
        let ctx = builder(CancellationToken::new()).for_module("other");
        assert_eq!(ctx.config::<TestConfig>().unwrap(), TestConfig::default());
        assert!(ctx.config_required::<TestConfig>().is_err());
    }

    #[test]
    fn child_tokens_follow_root() {
        let root = CancellationToken::new();
        let b = builder(root.clone());
        let a = b.for_module("a");
        let c = b.for_module("c");

        a.cancellation_token().cancel();
        assert!(!c.cancellation_token().is_cancelled(), "siblings are independent");

        root.cancel();
        assert!(c.cancellation_token().is_cancelled());
    }

    #[test]
    fn scoped_tokens_stop_with_their_scope_or_root() {
        let root = CancellationToken::new();
        let b = builder(root.clone());
        let scope = b.module_scope();
        let scoped = b.for_module_scoped("a", &scope);
        let plain = b.for_module("a");

        scope.cancel();
        assert!(scoped.cancellation_token().is_cancelled());
        assert!(!plain.cancellation_token().is_cancelled());

        let next = b.for_module_scoped("a", &b.module_scope());
        root.cancel();
        assert!(next.cancellation_token().is_cancelled());
    }

    #[test]
    fn contexts_share_services() {
        let b = builder(CancellationToken::new());
        let a = b.for_module("a");
        a.services().register::<String>(Arc::new("hello".to_owned()));
        let c = b.for_module("c");
        assert_eq!(*c.services().get::<String>().unwrap(), "hello");
        assert_eq!(a.instance_id(), c.instance_id());
    }
}
