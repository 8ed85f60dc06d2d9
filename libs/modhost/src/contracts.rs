use async_trait::async_trait;
use std::sync::Arc;

use crate::context::ModuleCtx;
use crate::schema::SchemaRegistry;
use crate::services::ResolutionScope;

/// Configuration-phase hooks.
///
/// Called before any module is instantiated. Each phase runs for every module in
/// dependency order before the next phase starts, so a hook may rely on the same
/// phase having completed for every module it depends on. A failure here aborts the
/// whole bootstrap. Every hook defaults to a no-op.
#[async_trait]
pub trait ModuleSetup: Send + Sync + 'static {
    async fn pre_configure(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// Publish services and scoped factories into `ctx.services()`.
    async fn configure(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    async fn post_configure(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    /// Describe persistent entities owned by this module.
    async fn configure_schema(
        &self,
        _ctx: &ModuleCtx,
        _schema: &SchemaRegistry,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Setup for modules with nothing to configure.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSetup;

impl ModuleSetup for NoSetup {}

/// Runtime hooks of a live module instance.
///
/// `on_starting` and `on_started` run in dependency order after every module has been
/// instantiated; a failure is isolated to the module. `on_stopping` and `on_stopped`
/// run in reverse order during teardown; a failure is logged and teardown continues.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    async fn on_starting(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_started(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_stopping(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_stopped(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Builds a module instance from services resolved in an isolated scope.
pub trait ModuleInstantiator: Send + Sync + 'static {
    /// # Errors
    /// Returns an error if a constructor dependency cannot be resolved or construction fails.
    fn instantiate(&self, scope: &ResolutionScope<'_>) -> anyhow::Result<Arc<dyn Module>>;
}

impl<F> ModuleInstantiator for F
where
    F: Fn(&ResolutionScope<'_>) -> anyhow::Result<Arc<dyn Module>> + Send + Sync + 'static,
{
    fn instantiate(&self, scope: &ResolutionScope<'_>) -> anyhow::Result<Arc<dyn Module>> {
        self(scope)
    }
}
