//! Module instantiation.

use std::sync::Arc;

use crate::contracts::Module;
use crate::discovery::ModuleRegistration;
use crate::services::ServiceHub;

#[derive(Debug, thiserror::Error)]
#[error("failed to instantiate module '{module}': {source}")]
pub struct ModuleInstantiationError {
    pub module: String,
    #[source]
    pub source: anyhow::Error,
}

/// Builds module instances. Holds no state between calls; the host runtime owns
/// every instance it receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModuleFactory;

impl ModuleFactory {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Instantiate `module`, resolving its constructor dependencies in a fresh scope.
    ///
    /// Scoped services built while constructing the module are dropped together with
    /// the scope before this returns.
    ///
    /// # Errors
    /// Returns `ModuleInstantiationError` if the instantiator fails, including when a
    /// dependency cannot be resolved from `services`.
    pub fn instantiate(
        &self,
        module: &ModuleRegistration,
        services: &ServiceHub,
    ) -> Result<Arc<dyn Module>, ModuleInstantiationError> {
        let scope = services.scope(module.name());
        let instance = module
            .instantiator()
            .instantiate(&scope)
            .map_err(|source| ModuleInstantiationError {
                module: module.name().to_owned(),
                source,
            })?;

        tracing::debug!(
            module = module.name(),
            scoped_services = scope.scoped_len(),
            "Module instantiated"
        );
        Ok(instance)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::descriptor::ModuleDescriptor;
    use std::sync::Weak;

    trait Clock: Send + Sync {
        fn now(&self) -> u64;
    }

    struct FixedClock(u64);
    impl Clock for FixedClock {
        fn now(&self) -> u64 {
            self.0
        }
    }

    struct Connection;

    struct Scheduler {
        clock: Arc<dyn Clock>,
        seen_connection: Weak<Connection>,
    }
    impl Module for Scheduler {}

    fn scheduler_registration(
        witness: Arc<parking_lot::Mutex<Option<Weak<Connection>>>>,
    ) -> ModuleRegistration {
        ModuleRegistration::new(ModuleDescriptor::new("scheduler"), move |scope| {
            let conn = scope.resolve::<Connection>()?;
            let module = Scheduler {
                clock: scope.resolve::<dyn Clock>()?,
                seen_connection: Arc::downgrade(&conn),
            };
            *witness.lock() = Some(module.seen_connection.clone());
            Ok(Arc::new(module) as Arc<dyn Module>)
        })
    }

    #[test]
    fn resolves_dependencies_and_drops_scoped_ones() {
        let hub = ServiceHub::new();
        hub.register::<dyn Clock>(Arc::new(FixedClock(42)));
        hub.register_scoped::<Connection, _>(|_| Ok(Arc::new(Connection)));

        let witness = Arc::new(parking_lot::Mutex::new(None));
        let registration = scheduler_registration(witness.clone());

        let _instance = ModuleFactory::new()
            .instantiate(&registration, &hub)
            .unwrap();

        let weak = witness.lock().take().unwrap();
        assert!(
            weak.upgrade().is_none(),
            "scoped connection must not outlive instantiation"
        );
    }

    #[test]
    fn each_call_builds_a_new_instance() {
        let hub = ServiceHub::new();
        hub.register::<dyn Clock>(Arc::new(FixedClock(1)));
        hub.register_scoped::<Connection, _>(|_| Ok(Arc::new(Connection)));
        let registration = scheduler_registration(Arc::new(parking_lot::Mutex::new(None)));

        let factory = ModuleFactory::new();
        let a = factory.instantiate(&registration, &hub).unwrap();
        let b = factory.instantiate(&registration, &hub).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn unresolvable_dependency_is_wrapped_with_module_name() {
        let hub = ServiceHub::new();
        hub.register_scoped::<Connection, _>(|_| Ok(Arc::new(Connection)));
        let registration = scheduler_registration(Arc::new(parking_lot::Mutex::new(None)));

        let err = ModuleFactory::new()
            .instantiate(&registration, &hub)
            .err()
            .unwrap();
        assert_eq!(err.module, "scheduler");
        assert!(err.to_string().contains("Clock"), "{err}");
    }

    #[test]
    fn constructor_failure_is_wrapped() {
        let registration = ModuleRegistration::new(ModuleDescriptor::new("broken"), |_| {
            anyhow::bail!("bad wiring")
        });
        let err = ModuleFactory::new()
            .instantiate(&registration, &ServiceHub::new())
            .err()
            .unwrap();
        assert_eq!(err.source.to_string(), "bad wiring");
    }

    #[test]
    fn scheduler_reads_clock() {
        let hub = ServiceHub::new();
        hub.register::<dyn Clock>(Arc::new(FixedClock(7)));
        hub.register_scoped::<Connection, _>(|_| Ok(Arc::new(Connection)));
        let scope = hub.scope("scheduler");
        let s = Scheduler {
            clock: scope.resolve::<dyn Clock>().unwrap(),
            seen_connection: Weak::new(),
        };
        assert_eq!(s.clock.now(), 7);
    }
}
