//! Local vs. remote resolution of cross-module service interfaces.
//!
//! The deployment mode is chosen once when the host is built. In `Local` mode a
//! consumer gets the in-process implementation published in the [`ServiceHub`];
//! in `Remote` mode it gets whatever client was installed with
//! [`ServiceDispatch::register_remote`]. How that client reaches the other side is
//! not this crate's concern.
//!
//! Resolution is refused until the host has finished instantiating modules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::services::ServiceHub;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMode {
    /// Serve calls with the in-process implementation.
    #[default]
    Local,
    /// Serve calls through a remote-channel client.
    Remote,
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("service {service} requested before module instantiation completed")]
    NotReady { service: &'static str },

    #[error("no {mode} provider for service {service}")]
    Unavailable {
        service: &'static str,
        mode: DeploymentMode,
    },
}

pub struct ServiceDispatch {
    mode: DeploymentMode,
    local: Arc<ServiceHub>,
    remote: ServiceHub,
    ready: AtomicBool,
}

impl ServiceDispatch {
    #[must_use]
    pub fn new(mode: DeploymentMode, local: Arc<ServiceHub>) -> Self {
        Self {
            mode,
            local,
            remote: ServiceHub::new(),
            ready: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    /// Install the remote-channel client for interface `T`.
    pub fn register_remote<T>(&self, client: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.remote.register::<T>(client);
    }

    /// Resolve interface `T` according to the deployment mode.
    ///
    /// # Errors
    /// Returns `DispatchError::NotReady` before instantiation has completed and
    /// `DispatchError::Unavailable` if the selected side has no provider for `T`.
    pub fn resolve<T>(&self) -> Result<Arc<T>, DispatchError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let service = std::any::type_name::<T>();
        if !self.is_ready() {
            return Err(DispatchError::NotReady { service });
        }

        let found = match self.mode {
            DeploymentMode::Local => self.local.get::<T>(),
            DeploymentMode::Remote => self.remote.get::<T>(),
        };
        found.map_err(|_| DispatchError::Unavailable {
            service,
            mode: self.mode,
        })
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub(crate) fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::Release);
    }
}

impl fmt::Debug for ServiceDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDispatch")
            .field("mode", &self.mode)
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> &'static str;
    }

    struct InProcess;
    impl Greeter for InProcess {
        fn greet(&self) -> &'static str {
            "local"
        }
    }

    struct OverTheWire;
    impl Greeter for OverTheWire {
        fn greet(&self) -> &'static str {
            "remote"
        }
    }

    fn dispatch(mode: DeploymentMode) -> ServiceDispatch {
        let hub = Arc::new(ServiceHub::new());
        hub.register::<dyn Greeter>(Arc::new(InProcess));
        let d = ServiceDispatch::new(mode, hub);
        d.register_remote::<dyn Greeter>(Arc::new(OverTheWire));
        d
    }

    #[test]
    fn refuses_before_ready() {
        let d = dispatch(DeploymentMode::Local);
        assert!(matches!(
            d.resolve::<dyn Greeter>(),
            Err(DispatchError::NotReady { .. })
        ));
    }

    #[test]
    fn mode_selects_provider() {
        let local = dispatch(DeploymentMode::Local);
        local.mark_ready();
        assert_eq!(local.resolve::<dyn Greeter>().unwrap().greet(), "local");

        let remote = dispatch(DeploymentMode::Remote);
        remote.mark_ready();
        assert_eq!(remote.resolve::<dyn Greeter>().unwrap().greet(), "remote");
    }

    #[test]
    fn missing_provider_names_the_mode() {
        let d = ServiceDispatch::new(DeploymentMode::Remote, Arc::new(ServiceHub::new()));
        d.mark_ready();
        let err = d.resolve::<dyn Greeter>().err().unwrap();
        assert!(err.to_string().contains("remote"), "{err}");
    }

    #[test]
    fn mode_deserializes_from_snake_case() {
        let mode: DeploymentMode = serde_json::from_str("\"remote\"").unwrap();
        assert_eq!(mode, DeploymentMode::Remote);
    }
}
