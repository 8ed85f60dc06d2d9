//! Host runner.
//!
//! Phase order: **discover → resolve → bootstrap → wait → teardown**.
//! Shutdown can be driven by OS signals, an external `CancellationToken`,
//! or an arbitrary future.

use std::fmt;
use std::{future::Future, pin::Pin};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::LifecycleError;
use super::host_runtime::{HostRuntime, RuntimeOptions};
use super::report::{BootstrapOutcome, BootstrapReport, TeardownReport};
use crate::discovery::{DiscoveryOptions, ModuleDiscovery, ModuleRegistration};

/// How the runner should decide when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, we initiate shutdown.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// What ended the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    /// Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
    /// No signal handler could be installed.
    SignalHandlerFailed,
    /// The external token was cancelled.
    Token,
    /// The shutdown future completed.
    Future,
    /// Bootstrap did not leave the host running, so nothing was awaited.
    BootstrapHalted,
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Interrupt => "interrupt",
            Self::Terminate => "terminate",
            Self::SignalHandlerFailed => "signal_handler_failed",
            Self::Token => "token",
            Self::Future => "future",
            Self::BootstrapHalted => "bootstrap_halted",
        };
        f.write_str(s)
    }
}

pub struct RunOptions {
    pub discovery: DiscoveryOptions,
    /// Registrations added on top of linked and manifest modules.
    pub modules: Vec<ModuleRegistration>,
    pub runtime: RuntimeOptions,
    pub shutdown: ShutdownOptions,
}

/// Reports of one complete host run.
#[derive(Debug)]
pub struct RunSummary {
    pub bootstrap: BootstrapReport,
    pub teardown: TeardownReport,
    pub trigger: ShutdownTrigger,
}

impl RunSummary {
    /// Every module started and stopped without error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.bootstrap.is_success() && self.teardown.is_clean()
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<ShutdownTrigger> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|()| ShutdownTrigger::Interrupt),
        _ = terminate.recv() => Ok(ShutdownTrigger::Terminate),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<ShutdownTrigger> {
    tokio::signal::ctrl_c()
        .await
        .map(|()| ShutdownTrigger::Interrupt)
}

/// Result of the plain Ctrl+C wait used when `wait_for_signal` could not start.
fn ctrl_c_fallback(result: std::io::Result<()>) -> ShutdownTrigger {
    match result {
        Ok(()) => ShutdownTrigger::Interrupt,
        Err(err) => {
            tracing::error!(error = %err, "Ctrl+C handler failed; shutting down");
            ShutdownTrigger::SignalHandlerFailed
        }
    }
}

/// Spawn the task that cancels `cancel` when the chosen strategy fires.
/// `None` when an external token drives the lifecycle.
fn spawn_waiter(
    shutdown: ShutdownOptions,
    cancel: &CancellationToken,
) -> Option<JoinHandle<ShutdownTrigger>> {
    let c = cancel.clone();
    match shutdown {
        ShutdownOptions::Signals => Some(tokio::spawn(async move {
            let trigger = match wait_for_signal().await {
                Ok(trigger) => trigger,
                Err(err) => {
                    tracing::warn!(error = %err, "Signal handlers unavailable; falling back to Ctrl+C");
                    ctrl_c_fallback(tokio::signal::ctrl_c().await)
                }
            };
            tracing::info!(%trigger, "Shutdown requested");
            c.cancel();
            trigger
        })),
        ShutdownOptions::Future(waiter) => Some(tokio::spawn(async move {
            waiter.await;
            tracing::info!("Shutdown future completed");
            c.cancel();
            ShutdownTrigger::Future
        })),
        ShutdownOptions::Token(_) => {
            tracing::info!("External token controls the host lifecycle");
            None
        }
    }
}

/// Full cycle: discover → bootstrap → wait → teardown.
///
/// Waits for the shutdown trigger only if bootstrap left the host running; a failed
/// or aborted bootstrap goes straight to teardown.
///
/// # Errors
/// Returns `LifecycleError` if discovery or dependency resolution fails.
pub async fn run(opts: RunOptions) -> Result<RunSummary, LifecycleError> {
    let cancel = match &opts.shutdown {
        ShutdownOptions::Token(t) => t.clone(),
        _ => CancellationToken::new(),
    };
    let waiter = spawn_waiter(opts.shutdown, &cancel);

    let discovery = opts
        .modules
        .into_iter()
        .fold(ModuleDiscovery::new(opts.discovery), ModuleDiscovery::with_registration);
    let prepared = discovery
        .discover()
        .map_err(LifecycleError::from)
        .and_then(|discovered| HostRuntime::from_discovered(discovered, opts.runtime));
    let mut host = match prepared {
        Ok(host) => host,
        Err(err) => {
            if let Some(handle) = waiter {
                handle.abort();
            }
            return Err(err);
        }
    };
    let bootstrap = host.bootstrap(&cancel).await?;

    match bootstrap.outcome {
        BootstrapOutcome::Started | BootstrapOutcome::PartiallyStarted => {
            tracing::info!("Host running");
            cancel.cancelled().await;
        }
        BootstrapOutcome::Failed => {
            if let Some(err) = bootstrap.fatal_error() {
                tracing::error!(error = %err, "Bootstrap failed");
            }
        }
        BootstrapOutcome::Aborted => tracing::warn!("Bootstrap aborted"),
    }

    let trigger = match waiter {
        // the waiter cancels right before returning
        Some(handle) if cancel.is_cancelled() => handle
            .await
            .unwrap_or(ShutdownTrigger::BootstrapHalted),
        Some(handle) => {
            handle.abort();
            ShutdownTrigger::BootstrapHalted
        }
        None if cancel.is_cancelled() => ShutdownTrigger::Token,
        None => ShutdownTrigger::BootstrapHalted,
    };

    // The run token is already cancelled here; teardown gets its own.
    let teardown = host.shutdown(&CancellationToken::new()).await?;
    Ok(RunSummary {
        bootstrap,
        teardown,
        trigger,
    })
}
