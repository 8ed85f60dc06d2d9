#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Runner tests: full discover → bootstrap → wait → teardown cycles driven by
//! the different shutdown strategies.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use modhost::{
    BootstrapOutcome, DiscoveryOptions, Module, ModuleCtx, ModuleDescriptor, ModuleRegistration,
    ModuleSetup, RunOptions, RuntimeOptions, ShutdownOptions, ShutdownTrigger, run,
};

#[derive(Debug, Default)]
struct TrackedState {
    started: AtomicBool,
    stopped: AtomicBool,
    token_cancelled_at_stop: AtomicBool,
}

struct Tracked {
    state: Arc<TrackedState>,
}

#[async_trait::async_trait]
impl Module for Tracked {
    async fn on_started(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.state.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn on_stopped(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        self.state
            .token_cancelled_at_stop
            .store(ctx.cancellation_token().is_cancelled(), Ordering::SeqCst);
        self.state.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn tracked(state: &Arc<TrackedState>) -> ModuleRegistration {
    let state = state.clone();
    ModuleRegistration::new(ModuleDescriptor::new("tracked"), move |_| {
        Ok(Arc::new(Tracked {
            state: state.clone(),
        }) as Arc<dyn Module>)
    })
}

fn options(modules: Vec<ModuleRegistration>, shutdown: ShutdownOptions) -> RunOptions {
    RunOptions {
        discovery: DiscoveryOptions {
            include_already_loaded: false,
            ..DiscoveryOptions::default()
        },
        modules,
        runtime: RuntimeOptions::default(),
        shutdown,
    }
}

#[tokio::test]
async fn token_drives_the_full_cycle() {
    let state = Arc::new(TrackedState::default());
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(run(options(
        vec![tracked(&state)],
        ShutdownOptions::Token(cancel.clone()),
    )));

    // wait until the module is up, then ask for shutdown
    timeout(Duration::from_secs(5), async {
        while !state.started.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(!state.stopped.load(Ordering::SeqCst));
    cancel.cancel();

    let summary = timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(summary.is_clean());
    assert_eq!(summary.trigger, ShutdownTrigger::Token);
    assert!(state.stopped.load(Ordering::SeqCst));
    assert!(state.token_cancelled_at_stop.load(Ordering::SeqCst));
}

#[tokio::test]
async fn future_completion_triggers_shutdown() {
    let state = Arc::new(TrackedState::default());
    let summary = timeout(
        Duration::from_secs(5),
        run(options(
            vec![tracked(&state)],
            ShutdownOptions::Future(Box::pin(tokio::time::sleep(Duration::from_millis(20)))),
        )),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.bootstrap.outcome, BootstrapOutcome::Started);
    assert_eq!(summary.teardown.results.len(), 2);
    assert_eq!(summary.trigger, ShutdownTrigger::Future);
    assert!(state.stopped.load(Ordering::SeqCst));
}

struct BrokenSetup;

#[async_trait::async_trait]
impl ModuleSetup for BrokenSetup {
    async fn post_configure(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        anyhow::bail!("missing credentials")
    }
}

#[tokio::test]
async fn failed_bootstrap_returns_without_waiting() {
    let state = Arc::new(TrackedState::default());
    let broken = ModuleRegistration::new(ModuleDescriptor::new("broken"), |_| {
        anyhow::bail!("never instantiated")
    })
    .with_setup(BrokenSetup);

    // the token is never cancelled; run must not block on it
    let summary = timeout(
        Duration::from_secs(5),
        run(options(
            vec![tracked(&state), broken],
            ShutdownOptions::Token(CancellationToken::new()),
        )),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.bootstrap.outcome, BootstrapOutcome::Failed);
    let err = summary.bootstrap.fatal_error().unwrap();
    assert!(err.to_string().contains("missing credentials"));
    assert!(!state.started.load(Ordering::SeqCst));
    assert!(summary.teardown.results.is_empty());
    assert_eq!(summary.trigger, ShutdownTrigger::BootstrapHalted);
}

#[tokio::test]
async fn resolve_errors_are_returned() {
    let dependent = ModuleRegistration::new(
        ModuleDescriptor::new("orphan").depends_on("ghost"),
        |_| anyhow::bail!("unreachable"),
    );
    let err = run(options(
        vec![dependent],
        ShutdownOptions::Token(CancellationToken::new()),
    ))
    .await
    .unwrap_err();
    assert!(err.to_string().contains("ghost"), "{err}");
}
