//! Outcome records produced by bootstrap and teardown.

use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::error::LifecycleError;
use super::state::Phase;

#[derive(Debug)]
pub enum PhaseOutcome {
    Succeeded,
    Failed(LifecycleError),
    /// Not invoked; carries the reason.
    Skipped(String),
    Aborted,
}

impl PhaseOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Result of invoking one hook on one module.
#[derive(Debug)]
pub struct PhaseResult {
    pub module: String,
    pub phase: Phase,
    pub outcome: PhaseOutcome,
    pub elapsed: Duration,
}

impl PhaseResult {
    #[must_use]
    pub fn error(&self) -> Option<&LifecycleError> {
        match &self.outcome {
            PhaseOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Every module reached `Started`.
    Started,
    /// The host is running but some modules failed to start or were skipped.
    PartiallyStarted,
    /// A configuration or instantiation step failed.
    Failed,
    /// Cancellation was observed before bootstrap completed.
    Aborted,
}

impl fmt::Display for BootstrapOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::PartiallyStarted => "partially_started",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct BootstrapReport {
    pub instance_id: Uuid,
    /// Resolved module order.
    pub order: Vec<String>,
    pub results: Vec<PhaseResult>,
    pub outcome: BootstrapOutcome,
    /// Phase in which cancellation was observed, for `Aborted` reports.
    pub aborted_phase: Option<Phase>,
}

impl BootstrapReport {
    pub(crate) fn new(instance_id: Uuid, order: Vec<String>) -> Self {
        Self {
            instance_id,
            order,
            results: Vec::new(),
            outcome: BootstrapOutcome::Started,
            aborted_phase: None,
        }
    }

    pub(crate) fn push(
        &mut self,
        module: &str,
        phase: Phase,
        outcome: PhaseOutcome,
        elapsed: Duration,
    ) {
        self.results.push(PhaseResult {
            module: module.to_owned(),
            phase,
            outcome,
            elapsed,
        });
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == BootstrapOutcome::Started
    }

    /// The error that stopped bootstrap, for `Failed` reports.
    #[must_use]
    pub fn fatal_error(&self) -> Option<&LifecycleError> {
        if self.outcome != BootstrapOutcome::Failed {
            return None;
        }
        self.results.iter().rev().find_map(PhaseResult::error)
    }

    /// Convert a failed or aborted report into its error.
    ///
    /// # Errors
    /// Returns the fatal error of a `Failed` report, or `LifecycleError::Cancelled`
    /// for an `Aborted` one.
    pub fn into_result(mut self) -> Result<Self, LifecycleError> {
        match self.outcome {
            BootstrapOutcome::Failed => {
                let failed = self
                    .results
                    .iter()
                    .rposition(|r| matches!(r.outcome, PhaseOutcome::Failed(_)));
                if let Some(pos) = failed
                    && let PhaseOutcome::Failed(err) = self.results.remove(pos).outcome
                {
                    return Err(err);
                }
                Ok(self)
            }
            BootstrapOutcome::Aborted => Err(LifecycleError::Cancelled {
                phase: self.aborted_phase.unwrap_or(Phase::PreConfigure),
            }),
            BootstrapOutcome::Started | BootstrapOutcome::PartiallyStarted => Ok(self),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &PhaseResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, PhaseOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &PhaseResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, PhaseOutcome::Skipped(_)))
    }

    pub fn results_for<'a>(&'a self, module: &'a str) -> impl Iterator<Item = &'a PhaseResult> {
        self.results.iter().filter(move |r| r.module == module)
    }
}

#[derive(Debug, Default)]
pub struct TeardownReport {
    pub results: Vec<PhaseResult>,
}

impl TeardownReport {
    pub(crate) fn push(
        &mut self,
        module: &str,
        phase: Phase,
        outcome: PhaseOutcome,
        elapsed: Duration,
    ) {
        self.results.push(PhaseResult {
            module: module.to_owned(),
            phase,
            outcome,
            elapsed,
        });
    }

    /// No stop hook failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.results.iter().all(|r| !matches!(r.outcome, PhaseOutcome::Failed(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &PhaseResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, PhaseOutcome::Failed(_)))
    }

    /// Modules in the order their `phase` hook ran.
    #[must_use]
    pub fn order_of(&self, phase: Phase) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.phase == phase)
            .map(|r| r.module.as_str())
            .collect()
    }
}
