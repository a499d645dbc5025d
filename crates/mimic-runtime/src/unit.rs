//! Interruptible execution unit: runs one behaviour instance and guarantees
//! its cleanup on every exit path.
//!
//! The payload runs on its own tokio task so it can be aborted at any await
//! point without its cooperation. A second, supervising task waits for the
//! payload, records how it ended, and then runs the cleanup sequence:
//! callbacks registered on the unit first, then the cleanup stack.

use mimic_core::{BehaviourId, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::behaviour::{Behaviour, BehaviourContext};
use crate::cleanup::{CleanupHandle, CleanupStack, panic_message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Created,
    Running,
    Completed,
    Cancelled,
    Faulted,
    CleanedUp,
}

/// How the payload ended. Kept after the unit reaches `CleanedUp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Faulted(String),
}

struct UnitShared {
    behaviour_id: BehaviourId,
    run_id: Uuid,
    state: Mutex<UnitState>,
    outcome: Mutex<Option<RunOutcome>>,
    cleaned: AtomicBool,
    callbacks: CleanupStack,
    stack: CleanupStack,
}

impl UnitShared {
    fn set_state(&self, state: UnitState) {
        *self.state.lock() = state;
    }

    fn record(&self, outcome: RunOutcome) {
        let state = match outcome {
            RunOutcome::Completed => UnitState::Completed,
            RunOutcome::Cancelled => UnitState::Cancelled,
            RunOutcome::Faulted(_) => UnitState::Faulted,
        };
        *self.outcome.lock() = Some(outcome);
        let mut current = self.state.lock();
        if *current != UnitState::CleanedUp {
            *current = state;
        }
    }

    /// Runs at most once across the supervisor and `force_cleanup`.
    /// Returns false if it had already run.
    async fn cleanup(&self) -> bool {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            return false;
        }
        let callbacks = self.callbacks.run_all().await;
        let stack = self.stack.run_all().await;
        let failures = callbacks.failures.len() + stack.failures.len();
        if failures > 0 {
            warn!(
                behaviour = %self.behaviour_id,
                run_id = %self.run_id,
                failures,
                "cleanup finished with failures"
            );
        } else {
            debug!(
                behaviour = %self.behaviour_id,
                run_id = %self.run_id,
                tasks = callbacks.executed.len() + stack.executed.len(),
                "cleanup finished"
            );
        }
        self.set_state(UnitState::CleanedUp);
        true
    }

    /// Cleanup already ran from outside while the payload was still alive.
    /// Run whatever it registered after that.
    async fn drain_leftovers(&self) {
        if self.callbacks.is_empty() && self.stack.is_empty() {
            return;
        }
        warn!(
            behaviour = %self.behaviour_id,
            run_id = %self.run_id,
            leftovers = ?[self.callbacks.labels(), self.stack.labels()].concat(),
            "behaviour registered cleanup after forced cleanup; running it now"
        );
        let callbacks = self.callbacks.run_all().await;
        let stack = self.stack.run_all().await;
        let failures = callbacks.failures.len() + stack.failures.len();
        if failures > 0 {
            warn!(behaviour = %self.behaviour_id, run_id = %self.run_id, failures, "late cleanup finished with failures");
        }
    }
}

/// One run of one behaviour.
pub struct ExecutionUnit {
    behaviour: Arc<dyn Behaviour>,
    settings: Value,
    shared: Arc<UnitShared>,
    payload: Option<AbortHandle>,
    supervisor: Option<JoinHandle<()>>,
}

impl ExecutionUnit {
    /// Bind a behaviour to a fresh cleanup stack. Nothing runs until [`start`](Self::start).
    pub fn new(behaviour: Arc<dyn Behaviour>, stack: CleanupStack, settings: Value) -> Self {
        let shared = Arc::new(UnitShared {
            behaviour_id: behaviour.id().to_string(),
            run_id: Uuid::new_v4(),
            state: Mutex::new(UnitState::Created),
            outcome: Mutex::new(None),
            cleaned: AtomicBool::new(false),
            callbacks: CleanupStack::new(),
            stack,
        });
        Self {
            behaviour,
            settings,
            shared,
            payload: None,
            supervisor: None,
        }
    }

    pub fn behaviour_id(&self) -> &str {
        &self.shared.behaviour_id
    }

    pub fn run_id(&self) -> Uuid {
        self.shared.run_id
    }

    pub fn state(&self) -> UnitState {
        *self.shared.state.lock()
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.shared.outcome.lock().clone()
    }

    pub fn cleanup_stack(&self) -> &CleanupStack {
        &self.shared.stack
    }

    /// Register a callback that runs before the cleanup stack when the run ends.
    pub fn on_cleanup<F, Fut>(&self, label: impl Into<String>, callback: F) -> CleanupHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.shared.callbacks.push(label, callback)
    }

    /// Spawn the payload and its supervisor. Returns immediately.
    pub fn start(&mut self) {
        if self.state() != UnitState::Created {
            warn!(behaviour = %self.behaviour_id(), "execution unit already started");
            return;
        }

        let ctx = BehaviourContext::new(
            self.shared.behaviour_id.clone(),
            self.shared.run_id,
            self.settings.clone(),
            self.shared.stack.clone(),
            self.shared.callbacks.clone(),
        );
        let behaviour = Arc::clone(&self.behaviour);
        let payload = tokio::spawn(async move { behaviour.run(ctx).await });
        self.payload = Some(payload.abort_handle());
        self.shared.set_state(UnitState::Running);

        let shared = Arc::clone(&self.shared);
        self.supervisor = Some(tokio::spawn(async move {
            let outcome = match payload.await {
                Ok(Ok(())) => {
                    info!(behaviour = %shared.behaviour_id, run_id = %shared.run_id, "behaviour completed");
                    RunOutcome::Completed
                }
                Ok(Err(e)) => {
                    error!(behaviour = %shared.behaviour_id, run_id = %shared.run_id, error = %e, "behaviour failed");
                    RunOutcome::Faulted(e.to_string())
                }
                Err(e) if e.is_cancelled() => {
                    info!(behaviour = %shared.behaviour_id, run_id = %shared.run_id, "behaviour cancelled");
                    RunOutcome::Cancelled
                }
                Err(e) => {
                    let reason = match e.try_into_panic() {
                        Ok(panic) => panic_message(panic.as_ref()),
                        Err(e) => e.to_string(),
                    };
                    error!(behaviour = %shared.behaviour_id, run_id = %shared.run_id, reason = %reason, "behaviour panicked");
                    RunOutcome::Faulted(reason)
                }
            };
            shared.record(outcome);
            if !shared.cleanup().await {
                shared.drain_leftovers().await;
            }
        }));
    }

    /// Abort the payload at its current suspension point. Does not wait.
    pub fn stop(&self) {
        if let Some(payload) = &self.payload {
            debug!(behaviour = %self.behaviour_id(), run_id = %self.run_id(), "aborting behaviour");
            payload.abort();
        }
    }

    /// True until the payload has ended and its cleanup has run.
    pub fn is_alive(&self) -> bool {
        self.supervisor
            .as_ref()
            .map(|s| !s.is_finished())
            .unwrap_or(false)
    }

    /// Wait up to `timeout` for the run, cleanup included, to finish.
    pub async fn join(&mut self, timeout: Duration) -> bool {
        let Some(supervisor) = self.supervisor.as_mut() else {
            return true;
        };
        let finished = tokio::time::timeout(timeout, supervisor).await;
        match finished {
            Ok(Ok(())) => {
                self.supervisor = None;
                true
            }
            Ok(Err(e)) => {
                // The supervisor itself died; make sure cleanup still happens.
                error!(behaviour = %self.behaviour_id(), error = %e, "execution unit supervisor failed");
                self.supervisor = None;
                self.force_cleanup().await;
                true
            }
            Err(_) => false,
        }
    }

    /// Run the cleanup sequence from the caller when the supervisor has not
    /// got to it. No-op if it already ran.
    pub async fn force_cleanup(&self) {
        if !self.shared.cleanup().await {
            debug!(behaviour = %self.behaviour_id(), "cleanup already ran");
        }
    }
}
