//! Single owner of all scheduler state.
//!
//! The [`ManagerActor`] runs the scheduling tick and serves commands from
//! any number of [`ManagerHandle`]s. Everything that mutates the manager or
//! the configuration document goes through its command channel, so the
//! remote loop and the tick never race.

use mimic_config::{MimicConfig, SchedulerConfig};
use mimic_core::{BehaviourSummary, IdleCycleStatus, ManagerStatus, MimicError, Result};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::behaviour::BehaviourDescriptor;
use crate::manager::BehaviourManager;

/// Requests served by the actor. Each carries its reply channel.
pub enum ManagerCommand {
    RunBehaviour {
        id: String,
        force: bool,
        reply: oneshot::Sender<Result<BehaviourSummary>>,
    },
    QueueBehaviour {
        id: String,
        priority: u32,
        reply: oneshot::Sender<Result<()>>,
    },
    Terminate {
        reply: oneshot::Sender<Option<BehaviourSummary>>,
    },
    Status {
        reply: oneshot::Sender<ManagerStatus>,
    },
    MergeConfig {
        fragment: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    MergeBehaviourConfig {
        id: String,
        fragment: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Config {
        reply: oneshot::Sender<Result<MimicConfig>>,
    },
    SetIdleCycle {
        status: IdleCycleStatus,
        reply: oneshot::Sender<()>,
    },
    Catalog {
        reply: oneshot::Sender<Vec<BehaviourDescriptor>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Used when `now + delay` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn retry_deadline(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

pub struct ManagerActor {
    manager: BehaviourManager,
    rx: mpsc::Receiver<ManagerCommand>,
    tick_interval: Duration,
    error_retry: Duration,
}

impl ManagerActor {
    /// Create the actor and a handle to it. Call [`run`](Self::run) to start serving.
    pub fn new(manager: BehaviourManager, scheduler: &SchedulerConfig) -> (Self, ManagerHandle) {
        let (tx, rx) = mpsc::channel(64);
        let actor = Self {
            manager,
            rx,
            tick_interval: Duration::from_millis(scheduler.tick_interval_ms.max(1)),
            error_retry: Duration::from_secs(scheduler.error_retry_secs),
        };
        (actor, ManagerHandle { tx })
    }

    /// Serve ticks and commands until `Shutdown` arrives or every handle is dropped.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retry_at: Option<Instant> = None;

        info!(tick_ms = self.tick_interval.as_millis() as u64, "behaviour scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if retry_at.is_some_and(|at| Instant::now() < at) {
                        continue;
                    }
                    retry_at = None;
                    if let Err(e) = self.tick().await {
                        error!(error = %e, retry_secs = self.error_retry.as_secs(), "scheduling failed");
                        retry_at = Some(retry_deadline(Instant::now(), self.error_retry));
                    }
                }
                cmd = self.rx.recv() => match cmd {
                    Some(ManagerCommand::Shutdown { reply }) => {
                        self.manager.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(cmd) => self.handle(cmd).await,
                    None => {
                        debug!("all manager handles dropped");
                        self.manager.shutdown().await;
                        break;
                    }
                },
            }
        }

        info!("behaviour scheduler stopped");
    }

    /// One scheduling step: start something when idle and the idle cycle runs.
    async fn tick(&mut self) -> Result<()> {
        if self.manager.idle_cycle() != IdleCycleStatus::Running {
            return Ok(());
        }
        if self.manager.is_behaviour_running() {
            return Ok(());
        }
        if let Some(summary) = self.manager.run_next_behaviour().await? {
            debug!(behaviour = %summary.id, "tick started behaviour");
        }
        Ok(())
    }

    async fn handle(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::RunBehaviour { id, force, reply } => {
                let result = self.manager.run_behaviour(&id, force).await;
                if let Err(e) = &result {
                    warn!(behaviour = %id, force, error = %e, "run request rejected");
                }
                let _ = reply.send(result);
            }
            ManagerCommand::QueueBehaviour { id, priority, reply } => {
                let _ = reply.send(self.manager.queue_behaviour(&id, priority));
            }
            ManagerCommand::Terminate { reply } => {
                let _ = reply.send(self.manager.terminate_behaviour().await);
            }
            ManagerCommand::Status { reply } => {
                let _ = reply.send(self.manager.get_current_status());
            }
            ManagerCommand::MergeConfig { fragment, reply } => {
                let result = self.manager.config_mut().merge(&fragment);
                match &result {
                    Ok(()) => info!("configuration updated"),
                    Err(e) => warn!(error = %e, "configuration update rejected"),
                }
                let _ = reply.send(result);
            }
            ManagerCommand::MergeBehaviourConfig { id, fragment, reply } => {
                let result = self.manager.config_mut().merge_behaviour(&id, &fragment);
                match &result {
                    Ok(()) => info!(behaviour = %id, "behaviour configuration updated"),
                    Err(e) => warn!(behaviour = %id, error = %e, "behaviour configuration update rejected"),
                }
                let _ = reply.send(result);
            }
            ManagerCommand::Config { reply } => {
                let _ = reply.send(self.manager.config().get());
            }
            ManagerCommand::SetIdleCycle { status, reply } => {
                self.manager.set_idle_cycle(status);
                let _ = reply.send(());
            }
            ManagerCommand::Catalog { reply } => {
                let _ = reply.send(self.manager.catalog().descriptors());
            }
            ManagerCommand::Shutdown { reply } => {
                // Handled in `run`.
                let _ = reply.send(());
            }
        }
    }
}

/// Cheap, clonable front end of the actor.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<ManagerCommand>,
}

impl ManagerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| MimicError::ManagerStopped)?;
        rx.await.map_err(|_| MimicError::ManagerStopped)
    }

    pub async fn run_behaviour(&self, id: &str, force: bool) -> Result<BehaviourSummary> {
        let id = id.to_string();
        self.request(|reply| ManagerCommand::RunBehaviour { id, force, reply })
            .await?
    }

    pub async fn queue_behaviour(&self, id: &str, priority: u32) -> Result<()> {
        let id = id.to_string();
        self.request(|reply| ManagerCommand::QueueBehaviour { id, priority, reply })
            .await?
    }

    pub async fn terminate_behaviour(&self) -> Result<Option<BehaviourSummary>> {
        self.request(|reply| ManagerCommand::Terminate { reply }).await
    }

    pub async fn status(&self) -> Result<ManagerStatus> {
        self.request(|reply| ManagerCommand::Status { reply }).await
    }

    pub async fn merge_config(&self, fragment: Value) -> Result<()> {
        self.request(|reply| ManagerCommand::MergeConfig { fragment, reply })
            .await?
    }

    pub async fn merge_behaviour_config(&self, id: &str, fragment: Value) -> Result<()> {
        let id = id.to_string();
        self.request(|reply| ManagerCommand::MergeBehaviourConfig { id, fragment, reply })
            .await?
    }

    pub async fn config(&self) -> Result<MimicConfig> {
        self.request(|reply| ManagerCommand::Config { reply }).await?
    }

    pub async fn set_idle_cycle(&self, status: IdleCycleStatus) -> Result<()> {
        self.request(|reply| ManagerCommand::SetIdleCycle { status, reply })
            .await
    }

    pub async fn catalog(&self) -> Result<Vec<BehaviourDescriptor>> {
        self.request(|reply| ManagerCommand::Catalog { reply }).await
    }

    /// Stop the idle cycle, terminate the active behaviour, and end the actor.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| ManagerCommand::Shutdown { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_deadline_adds_delay() {
        let now = Instant::now();
        assert_eq!(retry_deadline(now, Duration::from_secs(5)), now + Duration::from_secs(5));
    }

    #[test]
    fn test_retry_deadline_saturates_on_huge_delay() {
        let now = Instant::now();
        let at = retry_deadline(now, Duration::from_secs(u64::MAX));
        assert!(at > now + Duration::from_secs(86_400));
    }
}
