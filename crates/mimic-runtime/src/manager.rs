//! Single-slot behaviour scheduler.
//!
//! At most one behaviour runs at a time. Explicit requests go through the
//! pending queue; when the queue is empty the idle cycle picks an Idle
//! behaviour, avoiding the ones that ran most recently.

use mimic_config::ConfigStore;
use mimic_core::{
    BehaviourCategory, BehaviourId, BehaviourSummary, IdleCycleStatus, ManagerStatus, MimicError,
    Result,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::BehaviourCatalog;
use crate::cleanup::CleanupStack;
use crate::unit::{ExecutionUnit, RunOutcome};

// ── Pending queue ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedRequest {
    priority: u32,
    seq: u64,
    behaviour_id: BehaviourId,
}

impl Ord for QueuedRequest {
    // BinaryHeap is a max-heap: the lowest priority number, then the oldest
    // request, must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority-ordered run requests. Lower numbers are served first; equal
/// priorities are served in arrival order.
#[derive(Debug, Default)]
pub struct PendingQueue {
    heap: BinaryHeap<QueuedRequest>,
    next_seq: u64,
}

impl PendingQueue {
    pub fn push(&mut self, behaviour_id: impl Into<BehaviourId>, priority: u32) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedRequest {
            priority,
            seq,
            behaviour_id: behaviour_id.into(),
        });
    }

    pub fn pop(&mut self) -> Option<(u32, BehaviourId)> {
        self.heap.pop().map(|r| (r.priority, r.behaviour_id))
    }

    pub fn peek(&self) -> Option<(u32, &str)> {
        self.heap.peek().map(|r| (r.priority, r.behaviour_id.as_str()))
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

// ── Idle selection ─────────────────────────────────────────────

/// Idle ids eligible for the next pick.
///
/// With `n` idle behaviours and `H` the history restricted to them, the
/// distinct ids among the last `min(n - 1, |H|)` entries of `H` are excluded.
/// The window is taken over raw entries, so a repeated id inside it excludes
/// fewer than `k` distinct behaviours. Never returns an empty set when
/// `idle_ids` is non-empty.
pub fn idle_candidates(idle_ids: &[BehaviourId], history: &[BehaviourId]) -> Vec<BehaviourId> {
    let n = idle_ids.len();
    if n == 0 {
        return Vec::new();
    }

    let idle_history: Vec<&str> = history
        .iter()
        .map(String::as_str)
        .filter(|id| idle_ids.iter().any(|i| i == id))
        .collect();
    if idle_history.is_empty() {
        return idle_ids.to_vec();
    }

    let k = (n - 1).min(idle_history.len());
    let excluded: HashSet<&str> = idle_history[idle_history.len() - k..]
        .iter()
        .copied()
        .collect();

    let candidates: Vec<BehaviourId> = idle_ids
        .iter()
        .filter(|id| !excluded.contains(id.as_str()))
        .cloned()
        .collect();

    if candidates.is_empty() {
        idle_ids.to_vec()
    } else {
        candidates
    }
}

// ── Manager ────────────────────────────────────────────────────

struct ActiveRun {
    summary: BehaviourSummary,
    unit: ExecutionUnit,
}

/// Owns the catalog, the active unit, the history, the pending queue, and
/// the configuration store behaviours read their settings from.
pub struct BehaviourManager {
    catalog: BehaviourCatalog,
    config: ConfigStore,
    current: Option<ActiveRun>,
    history: Vec<BehaviourId>,
    queue: PendingQueue,
    idle_cycle: IdleCycleStatus,
    terminate_timeout: Duration,
    rng: StdRng,
}

impl BehaviourManager {
    pub fn new(catalog: BehaviourCatalog, config: ConfigStore) -> Result<Self> {
        let scheduler = config.get()?.scheduler;
        Ok(Self {
            catalog,
            config,
            current: None,
            history: Vec::new(),
            queue: PendingQueue::default(),
            idle_cycle: scheduler.idle_cycle,
            terminate_timeout: Duration::from_millis(scheduler.terminate_timeout_ms),
            rng: StdRng::from_entropy(),
        })
    }

    /// Replace the random source used by idle selection.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &BehaviourCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigStore {
        &mut self.config
    }

    pub fn history(&self) -> &[BehaviourId] {
        &self.history
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub fn idle_cycle(&self) -> IdleCycleStatus {
        self.idle_cycle
    }

    pub fn set_idle_cycle(&mut self, status: IdleCycleStatus) {
        if self.idle_cycle != status {
            info!(from = %self.idle_cycle, to = %status, "idle cycle status changed");
            self.idle_cycle = status;
        }
    }

    /// Start `id`. With `force`, a running behaviour is terminated first and
    /// its cleanup finishes before the new one starts.
    pub async fn run_behaviour(&mut self, id: &str, force: bool) -> Result<BehaviourSummary> {
        self.reconcile();

        let behaviour = self
            .catalog
            .get(id)
            .cloned()
            .ok_or_else(|| MimicError::UnavailableBehaviour(id.to_string()))?;

        if let Some(active) = &self.current {
            if !force {
                return Err(MimicError::Busy {
                    current: active.summary.id.clone(),
                });
            }
            info!(current = %active.summary.id, next = %id, "replacing running behaviour");
            self.terminate_behaviour().await;
        }

        let summary = BehaviourSummary {
            id: id.to_string(),
            display_name: behaviour.display_name().to_string(),
            category: behaviour.category(),
        };
        let settings = self.config.behaviour_settings(id);
        let mut unit = ExecutionUnit::new(behaviour, CleanupStack::new(), settings);
        unit.start();
        self.history.push(id.to_string());

        info!(
            behaviour = %id,
            run_id = %unit.run_id(),
            category = %summary.category,
            forced = force,
            "behaviour started"
        );
        self.current = Some(ActiveRun {
            summary: summary.clone(),
            unit,
        });
        Ok(summary)
    }

    /// Start the next behaviour: the best pending request, else an idle pick.
    /// Returns `None` when there is nothing eligible to run.
    pub async fn run_next_behaviour(&mut self) -> Result<Option<BehaviourSummary>> {
        self.reconcile();
        if let Some(active) = &self.current {
            return Err(MimicError::Busy {
                current: active.summary.id.clone(),
            });
        }

        if let Some((priority, id)) = self.queue.pop() {
            debug!(behaviour = %id, priority, "running queued behaviour");
            return self.run_behaviour(&id, false).await.map(Some);
        }

        match self.evaluate_next_idle_behaviour() {
            Some(id) => self.run_behaviour(&id, false).await.map(Some),
            None => {
                debug!("no idle behaviours available");
                Ok(None)
            }
        }
    }

    /// Stop the active behaviour and wait (bounded) for its cleanup. On
    /// timeout the slot is freed anyway and cleanup runs from here.
    pub async fn terminate_behaviour(&mut self) -> Option<BehaviourSummary> {
        let Some(mut active) = self.current.take() else {
            info!("no behaviour running, nothing to terminate");
            return None;
        };

        active.unit.stop();
        if !active.unit.join(self.terminate_timeout).await {
            let err = MimicError::TerminationTimeout {
                behaviour: active.summary.id.clone(),
                timeout_ms: self.terminate_timeout.as_millis() as u64,
            };
            warn!(behaviour = %active.summary.id, error = %err, "freeing slot and running cleanup here");
            active.unit.force_cleanup().await;
        }

        info!(behaviour = %active.summary.id, run_id = %active.unit.run_id(), "behaviour terminated");
        Some(active.summary)
    }

    pub fn is_behaviour_running(&mut self) -> bool {
        self.reconcile();
        self.current.is_some()
    }

    /// Pick an available Idle behaviour, avoiding recent repeats.
    pub fn evaluate_next_idle_behaviour(&mut self) -> Option<BehaviourId> {
        let idle = self.catalog.ids_in(BehaviourCategory::Idle);
        let candidates = idle_candidates(&idle, &self.history);
        candidates.choose(&mut self.rng).cloned()
    }

    /// Queue `id` for a later tick.
    pub fn queue_behaviour(&mut self, id: &str, priority: u32) -> Result<()> {
        if self.catalog.get(id).is_none() {
            return Err(MimicError::UnavailableBehaviour(id.to_string()));
        }
        self.queue.push(id, priority);
        debug!(behaviour = %id, priority, queued = self.queue.len(), "behaviour queued");
        Ok(())
    }

    pub fn get_current_status(&mut self) -> ManagerStatus {
        self.reconcile();
        ManagerStatus {
            running: self.current.is_some(),
            current_behaviour: self.current.as_ref().map(|a| a.summary.clone()),
            idle_cycle_status: self.idle_cycle,
            runs_started: self.history.len(),
            queued: self.queue.len(),
        }
    }

    /// Stop the idle cycle and terminate whatever is running.
    pub async fn shutdown(&mut self) {
        self.set_idle_cycle(IdleCycleStatus::Stopped);
        self.terminate_behaviour().await;
    }

    /// Release the slot if the active unit has finished on its own.
    fn reconcile(&mut self) {
        let finished = matches!(&self.current, Some(active) if !active.unit.is_alive());
        if !finished {
            return;
        }
        if let Some(active) = self.current.take() {
            match active.unit.outcome() {
                Some(RunOutcome::Faulted(reason)) => {
                    debug!(behaviour = %active.summary.id, reason = %reason, "slot released after fault");
                }
                outcome => {
                    debug!(behaviour = %active.summary.id, ?outcome, "slot released");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<BehaviourId> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_queue_orders_by_priority_then_arrival() {
        let mut q = PendingQueue::default();
        q.push("late", 5);
        q.push("urgent", 1);
        q.push("first_normal", 3);
        q.push("second_normal", 3);

        assert_eq!(q.peek(), Some((1, "urgent")));
        let order: Vec<String> = std::iter::from_fn(|| q.pop().map(|(_, id)| id)).collect();
        assert_eq!(order, ids(&["urgent", "first_normal", "second_normal", "late"]));
        assert!(q.is_empty());
    }

    #[test]
    fn test_idle_candidates_empty_history() {
        let s = ids(&["A", "B", "C"]);
        assert_eq!(idle_candidates(&s, &[]), s);
    }

    #[test]
    fn test_idle_candidates_after_one_run() {
        let s = ids(&["A", "B", "C"]);
        assert_eq!(idle_candidates(&s, &ids(&["A"])), ids(&["B", "C"]));
    }

    #[test]
    fn test_idle_candidates_after_two_runs() {
        let s = ids(&["A", "B", "C"]);
        assert_eq!(idle_candidates(&s, &ids(&["A", "B"])), ids(&["C"]));
    }

    #[test]
    fn test_idle_candidates_single_behaviour() {
        let s = ids(&["A"]);
        assert_eq!(idle_candidates(&s, &ids(&["A", "A", "A"])), s);
    }

    #[test]
    fn test_idle_candidates_ignores_non_idle_history() {
        let s = ids(&["A", "B", "C"]);
        let history = ids(&["A", "attack_1", "attack_2"]);
        assert_eq!(idle_candidates(&s, &history), ids(&["B", "C"]));
    }

    #[test]
    fn test_idle_candidates_raw_window_with_repeats() {
        // k = 2 over [.., B, B]: only B is excluded, so A is eligible again.
        let s = ids(&["A", "B", "C"]);
        let history = ids(&["A", "B", "B"]);
        assert_eq!(idle_candidates(&s, &history), ids(&["A", "C"]));
    }

    #[test]
    fn test_idle_candidates_no_idle_behaviours() {
        assert!(idle_candidates(&[], &ids(&["A"])).is_empty());
    }
}
