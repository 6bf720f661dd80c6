//! Per-id apply slots and the worker pool
//!
//! Every id with outstanding work owns a slot:
//! - `queued`: the next task to run (a newer submission replaces it)
//! - `in_flight`: a worker is executing a task for the id
//! - `high_water`: highest generation ever accepted for the id
//! - `scheduled`: the id sits in the ready channel
//!
//! Workers pull ids from the ready channel, claim the queued task, run it
//! through the [`Reconciler`] and hand the result back. An id is only put on
//! the ready channel when it is not in flight, so at most one apply per id
//! runs at any time. A slot is dropped once its id's deletion is confirmed.
//!
//! Lock order: `slots` before the status board and the desired-state store.
//! No lock is held across an `.await`.

use super::desired_state::DesiredStateStore;
use super::reconciler::{ApplyOutcome, Reconciler};
use super::retry::RetryPolicy;
use super::status::{ErrorKind, RuleState, StatusBoard};
use super::task::ReconcileTask;
use crate::apis::metrics::{record_consistency_violation, set_pending_tasks};
use crate::error::{AdminError, ConsistencyViolation};
use crate::lock::safe_lock;
use common::Generation;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct Slot {
    queued: Option<ReconcileTask>,
    in_flight: bool,
    high_water: Generation,
    scheduled: bool,
}

impl Slot {
    fn is_busy(&self) -> bool {
        self.in_flight || self.queued.is_some()
    }

    /// Queued task that may run now
    fn runnable(&self, now: Instant) -> bool {
        self.queued
            .as_ref()
            .is_some_and(|task| task.not_before.map_or(true, |at| at <= now))
    }
}

pub struct Scheduler {
    slots: Mutex<HashMap<String, Slot>>,
    ready_tx: mpsc::UnboundedSender<String>,
    ready_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
    pending_tx: watch::Sender<usize>,
    store: Arc<DesiredStateStore>,
    status: Arc<StatusBoard>,
    policy: RetryPolicy,
}

impl Scheduler {
    pub fn new(
        store: Arc<DesiredStateStore>,
        status: Arc<StatusBoard>,
        policy: RetryPolicy,
    ) -> Arc<Self> {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (pending_tx, _) = watch::channel(0);

        Arc::new(Self {
            slots: Mutex::new(HashMap::new()),
            ready_tx,
            ready_rx: Arc::new(tokio::sync::Mutex::new(ready_rx)),
            pending_tx,
            store,
            status,
            policy,
        })
    }

    /// Spawn `count` workers executing tasks through `reconciler`
    pub fn spawn_workers(
        self: &Arc<Self>,
        count: usize,
        reconciler: Arc<Reconciler>,
    ) -> Vec<JoinHandle<()>> {
        (0..count.max(1))
            .map(|index| {
                let scheduler = self.clone();
                let reconciler = reconciler.clone();
                tokio::spawn(async move { scheduler.worker_loop(index, reconciler).await })
            })
            .collect()
    }

    /// Accept a task for its id
    ///
    /// A task the desired-state store has already moved past (a newer
    /// generation, or a confirmed deletion) is dropped. A task carrying the
    /// id's current high-water generation is a duplicate and is dropped
    /// silently. Any other lower generation is a consistency violation.
    pub fn submit(self: &Arc<Self>, task: ReconcileTask) -> Result<(), ConsistencyViolation> {
        let mut slots = safe_lock(&self.slots);

        let current = self.store.generation(&task.id);
        if current.map_or(true, |current| current > task.generation) {
            debug!(
                id = %task.id,
                generation = task.generation,
                current = ?current,
                "task superseded before submission"
            );
            return Ok(());
        }

        let slot = slots.entry(task.id.clone()).or_default();

        if task.generation < slot.high_water {
            let violation = ConsistencyViolation {
                id: task.id.clone(),
                got: task.generation,
                high_water: slot.high_water,
            };
            error!(
                id = %task.id,
                generation = task.generation,
                high_water = slot.high_water,
                "❌ dropping stale reconcile task"
            );
            record_consistency_violation();
            let resource = self.store.resource(&task.id);
            self.status.record_error(
                &task.id,
                resource.as_ref(),
                ErrorKind::Consistency,
                violation.to_string(),
            );
            return Err(violation);
        }
        if task.generation == slot.high_water {
            debug!(id = %task.id, generation = task.generation, "duplicate task dropped");
            return Ok(());
        }

        slot.high_water = task.generation;
        let id = task.id.clone();
        let deletion = task.is_delete();
        if let Some(replaced) = slot.queued.replace(task) {
            debug!(
                id = %id,
                replaced = replaced.generation,
                generation = slot.high_water,
                "queued task superseded"
            );
        }

        self.status.set_state(&id, RuleState::Pending { deletion });
        self.status.clear_error(&id, ErrorKind::Apply);

        if !slot.in_flight && !slot.scheduled {
            slot.scheduled = true;
            self.send_ready(&id);
        }

        self.publish_pending(&slots);
        Ok(())
    }

    /// Slots currently held, idle ones included
    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        safe_lock(&self.slots).len()
    }

    /// True if the id has a queued or in-flight task
    pub fn is_busy(&self, id: &str) -> bool {
        safe_lock(&self.slots).get(id).is_some_and(Slot::is_busy)
    }

    pub fn pending(&self) -> usize {
        *self.pending_tx.borrow()
    }

    /// Wait until no id has a queued or in-flight task; false on timeout
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.pending_tx.subscribe();
        let idle = tokio::time::timeout(timeout, rx.wait_for(|pending| *pending == 0)).await;
        matches!(idle, Ok(Ok(_)))
    }

    async fn worker_loop(self: Arc<Self>, index: usize, reconciler: Arc<Reconciler>) {
        debug!(worker = index, "reconcile worker started");

        loop {
            let next = {
                let mut rx = self.ready_rx.lock().await;
                rx.recv().await
            };
            let Some(id) = next else {
                break;
            };

            let Some(task) = self.claim(&id) else {
                continue;
            };

            let result = AssertUnwindSafe(reconciler.reconcile(&task))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(AdminError::Permanent("reconcile panicked".to_string()))
                });

            self.complete(task, result);
        }

        debug!(worker = index, "reconcile worker stopped");
    }

    /// Take the queued task for `id` and mark the slot in flight
    fn claim(&self, id: &str) -> Option<ReconcileTask> {
        let mut slots = safe_lock(&self.slots);
        let slot = slots.get_mut(id)?;
        slot.scheduled = false;

        // Spurious wake, or a retry whose timer has not fired yet
        if slot.in_flight || !slot.runnable(Instant::now()) {
            return None;
        }

        let task = slot.queued.take()?;
        slot.in_flight = true;

        let state = if task.is_delete() {
            RuleState::Deleting
        } else {
            RuleState::Applying
        };
        self.status.set_state(id, state);
        Some(task)
    }

    fn complete(self: &Arc<Self>, task: ReconcileTask, result: Result<ApplyOutcome, AdminError>) {
        let mut slots = safe_lock(&self.slots);
        let Some(slot) = slots.get_mut(&task.id) else {
            return;
        };
        slot.in_flight = false;
        let superseded = slot.queued.is_some();
        let id = task.id.clone();
        let deletion = task.is_delete();

        match result {
            Ok(outcome) => {
                debug!(id = %id, generation = task.generation, ?outcome, "task complete");
                if deletion {
                    self.store.forget(&id, task.generation);
                }
                if !superseded {
                    let state = if deletion {
                        RuleState::Absent
                    } else {
                        RuleState::Converged
                    };
                    self.status.set_state(&id, state);
                    self.status.clear_error(&id, ErrorKind::Apply);
                    self.status.clear_error(&id, ErrorKind::Consistency);
                }
            }
            Err(e) if superseded => {
                debug!(id = %id, generation = task.generation, error = %e, "failed task superseded by newer one");
            }
            Err(e) if e.is_transient() && !self.policy.exhausted(task.attempt + 1) => {
                let attempt = task.attempt + 1;
                let delay = self.policy.backoff(attempt);
                warn!(
                    id = %id,
                    generation = task.generation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "⚠️ transient apply failure, retrying"
                );

                slot.queued = Some(ReconcileTask {
                    attempt,
                    not_before: Some(Instant::now() + delay),
                    // Drift observations are only valid for the first attempt
                    observed: None,
                    ..task
                });
                self.status.set_state(&id, RuleState::Pending { deletion });
                self.schedule_wake(id.clone(), delay);
            }
            Err(e) => {
                error!(
                    id = %id,
                    generation = task.generation,
                    attempt = task.attempt + 1,
                    error = %e,
                    "❌ apply failed"
                );
                let resource = self.store.resource(&id);
                self.status
                    .record_error(&id, resource.as_ref(), ErrorKind::Apply, e.to_string());
                self.status.set_state(&id, RuleState::Failed(e.to_string()));
            }
        }

        let settled = slots
            .get(&id)
            .is_some_and(|slot| !slot.is_busy() && !slot.scheduled);
        if settled && deletion && self.store.generation(&id).is_none() {
            slots.remove(&id);
        } else if let Some(slot) = slots.get_mut(&id) {
            if !slot.scheduled && slot.runnable(Instant::now()) {
                slot.scheduled = true;
                self.send_ready(&id);
            }
        }

        self.publish_pending(&slots);
    }

    /// Re-offer `id` to the workers once its retry delay has elapsed
    fn schedule_wake(self: &Arc<Self>, id: String, delay: Duration) {
        let scheduler = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.wake(&id);
            }
        });
    }

    fn wake(&self, id: &str) {
        let mut slots = safe_lock(&self.slots);
        if let Some(slot) = slots.get_mut(id) {
            if !slot.in_flight && !slot.scheduled && slot.runnable(Instant::now()) {
                slot.scheduled = true;
                self.send_ready(id);
            }
        }
    }

    fn send_ready(&self, id: &str) {
        if self.ready_tx.send(id.to_string()).is_err() {
            warn!(id, "ready channel closed, task will not run");
        }
    }

    fn publish_pending(&self, slots: &HashMap<String, Slot>) {
        let pending = slots.values().filter(|slot| slot.is_busy()).count();
        set_pending_tasks(pending);
        let previous = self.pending_tx.send_replace(pending);
        if previous != pending && pending == 0 {
            info!("all global rules reconciled");
        }
    }
}
