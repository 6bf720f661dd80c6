//! Global rule synchronization engine
//!
//! Event -> translate -> desired-state store -> scheduler -> reconciler ->
//! admin API. [`SyncEngine`] wires the pieces together and exposes the
//! reported API: current gateway rules, reconcile errors, per-id state and
//! convergence waiting.

pub mod applied_cache;
pub mod desired_state;
pub mod reconciler;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod task;
pub mod translator;

use crate::admin::AdminApi;
use crate::apis::metrics::record_translation_failure;
use crate::config::SyncConfig;
use crate::error::{AdminError, SyncError};
use crate::lock::safe_lock;
use applied_cache::AppliedCache;
use common::{CanonicalRuleModel, GlobalRule, ResourceRef};
use desired_state::DesiredStateStore;
use reconciler::Reconciler;
use retry::{retry_with_backoff, RetryPolicy};
use scheduler::Scheduler;
use status::{ErrorKind, ReconcileError, RuleState, StatusBoard};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use task::{EventKind, Observed, ResourceEvent};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use task::{Desired, ReconcileTask};

struct EngineInner {
    admin: Arc<dyn AdminApi>,
    store: Arc<DesiredStateStore>,
    cache: Arc<AppliedCache>,
    status: Arc<StatusBoard>,
    scheduler: Arc<Scheduler>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a running sync engine (cheap to clone)
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// List the gateway, seed the applied cache and start the worker pool
    ///
    /// The initial listing is retried with backoff; a permanent error or an
    /// exhausted budget aborts startup.
    pub async fn start(admin: Arc<dyn AdminApi>, config: &SyncConfig) -> Result<Self, AdminError> {
        let policy = RetryPolicy::from_config(config);

        let rules = retry_with_backoff(&policy, "list global rules", AdminError::is_transient, || {
            admin.list()
        })
        .await?;
        info!(rules = rules.len(), "📋 seeded applied cache from gateway");

        let cache = Arc::new(AppliedCache::new());
        cache.seed(rules);

        let store = Arc::new(DesiredStateStore::new());
        let status = Arc::new(StatusBoard::new());
        let scheduler = Scheduler::new(store.clone(), status.clone(), policy);
        let reconciler = Arc::new(Reconciler::new(
            admin.clone(),
            cache.clone(),
            config.apply_timeout(),
        ));
        let workers = scheduler.spawn_workers(config.workers, reconciler);
        info!(workers = workers.len(), "🚀 sync engine started");

        Ok(Self {
            inner: Arc::new(EngineInner {
                admin,
                store,
                cache,
                status,
                scheduler,
                workers: Mutex::new(workers),
            }),
        })
    }

    /// Feed one resource event into the engine
    ///
    /// Translation failures are recorded against the resource's id and leave
    /// desired and gateway state untouched.
    pub fn handle_event(&self, event: ResourceEvent) -> Result<(), SyncError> {
        let inner = &self.inner;
        let resource = event.resource;
        let id = resource.id();

        match event.kind {
            EventKind::Create | EventKind::Update => {
                let model = match translator::translate(&resource, &event.spec) {
                    Ok(model) => model,
                    Err(e) => {
                        warn!(id = %id, resource = %resource, error = %e, "❌ rejected resource");
                        record_translation_failure(resource.kind.kind_name());
                        inner
                            .status
                            .record_error(&id, Some(&resource), ErrorKind::Translation, e.to_string());
                        return Err(e.into());
                    }
                };
                inner.status.clear_error(&id, ErrorKind::Translation);

                match inner.store.upsert(&resource, model) {
                    Some(task) => {
                        debug!(id = %id, resource = %resource, generation = task.generation, "desired model changed");
                        inner.scheduler.submit(task)?;
                    }
                    None => debug!(id = %id, resource = %resource, "event carried no change"),
                }
            }
            EventKind::Delete => {
                inner.status.clear_error(&id, ErrorKind::Translation);
                let task = inner.store.remove(&resource);
                debug!(id = %id, resource = %resource, generation = task.generation, "resource deleted");
                inner.scheduler.submit(task)?;
            }
        }

        Ok(())
    }

    /// Compare the gateway with desired state and re-apply drifted rules
    ///
    /// Live ids that are busy or Failed are left alone. Gateway rules whose
    /// deletion is still unconfirmed, or whose last write had an unknown
    /// outcome with no live model behind it, are deleted again. Returns the
    /// number of ids scheduled for repair.
    pub async fn resync(&self) -> Result<usize, AdminError> {
        let inner = &self.inner;
        let gateway = inner.admin.list().await?;
        let mut repaired = 0;

        let desired = inner.store.snapshot();
        for (id, model) in &desired {
            if inner.scheduler.is_busy(id)
                || matches!(inner.status.state(id), RuleState::Failed(_))
            {
                continue;
            }

            let observed = match gateway.get(id) {
                Some(plugins) if *plugins == model.plugins => continue,
                Some(plugins) => Observed::Present(plugins.clone()),
                None => Observed::Missing,
            };

            if let Some(task) = inner.store.refresh(id) {
                warn!(id = %id, generation = task.generation, "🔁 drift detected, re-applying");
                if inner.scheduler.submit(task.with_observation(observed)).is_ok() {
                    repaired += 1;
                }
            }
        }

        for (id, plugins) in gateway {
            if desired.contains_key(&id)
                || inner.scheduler.is_busy(&id)
                || !(inner.store.is_tombstoned(&id) || inner.cache.is_unsettled(&id))
            {
                continue;
            }

            if let Some(task) = inner.store.tombstone_if_unowned(&id) {
                warn!(id = %id, generation = task.generation, "🔁 deleted rule still on gateway, deleting again");
                if inner
                    .scheduler
                    .submit(task.with_observation(Observed::Present(plugins)))
                    .is_ok()
                {
                    repaired += 1;
                }
            }
        }

        Ok(repaired)
    }

    /// Delete gateway rules that no resource wants
    ///
    /// Meant to run once every watcher finished its initial listing.
    pub async fn prune_unowned(&self) -> Result<usize, AdminError> {
        let inner = &self.inner;
        let gateway = inner.admin.list().await?;
        let mut pruned = 0;

        for (id, plugins) in gateway {
            if inner.scheduler.is_busy(&id) {
                continue;
            }
            let Some(task) = inner.store.tombstone_if_unowned(&id) else {
                continue;
            };

            let task = task.with_observation(Observed::Present(plugins));
            info!(id = %id, generation = task.generation, "🧹 pruning unowned global rule");
            if inner.scheduler.submit(task).is_ok() {
                pruned += 1;
            }
        }

        Ok(pruned)
    }

    // ==========================================
    // Reported API
    // ==========================================

    /// Gateway rules as last applied or observed, ordered by id
    pub fn current_global_rules(&self) -> Vec<GlobalRule> {
        self.inner.cache.snapshot()
    }

    /// Outstanding errors, ordered by id
    pub fn reconcile_errors(&self) -> Vec<ReconcileError> {
        self.inner.status.errors()
    }

    pub fn rule_state(&self, id: &str) -> RuleState {
        self.inner.status.state(id)
    }

    /// Resources currently contributing a live desired model
    pub fn live_resources(&self) -> Vec<ResourceRef> {
        self.inner.store.live_resources()
    }

    /// Live desired models, ordered by id
    pub fn desired_snapshot(&self) -> BTreeMap<String, CanonicalRuleModel> {
        self.inner.store.snapshot()
    }

    /// Ids with a queued or in-flight task
    pub fn pending(&self) -> usize {
        self.inner.scheduler.pending()
    }

    /// Wait until every accepted task has converged or failed
    ///
    /// Returns false if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.inner.scheduler.wait_idle(timeout).await
    }

    /// Stop the worker pool; queued tasks are abandoned
    pub fn shutdown(&self) {
        let workers = std::mem::take(&mut *safe_lock(&self.inner.workers));
        for handle in workers {
            handle.abort();
        }
        info!("sync engine stopped");
    }
}
