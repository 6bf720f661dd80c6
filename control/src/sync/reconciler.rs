//! Reconciler
//!
//! Executes one [`ReconcileTask`]: diff the desired model against the
//! last-known-applied cache and issue at most one admin call. The caller (the
//! scheduler) guarantees that only one task per id runs at a time, so cache
//! writes for an id never race.
//!
//! A write that fails transiently may still have committed, so the id stays
//! unsettled in the cache until a later call or observation resolves it.

use super::applied_cache::AppliedCache;
use super::task::{Desired, Observed, ReconcileTask};
use crate::admin::AdminApi;
use crate::apis::metrics::record_reconciliation;
use crate::error::AdminError;
use common::PluginDiff;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What a successful reconcile did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Gateway already matched
    Noop,
    Upserted,
    Deleted,
}

impl ApplyOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Noop => "noop",
            ApplyOutcome::Upserted => "upsert",
            ApplyOutcome::Deleted => "delete",
        }
    }
}

pub struct Reconciler {
    admin: Arc<dyn AdminApi>,
    cache: Arc<AppliedCache>,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(admin: Arc<dyn AdminApi>, cache: Arc<AppliedCache>, timeout: Duration) -> Self {
        Self {
            admin,
            cache,
            timeout,
        }
    }

    pub async fn reconcile(&self, task: &ReconcileTask) -> Result<ApplyOutcome, AdminError> {
        let start = Instant::now();
        let result = self.execute(task).await;

        let (operation, label) = match &result {
            Ok(outcome) => (outcome.as_str(), "success"),
            Err(AdminError::Transient(_)) => (task.operation(), "transient"),
            Err(AdminError::Permanent(_)) => (task.operation(), "permanent"),
        };
        record_reconciliation(operation, start.elapsed().as_secs_f64(), label);

        result
    }

    async fn execute(&self, task: &ReconcileTask) -> Result<ApplyOutcome, AdminError> {
        let id = task.id.as_str();

        match &task.observed {
            Some(Observed::Present(plugins)) => {
                self.cache.set(id, plugins.clone());
                self.cache.settle(id);
            }
            Some(Observed::Missing) => {
                self.cache.remove(id);
                self.cache.settle(id);
            }
            None => {}
        }
        let unsettled = self.cache.is_unsettled(id);

        match &task.desired {
            Desired::Delete => {
                if !self.cache.contains(id) && !unsettled {
                    debug!(id, generation = task.generation, "delete: no gateway object known");
                    return Ok(ApplyOutcome::Noop);
                }

                self.write(id, self.admin.delete(id)).await?;
                self.cache.remove(id);
                info!(id, generation = task.generation, "🗑️ global rule deleted");
                Ok(ApplyOutcome::Deleted)
            }
            Desired::Apply(model) => {
                if let Some(applied) = self.cache.get(id).filter(|_| !unsettled) {
                    let diff = PluginDiff::between(&model.plugins, &applied);
                    if diff.is_empty() {
                        debug!(id, generation = task.generation, "apply: gateway already converged");
                        return Ok(ApplyOutcome::Noop);
                    }
                    debug!(id, generation = task.generation, diff = %diff, "apply: plugins differ");
                }

                self.write(id, self.admin.upsert(id, &model.plugins)).await?;
                self.cache.set(id, model.plugins.clone());
                info!(
                    id,
                    generation = task.generation,
                    plugins = model.plugins.len(),
                    "✅ global rule applied"
                );
                Ok(ApplyOutcome::Upserted)
            }
        }
    }

    /// Issue a gateway write, tracking whether its outcome is known
    async fn write<F>(&self, id: &str, call: F) -> Result<(), AdminError>
    where
        F: Future<Output = Result<(), AdminError>>,
    {
        self.cache.unsettle(id);
        let result = self.bounded(call).await;
        if !matches!(result, Err(AdminError::Transient(_))) {
            self.cache.settle(id);
        }
        result
    }

    async fn bounded<F>(&self, call: F) -> Result<(), AdminError>
    where
        F: Future<Output = Result<(), AdminError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| AdminError::Transient(format!("admin call exceeded {:?}", self.timeout)))?
    }
}
