//! Desired-state store
//!
//! Last-known-desired model per gateway id. Generations come from one
//! store-wide counter, so they increase per id without any per-id state
//! outliving the entry. Deletions leave a tombstone until the reconciler
//! confirms them.

use super::task::ReconcileTask;
use crate::lock::{safe_read, safe_write};
use common::{CanonicalRuleModel, Generation, ResourceRef};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone)]
struct Entry {
    /// None for gateway-only ids scheduled for pruning
    resource: Option<ResourceRef>,
    /// None marks a tombstone
    model: Option<CanonicalRuleModel>,
    generation: Generation,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Last generation handed out, across all ids
    last_generation: Generation,
}

impl Inner {
    fn next_generation(&mut self) -> Generation {
        self.last_generation += 1;
        self.last_generation
    }
}

/// Id-keyed index of desired models
#[derive(Default)]
pub struct DesiredStateStore {
    inner: RwLock<Inner>,
}

impl DesiredStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a translated model
    ///
    /// Returns None when the live model for the id is already identical.
    pub fn upsert(
        &self,
        resource: &ResourceRef,
        model: CanonicalRuleModel,
    ) -> Option<ReconcileTask> {
        let mut inner = safe_write(&self.inner);
        let id = model.id.clone();

        if let Some(entry) = inner.entries.get(&id) {
            if entry.model.as_ref() == Some(&model) {
                debug!(id = %id, generation = entry.generation, "desired model unchanged");
                return None;
            }
        }

        let generation = inner.next_generation();
        inner.entries.insert(
            id,
            Entry {
                resource: Some(resource.clone()),
                model: Some(model.clone()),
                generation,
            },
        );

        Some(ReconcileTask::apply(model, generation))
    }

    /// Tombstone the resource's id and produce its deletion task
    pub fn remove(&self, resource: &ResourceRef) -> ReconcileTask {
        self.tombstone(resource.id(), Some(resource.clone()))
    }

    /// Tombstone an id whatever its desired state
    #[cfg(test)]
    pub(crate) fn remove_id(&self, id: &str) -> ReconcileTask {
        self.tombstone(id.to_string(), None)
    }

    /// Tombstone `id` unless it has a live desired model
    ///
    /// Check and tombstone happen under one lock, so a resource created
    /// concurrently is never overwritten.
    pub fn tombstone_if_unowned(&self, id: &str) -> Option<ReconcileTask> {
        let mut inner = safe_write(&self.inner);
        if inner.entries.get(id).is_some_and(|entry| entry.model.is_some()) {
            return None;
        }
        Some(Self::tombstone_locked(&mut inner, id.to_string(), None))
    }

    /// True if the id's last desired state is a deletion not yet confirmed
    pub fn is_tombstoned(&self, id: &str) -> bool {
        safe_read(&self.inner)
            .entries
            .get(id)
            .is_some_and(|entry| entry.model.is_none())
    }

    fn tombstone(&self, id: String, resource: Option<ResourceRef>) -> ReconcileTask {
        let mut inner = safe_write(&self.inner);
        Self::tombstone_locked(&mut inner, id, resource)
    }

    fn tombstone_locked(
        inner: &mut Inner,
        id: String,
        resource: Option<ResourceRef>,
    ) -> ReconcileTask {
        let generation = inner.next_generation();

        let resource = resource.or_else(|| {
            inner
                .entries
                .get(&id)
                .and_then(|entry| entry.resource.clone())
        });
        inner.entries.insert(
            id.clone(),
            Entry {
                resource,
                model: None,
                generation,
            },
        );

        ReconcileTask::delete(id, generation)
    }

    /// Drop a tombstone once its deletion (at `generation`) is confirmed
    ///
    /// No-op if the id was re-created or deleted again in the meantime.
    pub fn forget(&self, id: &str, generation: Generation) {
        let mut inner = safe_write(&self.inner);
        let confirmed = inner
            .entries
            .get(id)
            .is_some_and(|entry| entry.model.is_none() && entry.generation == generation);
        if confirmed {
            inner.entries.remove(id);
        }
    }

    /// Re-issue the live model under a new generation
    pub fn refresh(&self, id: &str) -> Option<ReconcileTask> {
        let mut inner = safe_write(&self.inner);
        let model = inner.entries.get(id)?.model.clone()?;

        let generation = inner.next_generation();
        if let Some(entry) = inner.entries.get_mut(id) {
            entry.generation = generation;
        }
        Some(ReconcileTask::apply(model, generation))
    }

    /// Live (non-tombstoned) models, ordered by id
    pub fn snapshot(&self) -> BTreeMap<String, CanonicalRuleModel> {
        safe_read(&self.inner)
            .entries
            .iter()
            .filter_map(|(id, entry)| entry.model.clone().map(|model| (id.clone(), model)))
            .collect()
    }

    /// Resource that last produced the id (live or tombstoned)
    pub fn resource(&self, id: &str) -> Option<ResourceRef> {
        safe_read(&self.inner)
            .entries
            .get(id)
            .and_then(|entry| entry.resource.clone())
    }

    /// Generation of the current entry, if any
    pub fn generation(&self, id: &str) -> Option<Generation> {
        safe_read(&self.inner)
            .entries
            .get(id)
            .map(|entry| entry.generation)
    }

    /// Resources with a live desired model
    pub fn live_resources(&self) -> Vec<ResourceRef> {
        safe_read(&self.inner)
            .entries
            .values()
            .filter(|entry| entry.model.is_some())
            .filter_map(|entry| entry.resource.clone())
            .collect()
    }

    /// Entries held, tombstones included
    #[cfg(test)]
    pub(crate) fn entry_count(&self) -> usize {
        safe_read(&self.inner).entries.len()
    }
}
