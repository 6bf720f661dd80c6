//! Events in, tasks out

use common::{CanonicalRuleModel, Generation, PluginMap, ResourceRef};
use serde_json::Value;
use std::time::Instant;

/// Kind of change observed for a declarative resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Create,
    Update,
    Delete,
}

/// One observed change of an ApisixGlobalRule or ApisixClusterConfig
///
/// `spec` is the raw, version-tagged spec object (ignored for deletions).
/// Delivery is at least once; the engine absorbs duplicates.
#[derive(Debug, Clone)]
pub struct ResourceEvent {
    pub resource: ResourceRef,
    pub kind: EventKind,
    pub spec: Value,
}

impl ResourceEvent {
    pub fn create(resource: ResourceRef, spec: Value) -> Self {
        Self {
            resource,
            kind: EventKind::Create,
            spec,
        }
    }

    pub fn update(resource: ResourceRef, spec: Value) -> Self {
        Self {
            resource,
            kind: EventKind::Update,
            spec,
        }
    }

    pub fn delete(resource: ResourceRef) -> Self {
        Self {
            resource,
            kind: EventKind::Delete,
            spec: Value::Null,
        }
    }
}

/// Target state of one task
#[derive(Debug, Clone, PartialEq)]
pub enum Desired {
    Apply(CanonicalRuleModel),
    Delete,
}

/// What a drift resync saw on the gateway for the task's id
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    Present(PluginMap),
    Missing,
}

/// Unit of work for the reconciler
#[derive(Debug, Clone)]
pub struct ReconcileTask {
    pub id: String,
    pub generation: Generation,
    pub desired: Desired,
    /// Overwrites the applied cache before diffing when set
    pub observed: Option<Observed>,
    pub attempt: u32,
    pub not_before: Option<Instant>,
}

impl ReconcileTask {
    pub fn apply(model: CanonicalRuleModel, generation: Generation) -> Self {
        Self {
            id: model.id.clone(),
            generation,
            desired: Desired::Apply(model),
            observed: None,
            attempt: 0,
            not_before: None,
        }
    }

    pub fn delete(id: impl Into<String>, generation: Generation) -> Self {
        Self {
            id: id.into(),
            generation,
            desired: Desired::Delete,
            observed: None,
            attempt: 0,
            not_before: None,
        }
    }

    pub fn with_observation(mut self, observed: Observed) -> Self {
        self.observed = Some(observed);
        self
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.desired, Desired::Delete)
    }

    /// Operation label for logs and metrics
    pub fn operation(&self) -> &'static str {
        match self.desired {
            Desired::Apply(_) => "upsert",
            Desired::Delete => "delete",
        }
    }
}
