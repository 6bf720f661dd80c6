//! Per-id rule state and the reconcile error registry
//!
//! State transitions:
//! ```text
//! Absent -> Pending -> Applying -> Converged
//!                 ^        |
//!                 +--------+ (transient failure, retry scheduled)
//!                          |
//!                          +--> Failed (permanent / retries exhausted)
//! Converged -> Pending{deletion} -> Deleting -> Absent
//! ```

use crate::lock::safe_read;
use crate::lock::safe_write;
use chrono::{DateTime, Utc};
use common::ResourceRef;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::RwLock;

/// Lifecycle state of one gateway id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum RuleState {
    Absent,
    Pending { deletion: bool },
    Applying,
    Converged,
    Failed(String),
    Deleting,
}

impl fmt::Display for RuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleState::Absent => f.write_str("Absent"),
            RuleState::Pending { deletion: false } => f.write_str("Pending"),
            RuleState::Pending { deletion: true } => f.write_str("Pending(deletion)"),
            RuleState::Applying => f.write_str("Applying"),
            RuleState::Converged => f.write_str("Converged"),
            RuleState::Failed(reason) => write!(f, "Failed({})", reason),
            RuleState::Deleting => f.write_str("Deleting"),
        }
    }
}

/// Error category of a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Translation,
    Apply,
    Consistency,
}

/// One entry of the reported error registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileError {
    pub id: String,
    /// `Kind namespace/name`, empty for gateway-only ids
    pub resource: String,
    pub kind: ErrorKind,
    pub reason: String,
    pub since: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    states: HashMap<String, RuleState>,
    errors: BTreeMap<(String, ErrorKind), ReconcileError>,
}

/// Rule states and reconcile errors, queryable by the Reported API
#[derive(Default)]
pub struct StatusBoard {
    inner: RwLock<Inner>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: &str) -> RuleState {
        safe_read(&self.inner)
            .states
            .get(id)
            .cloned()
            .unwrap_or(RuleState::Absent)
    }

    pub fn set_state(&self, id: &str, state: RuleState) {
        let mut inner = safe_write(&self.inner);
        if state == RuleState::Absent {
            inner.states.remove(id);
        } else {
            inner.states.insert(id.to_string(), state);
        }
    }

    /// Record (or replace) the error of `kind` for `id`
    pub fn record_error(
        &self,
        id: &str,
        resource: Option<&ResourceRef>,
        kind: ErrorKind,
        reason: impl Into<String>,
    ) {
        let entry = ReconcileError {
            id: id.to_string(),
            resource: resource.map(ToString::to_string).unwrap_or_default(),
            kind,
            reason: reason.into(),
            since: Utc::now(),
        };
        safe_write(&self.inner)
            .errors
            .insert((id.to_string(), kind), entry);
    }

    pub fn clear_error(&self, id: &str, kind: ErrorKind) {
        safe_write(&self.inner)
            .errors
            .remove(&(id.to_string(), kind));
    }

    /// All recorded errors, ordered by id then kind
    pub fn errors(&self) -> Vec<ReconcileError> {
        safe_read(&self.inner).errors.values().cloned().collect()
    }
}
