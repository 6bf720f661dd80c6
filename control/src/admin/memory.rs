//! In-memory gateway
//!
//! Holds global rules in process and implements [`AdminApi`] on top of them.
//! Used as the hermetic gateway in tests and for dry runs. Supports fault
//! injection (per-id scripted failures, failures reported after the write
//! committed, permanent rejection), per-id latency
//! and records every call so tests can assert on admin traffic.

use super::{AdminApi, GatewayRules};
use crate::error::AdminError;
use crate::lock::safe_lock;
use async_trait::async_trait;
use common::PluginMap;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// One admin call as observed by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCall {
    Upsert(String),
    Delete(String),
    List,
}

impl AdminCall {
    pub fn id(&self) -> Option<&str> {
        match self {
            AdminCall::Upsert(id) | AdminCall::Delete(id) => Some(id),
            AdminCall::List => None,
        }
    }
}

#[derive(Default)]
struct Inner {
    rules: GatewayRules,
    calls: Vec<AdminCall>,
    /// Scripted failures consumed one per call, per id
    failures: HashMap<String, VecDeque<AdminError>>,
    /// Like `failures`, but the write is applied before the error is returned
    committed_failures: HashMap<String, VecDeque<AdminError>>,
    /// Ids whose every write fails with this error
    rejected: HashMap<String, AdminError>,
    list_failures: VecDeque<AdminError>,
    latency: HashMap<String, Duration>,
    in_flight: HashMap<String, usize>,
    max_in_flight: HashMap<String, usize>,
}

/// Process-local [`AdminApi`] implementation
#[derive(Default)]
pub struct InMemoryGateway {
    inner: Mutex<Inner>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with rules already present (simulates a non-empty gateway)
    pub fn with_rules(rules: GatewayRules) -> Self {
        let gateway = Self::default();
        safe_lock(&gateway.inner).rules = rules;
        gateway
    }

    // ==========================================
    // Fault injection
    // ==========================================

    /// Fail the next `times` writes for `id` with `error`
    pub fn fail_next(&self, id: &str, error: AdminError, times: usize) {
        let mut inner = safe_lock(&self.inner);
        let queue = inner.failures.entry(id.to_string()).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Apply the next `times` writes for `id`, then report `error` anyway
    /// (a proxy timing out after the gateway already stored the rule)
    pub fn fail_after_commit(&self, id: &str, error: AdminError, times: usize) {
        let mut inner = safe_lock(&self.inner);
        let queue = inner.committed_failures.entry(id.to_string()).or_default();
        queue.extend(std::iter::repeat(error).take(times));
    }

    /// Reject every write for `id` until [`InMemoryGateway::accept`] is called
    pub fn reject_always(&self, id: &str, error: AdminError) {
        safe_lock(&self.inner)
            .rejected
            .insert(id.to_string(), error);
    }

    pub fn accept(&self, id: &str) {
        let mut inner = safe_lock(&self.inner);
        inner.rejected.remove(id);
        inner.failures.remove(id);
        inner.committed_failures.remove(id);
    }

    /// Fail the next `times` list calls with `error`
    pub fn fail_list(&self, error: AdminError, times: usize) {
        safe_lock(&self.inner)
            .list_failures
            .extend(std::iter::repeat(error).take(times));
    }

    /// Delay every write for `id`
    pub fn set_latency(&self, id: &str, latency: Duration) {
        safe_lock(&self.inner)
            .latency
            .insert(id.to_string(), latency);
    }

    // ==========================================
    // Out-of-band changes (drift)
    // ==========================================

    /// Write a rule without going through the admin API
    pub fn put_external(&self, id: &str, plugins: PluginMap) {
        safe_lock(&self.inner)
            .rules
            .insert(id.to_string(), plugins);
    }

    /// Remove a rule without going through the admin API
    pub fn remove_external(&self, id: &str) {
        safe_lock(&self.inner).rules.remove(id);
    }

    // ==========================================
    // Inspection
    // ==========================================

    pub fn rules(&self) -> GatewayRules {
        safe_lock(&self.inner).rules.clone()
    }

    pub fn rule(&self, id: &str) -> Option<PluginMap> {
        safe_lock(&self.inner).rules.get(id).cloned()
    }

    pub fn calls(&self) -> Vec<AdminCall> {
        safe_lock(&self.inner).calls.clone()
    }

    /// Calls that touched `id`, in order
    pub fn calls_for(&self, id: &str) -> Vec<AdminCall> {
        safe_lock(&self.inner)
            .calls
            .iter()
            .filter(|call| call.id() == Some(id))
            .cloned()
            .collect()
    }

    pub fn upsert_count(&self, id: &str) -> usize {
        self.calls_for(id)
            .iter()
            .filter(|call| matches!(call, AdminCall::Upsert(_)))
            .count()
    }

    /// Write calls (upserts and deletes) across all ids
    pub fn write_count(&self) -> usize {
        safe_lock(&self.inner)
            .calls
            .iter()
            .filter(|call| !matches!(call, AdminCall::List))
            .count()
    }

    /// Highest number of simultaneous writes ever observed for `id`
    pub fn max_in_flight(&self, id: &str) -> usize {
        safe_lock(&self.inner)
            .max_in_flight
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn clear_calls(&self) {
        safe_lock(&self.inner).calls.clear();
    }

    /// Record the call and mark a write as in flight; returns the latency to apply
    fn begin_write(&self, call: AdminCall, id: &str) -> Duration {
        let mut inner = safe_lock(&self.inner);
        inner.calls.push(call);

        let current = {
            let count = inner.in_flight.entry(id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let max = inner.max_in_flight.entry(id.to_string()).or_insert(0);
        *max = (*max).max(current);

        inner.latency.get(id).copied().unwrap_or_default()
    }

    /// Finish a write, applying `mutate` unless a fault is injected
    fn finish_write<F>(&self, id: &str, mutate: F) -> Result<(), AdminError>
    where
        F: FnOnce(&mut GatewayRules),
    {
        let mut inner = safe_lock(&self.inner);
        if let Some(count) = inner.in_flight.get_mut(id) {
            *count = count.saturating_sub(1);
        }

        if let Some(error) = inner.rejected.get(id) {
            return Err(error.clone());
        }
        if let Some(error) = inner.failures.get_mut(id).and_then(VecDeque::pop_front) {
            return Err(error);
        }

        mutate(&mut inner.rules);
        match inner
            .committed_failures
            .get_mut(id)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AdminApi for InMemoryGateway {
    async fn upsert(&self, id: &str, plugins: &PluginMap) -> Result<(), AdminError> {
        let latency = self.begin_write(AdminCall::Upsert(id.to_string()), id);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.finish_write(id, |rules| {
            rules.insert(id.to_string(), plugins.clone());
        })
    }

    async fn delete(&self, id: &str) -> Result<(), AdminError> {
        let latency = self.begin_write(AdminCall::Delete(id.to_string()), id);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.finish_write(id, |rules| {
            rules.remove(id);
        })
    }

    async fn list(&self) -> Result<GatewayRules, AdminError> {
        let mut inner = safe_lock(&self.inner);
        inner.calls.push(AdminCall::List);
        if let Some(error) = inner.list_failures.pop_front() {
            return Err(error);
        }
        Ok(inner.rules.clone())
    }
}
