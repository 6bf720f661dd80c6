//! Last-known-applied cache
//!
//! What the reconciler believes the gateway holds, per id. Sharded (DashMap)
//! so workers on different ids never contend; a given id is only written by
//! the worker holding its apply slot.
//!
//! An id is *unsettled* while a write for it has been sent but its outcome is
//! unknown (transient error or timeout). The gateway may or may not hold the
//! rule, so an unsettled id is never treated as absent or converged.

use crate::admin::GatewayRules;
use common::{GlobalRule, PluginMap};
use dashmap::{DashMap, DashSet};

#[derive(Debug, Default)]
pub struct AppliedCache {
    rules: DashMap<String, PluginMap>,
    unsettled: DashSet<String>,
}

impl AppliedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole cache with a gateway listing
    pub fn seed(&self, rules: GatewayRules) {
        self.rules.clear();
        self.unsettled.clear();
        for (id, plugins) in rules {
            self.rules.insert(id, plugins);
        }
    }

    pub fn get(&self, id: &str) -> Option<PluginMap> {
        self.rules.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rules.contains_key(id)
    }

    pub fn set(&self, id: &str, plugins: PluginMap) {
        self.rules.insert(id.to_string(), plugins);
    }

    pub fn remove(&self, id: &str) {
        self.rules.remove(id);
    }

    /// Every cached rule, ordered by id
    pub fn snapshot(&self) -> Vec<GlobalRule> {
        let mut rules: Vec<GlobalRule> = self
            .rules
            .iter()
            .map(|entry| GlobalRule {
                id: entry.key().clone(),
                plugins: entry.value().clone(),
            })
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    /// Mark a write for `id` as sent, outcome unknown
    pub fn unsettle(&self, id: &str) {
        self.unsettled.insert(id.to_string());
    }

    /// The gateway confirmed or definitively rejected the last write
    pub fn settle(&self, id: &str) {
        self.unsettled.remove(id);
    }

    pub fn is_unsettled(&self, id: &str) -> bool {
        self.unsettled.contains(id)
    }
}
