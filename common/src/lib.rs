//! Tether Common Types
//!
//! Identifiers and the canonical global-rule model shared by the translator,
//! the reconciler and the admin-API clients. Everything here is pure: no I/O,
//! no clocks, no randomness.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// API group of the declarative resources
pub const API_GROUP: &str = "apisix.apache.org";

/// Number of SHA-256 bytes kept in a derived identifier (32 hex chars)
pub const ID_BYTES: usize = 16;

/// Plugin name -> opaque plugin config object
///
/// Ordered so that serialization, diffing and listing are deterministic.
pub type PluginMap = BTreeMap<String, serde_json::Value>;

/// Monotonically increasing per-id counter used to discard stale tasks
pub type Generation = u64;

// =============================================================================
// Schema versions and kinds
// =============================================================================

/// Schema versions served concurrently for the declarative resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaVersion {
    V2beta3,
    V2,
}

impl SchemaVersion {
    pub const ALL: [SchemaVersion; 2] = [SchemaVersion::V2beta3, SchemaVersion::V2];

    /// Parse `apisix.apache.org/v2` style api versions (or the bare `v2`)
    ///
    /// Returns None for versions outside the supported set, including
    /// versions of a different API group.
    pub fn parse(api_version: &str) -> Option<Self> {
        let version = match api_version.split_once('/') {
            Some((group, version)) if group == API_GROUP => version,
            Some(_) => return None,
            None => api_version,
        };

        match version {
            "v2beta3" => Some(SchemaVersion::V2beta3),
            "v2" => Some(SchemaVersion::V2),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            SchemaVersion::V2beta3 => "v2beta3",
            SchemaVersion::V2 => "v2",
        }
    }

    /// Fully qualified api version, e.g. `apisix.apache.org/v2`
    pub fn api_version(&self) -> String {
        format!("{}/{}", API_GROUP, self.as_str())
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of declarative resources that translate into global rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Namespaced list of plugins applied to all traffic
    GlobalRule,
    /// Cluster-scoped monitoring configuration
    ClusterConfig,
}

impl ResourceKind {
    pub const fn kind_name(&self) -> &'static str {
        match self {
            ResourceKind::GlobalRule => "ApisixGlobalRule",
            ResourceKind::ClusterConfig => "ApisixClusterConfig",
        }
    }

    pub const fn plural(&self) -> &'static str {
        match self {
            ResourceKind::GlobalRule => "apisixglobalrules",
            ResourceKind::ClusterConfig => "apisixclusterconfigs",
        }
    }

    pub const fn is_namespaced(&self) -> bool {
        matches!(self, ResourceKind::GlobalRule)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_name())
    }
}

// =============================================================================
// ResourceRef + identifier derivation
// =============================================================================

/// Identity of an observed declarative resource
///
/// `namespace` is empty for cluster-scoped kinds. `api_version` is kept as
/// observed; it is validated by translation, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
    pub api_version: String,
}

impl ResourceRef {
    pub fn new(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
            api_version: api_version.into(),
        }
    }

    /// Shorthand for a namespaced ApisixGlobalRule
    pub fn global_rule(namespace: &str, name: &str, version: SchemaVersion) -> Self {
        Self::new(
            ResourceKind::GlobalRule,
            namespace,
            name,
            version.api_version(),
        )
    }

    /// Shorthand for a cluster-scoped ApisixClusterConfig
    pub fn cluster_config(name: &str, version: SchemaVersion) -> Self {
        Self::new(ResourceKind::ClusterConfig, "", name, version.api_version())
    }

    pub fn schema_version(&self) -> Option<SchemaVersion> {
        SchemaVersion::parse(&self.api_version)
    }

    /// Gateway identifier for this resource
    #[inline]
    pub fn id(&self) -> String {
        derive_id(&self.namespace, &self.name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.kind, self.name)
        } else {
            write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// Derive the gateway object id for a resource
///
/// Key is `name` for cluster-scoped resources and `namespace_name` otherwise.
/// Kubernetes object names never contain `_`, so the key is unambiguous.
/// The id is the hex encoding of the first [`ID_BYTES`] of SHA-256(key).
pub fn derive_id(namespace: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    if !namespace.is_empty() {
        hasher.update(namespace.as_bytes());
        hasher.update(b"_");
    }
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();

    digest
        .iter()
        .take(ID_BYTES)
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

// =============================================================================
// Canonical model
// =============================================================================

/// Version-independent desired plugin configuration of one resource
///
/// Only enabled plugins are present; disabling a plugin removes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRuleModel {
    pub id: String,
    #[serde(default)]
    pub plugins: PluginMap,
}

impl CanonicalRuleModel {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            plugins: PluginMap::new(),
        }
    }

    pub fn with_plugin(mut self, name: impl Into<String>, config: serde_json::Value) -> Self {
        self.plugins.insert(name.into(), config);
        self
    }

    pub fn into_global_rule(self) -> GlobalRule {
        GlobalRule {
            id: self.id,
            plugins: self.plugins,
        }
    }
}

/// A gateway-side global rule as exchanged with the admin API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalRule {
    pub id: String,
    #[serde(default)]
    pub plugins: PluginMap,
}

// =============================================================================
// PluginDiff
// =============================================================================

/// Structural difference between a desired and an applied plugin set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl PluginDiff {
    /// Compute what must change to turn `applied` into `desired`
    pub fn between(desired: &PluginMap, applied: &PluginMap) -> Self {
        let mut diff = PluginDiff::default();

        for (name, config) in desired {
            match applied.get(name) {
                None => diff.added.push(name.clone()),
                Some(current) if current != config => diff.changed.push(name.clone()),
                Some(_) => {}
            }
        }

        diff.removed = applied
            .keys()
            .filter(|name| !desired.contains_key(*name))
            .cloned()
            .collect();

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

impl fmt::Display for PluginDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("no changes");
        }
        let parts: Vec<String> = self
            .added
            .iter()
            .map(|name| format!("+{}", name))
            .chain(self.removed.iter().map(|name| format!("-{}", name)))
            .chain(self.changed.iter().map(|name| format!("~{}", name)))
            .collect();
        f.write_str(&parts.join(" "))
    }
}
