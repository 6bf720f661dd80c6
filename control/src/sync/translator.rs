//! Model translator
//!
//! Turns a version-tagged raw spec into a [`CanonicalRuleModel`]. Dispatch is
//! a closed match over (kind, schema version); adding a version means adding a
//! match arm and a spec shape in `apis::apisix::crd`.
//!
//! Pure: no I/O, no shared state.

use crate::apis::apisix::crd::{v2, v2beta3, ApisixClusterSkywalkingConfig};
use crate::error::TranslationError;
use common::{CanonicalRuleModel, PluginMap, ResourceKind, ResourceRef, SchemaVersion};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashSet;

/// Translate one observed resource into its canonical model
pub fn translate(
    resource: &ResourceRef,
    spec: &Value,
) -> Result<CanonicalRuleModel, TranslationError> {
    let version = resource
        .schema_version()
        .ok_or_else(|| TranslationError::UnknownSchemaVersion(resource.api_version.clone()))?;

    let plugins = match (resource.kind, version) {
        (ResourceKind::GlobalRule, SchemaVersion::V2) => {
            let spec: v2::ApisixGlobalRuleSpec = decode(resource.kind, spec)?;
            global_rule_plugins(
                spec.plugins
                    .into_iter()
                    .map(|p| (p.name, p.enable, p.config)),
            )?
        }
        (ResourceKind::GlobalRule, SchemaVersion::V2beta3) => {
            let spec: v2beta3::ApisixGlobalRuleSpec = decode(resource.kind, spec)?;
            global_rule_plugins(
                spec.plugins
                    .into_iter()
                    .map(|(name, entry)| (name, entry.enable, entry.config)),
            )?
        }
        (ResourceKind::ClusterConfig, SchemaVersion::V2) => {
            let spec: v2::ApisixClusterConfigSpec = decode(resource.kind, spec)?;
            let monitoring = spec.monitoring.unwrap_or_default();
            let prometheus = monitoring
                .prometheus
                .filter(|p| p.enable)
                .map(|p| p.prefer_name);
            monitoring_plugins(prometheus, monitoring.skywalking)?
        }
        (ResourceKind::ClusterConfig, SchemaVersion::V2beta3) => {
            let spec: v2beta3::ApisixClusterConfigSpec = decode(resource.kind, spec)?;
            let monitoring = spec.monitoring.unwrap_or_default();
            let prometheus = monitoring
                .prometheus
                .filter(|p| p.enable)
                .map(|_| false);
            monitoring_plugins(prometheus, monitoring.skywalking)?
        }
    };

    Ok(CanonicalRuleModel {
        id: resource.id(),
        plugins,
    })
}

fn decode<T: DeserializeOwned>(kind: ResourceKind, spec: &Value) -> Result<T, TranslationError> {
    if spec.is_null() {
        return Err(TranslationError::MalformedSpec {
            kind: kind.kind_name(),
            reason: "spec is missing".to_string(),
        });
    }
    serde_json::from_value(spec.clone()).map_err(|e| TranslationError::MalformedSpec {
        kind: kind.kind_name(),
        reason: e.to_string(),
    })
}

/// Fold (name, enable, config) entries into a plugin map
///
/// Disabled entries still take part in name validation and duplicate
/// detection, but contribute nothing to the model.
fn global_rule_plugins<I>(entries: I) -> Result<PluginMap, TranslationError>
where
    I: IntoIterator<Item = (String, Option<bool>, Option<Value>)>,
{
    let mut seen = HashSet::new();
    let mut plugins = PluginMap::new();

    for (name, enable, config) in entries {
        if name.trim().is_empty() {
            return Err(TranslationError::InvalidPluginConfig {
                plugin: name,
                reason: "plugin name is empty".to_string(),
            });
        }
        if !seen.insert(name.clone()) {
            return Err(TranslationError::DuplicatePlugin(name));
        }
        if !enable.unwrap_or(true) {
            continue;
        }

        let config = plugin_config(&name, config)?;
        plugins.insert(name, config);
    }

    Ok(plugins)
}

fn plugin_config(name: &str, config: Option<Value>) -> Result<Value, TranslationError> {
    match config {
        None | Some(Value::Null) => Ok(json!({})),
        Some(config @ Value::Object(_)) => Ok(config),
        Some(other) => Err(TranslationError::InvalidPluginConfig {
            plugin: name.to_string(),
            reason: format!("config must be an object, got {}", json_type(&other)),
        }),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `prometheus` is Some(prefer_name) when enabled
fn monitoring_plugins(
    prometheus: Option<bool>,
    skywalking: Option<ApisixClusterSkywalkingConfig>,
) -> Result<PluginMap, TranslationError> {
    let mut plugins = PluginMap::new();

    if let Some(prefer_name) = prometheus {
        let config = if prefer_name {
            json!({"prefer_name": true})
        } else {
            json!({})
        };
        plugins.insert("prometheus".to_string(), config);
    }

    if let Some(skywalking) = skywalking.filter(|s| s.enable) {
        let ratio = skywalking.sample_ratio.unwrap_or(1.0);
        // Also rejects NaN
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(TranslationError::InvalidPluginConfig {
                plugin: "skywalking".to_string(),
                reason: format!("sampleRatio must be in (0, 1], got {}", ratio),
            });
        }
        plugins.insert(
            "skywalking".to_string(),
            json!({"sample_ratio": ratio}),
        );
    }

    Ok(plugins)
}
