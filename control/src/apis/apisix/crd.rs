//! ApisixGlobalRule / ApisixClusterConfig custom resource definitions
//!
//! Both schema versions are served side by side. The spec structs double as
//! the decoding target of the model translator, so their serde shape is the
//! accepted input shape.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::crd::{merge_crds, MergeError};
use kube::CustomResourceExt;
use schemars::gen::SchemaGenerator;
use schemars::schema::{Schema, SchemaObject};

/// Both CRDs with every served version merged, v2 as storage version
pub fn crds() -> Result<Vec<CustomResourceDefinition>, MergeError> {
    Ok(vec![
        merge_crds(
            vec![v2beta3::ApisixGlobalRule::crd(), v2::ApisixGlobalRule::crd()],
            "v2",
        )?,
        merge_crds(
            vec![
                v2beta3::ApisixClusterConfig::crd(),
                v2::ApisixClusterConfig::crd(),
            ],
            "v2",
        )?,
    ])
}

/// Schema for opaque plugin configuration objects
fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject::default();
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

pub mod v2 {
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    /// Specification for an ApisixGlobalRule
    #[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[kube(
        group = "apisix.apache.org",
        version = "v2",
        kind = "ApisixGlobalRule",
        plural = "apisixglobalrules",
        shortname = "agr",
        namespaced
    )]
    #[serde(rename_all = "camelCase")]
    pub struct ApisixGlobalRuleSpec {
        /// Plugins applied to every request
        #[serde(default)]
        pub plugins: Vec<ApisixRulePlugin>,
    }

    /// One plugin entry of a v2 global rule
    #[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct ApisixRulePlugin {
        pub name: String,

        /// Missing means enabled
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub enable: Option<bool>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[schemars(schema_with = "super::preserve_unknown_fields")]
        pub config: Option<serde_json::Value>,
    }

    /// Specification for an ApisixClusterConfig
    #[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[kube(
        group = "apisix.apache.org",
        version = "v2",
        kind = "ApisixClusterConfig",
        plural = "apisixclusterconfigs",
        shortname = "acc"
    )]
    #[serde(rename_all = "camelCase")]
    pub struct ApisixClusterConfigSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub monitoring: Option<ApisixClusterMonitoringConfig>,
    }

    #[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct ApisixClusterMonitoringConfig {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub prometheus: Option<ApisixClusterPrometheusConfig>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub skywalking: Option<super::ApisixClusterSkywalkingConfig>,
    }

    #[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct ApisixClusterPrometheusConfig {
        #[serde(default)]
        pub enable: bool,

        /// Use resource names instead of ids in metric labels
        #[serde(default)]
        pub prefer_name: bool,
    }
}

pub mod v2beta3 {
    use kube::CustomResource;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    /// Specification for an ApisixGlobalRule (older map-keyed shape)
    #[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[kube(
        group = "apisix.apache.org",
        version = "v2beta3",
        kind = "ApisixGlobalRule",
        plural = "apisixglobalrules",
        shortname = "agr",
        namespaced
    )]
    #[serde(rename_all = "camelCase")]
    pub struct ApisixGlobalRuleSpec {
        /// Plugin name -> entry
        #[serde(default)]
        pub plugins: BTreeMap<String, ApisixRulePluginEntry>,
    }

    #[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct ApisixRulePluginEntry {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub enable: Option<bool>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        #[schemars(schema_with = "super::preserve_unknown_fields")]
        pub config: Option<serde_json::Value>,
    }

    /// Specification for an ApisixClusterConfig
    #[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[kube(
        group = "apisix.apache.org",
        version = "v2beta3",
        kind = "ApisixClusterConfig",
        plural = "apisixclusterconfigs",
        shortname = "acc"
    )]
    #[serde(rename_all = "camelCase")]
    pub struct ApisixClusterConfigSpec {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub monitoring: Option<ApisixClusterMonitoringConfig>,
    }

    #[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct ApisixClusterMonitoringConfig {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub prometheus: Option<ApisixClusterPrometheusConfig>,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub skywalking: Option<super::ApisixClusterSkywalkingConfig>,
    }

    #[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
    #[serde(rename_all = "camelCase")]
    pub struct ApisixClusterPrometheusConfig {
        #[serde(default)]
        pub enable: bool,
    }
}

/// Skywalking section, identical in both versions
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApisixClusterSkywalkingConfig {
    #[serde(default)]
    pub enable: bool,

    /// Fraction of requests traced, in (0, 1]; defaults to 1
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_ratio: Option<f64>,
}
