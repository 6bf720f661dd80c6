//! Reusable ApisixGlobalRule / ApisixClusterConfig manifests
//!
//! Manifests are parsed into `DynamicObject`s and converted with the
//! watcher's own conversion, so tests see exactly what a watch would deliver.

use common::{ResourceKind, SchemaVersion};
use control::apis::apisix::watcher::to_event;
use control::sync::task::{EventKind, ResourceEvent};
use kube::api::DynamicObject;

/// Echo plugin on `default/test-agr-1` (v2)
pub const AGR_ECHO: &str = r#"
apiVersion: apisix.apache.org/v2
kind: ApisixGlobalRule
metadata:
  name: test-agr-1
  namespace: default
spec:
  plugins:
    - name: echo
      enable: true
      config:
        body: "hello, world!!"
"#;

/// Same resource with the echo plugin switched off
pub const AGR_ECHO_DISABLED: &str = r#"
apiVersion: apisix.apache.org/v2
kind: ApisixGlobalRule
metadata:
  name: test-agr-1
  namespace: default
spec:
  plugins:
    - name: echo
      enable: false
      config:
        body: "hello, world!!"
"#;

/// Same resource, echo body changed and a second plugin added
pub const AGR_ECHO_UPDATED: &str = r#"
apiVersion: apisix.apache.org/v2
kind: ApisixGlobalRule
metadata:
  name: test-agr-1
  namespace: default
spec:
  plugins:
    - name: echo
      config:
        body: "bye"
    - name: cors
"#;

/// Plugin map form of the older schema version
pub const AGR_V2BETA3: &str = r#"
apiVersion: apisix.apache.org/v2beta3
kind: ApisixGlobalRule
metadata:
  name: legacy-agr
  namespace: apps
spec:
  plugins:
    limit-count:
      enable: true
      config:
        count: 100
        time_window: 60
    ip-restriction:
      enable: false
"#;

/// Rejected by the translator: same plugin listed twice
pub const AGR_DUPLICATE: &str = r#"
apiVersion: apisix.apache.org/v2
kind: ApisixGlobalRule
metadata:
  name: broken-agr
  namespace: default
spec:
  plugins:
    - name: echo
    - name: echo
      enable: false
"#;

/// Prometheus monitoring (v2beta3)
pub const ACC_PROMETHEUS_V2BETA3: &str = r#"
apiVersion: apisix.apache.org/v2beta3
kind: ApisixClusterConfig
metadata:
  name: default
spec:
  monitoring:
    prometheus:
      enable: true
"#;

/// Prometheus with prefer_name plus skywalking (v2)
pub const ACC_FULL_V2: &str = r#"
apiVersion: apisix.apache.org/v2
kind: ApisixClusterConfig
metadata:
  name: default
spec:
  monitoring:
    prometheus:
      enable: true
      preferName: true
    skywalking:
      enable: true
      sampleRatio: 0.5
"#;

/// Rejected by the translator: sample ratio out of range
pub const ACC_BAD_SAMPLE_RATIO: &str = r#"
apiVersion: apisix.apache.org/v2
kind: ApisixClusterConfig
metadata:
  name: default
spec:
  monitoring:
    skywalking:
      enable: true
      sampleRatio: 1.5
"#;

/// Parse a manifest into the event a watcher would emit for it
pub fn event(
    manifest: &str,
    kind: EventKind,
) -> Result<ResourceEvent, Box<dyn std::error::Error + Send + Sync>> {
    let object: DynamicObject = serde_yaml::from_str(manifest)?;
    let types = object
        .types
        .as_ref()
        .ok_or("manifest without apiVersion/kind")?;

    let version = SchemaVersion::parse(&types.api_version)
        .ok_or_else(|| format!("unsupported apiVersion {}", types.api_version))?;
    let resource_kind = match types.kind.as_str() {
        "ApisixGlobalRule" => ResourceKind::GlobalRule,
        "ApisixClusterConfig" => ResourceKind::ClusterConfig,
        other => return Err(format!("unsupported kind {}", other).into()),
    };

    Ok(to_event(resource_kind, version, &object, kind))
}

/// Gateway id of the resource a manifest describes
pub fn id_of(manifest: &str) -> String {
    event(manifest, EventKind::Create)
        .expect("fixture manifest must parse")
        .resource
        .id()
}
