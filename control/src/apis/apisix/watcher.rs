//! ApisixGlobalRule / ApisixClusterConfig watcher
//!
//! Watches one kind at one schema version as `DynamicObject`s and feeds the
//! sync engine:
//! - `InitApply` -> Create
//! - `Apply` -> Update
//! - `Delete` -> Delete
//! - `InitDone` -> signals `synced` once (initial listing complete)
//!
//! Every (re)list is diffed against the engine's live resources of the kind:
//! objects deleted while the watch was down never produce a `Delete`, so
//! they are deleted once the listing is complete.
//!
//! The spec is passed through untyped and validated by the translator, which
//! reports a bad object against its id.

use crate::error::ControllerError;
use crate::sync::task::{EventKind, ResourceEvent};
use crate::sync::SyncEngine;
use common::{ResourceKind, ResourceRef, SchemaVersion, API_GROUP};
use futures::StreamExt;
use kube::api::{Api, ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use kube::runtime::watcher;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::WatchStreamExt;
use kube::{Client, ResourceExt};
use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// API resource for `kind` served at `version`
pub fn api_resource(kind: ResourceKind, version: SchemaVersion) -> ApiResource {
    let gvk = GroupVersionKind::gvk(API_GROUP, version.as_str(), kind.kind_name());
    ApiResource::from_gvk_with_plural(&gvk, kind.plural())
}

/// Convert a watched object into a resource event
pub fn to_event(
    kind: ResourceKind,
    version: SchemaVersion,
    object: &DynamicObject,
    event_kind: EventKind,
) -> ResourceEvent {
    let namespace = if kind.is_namespaced() {
        object.namespace().unwrap_or_else(|| "default".to_string())
    } else {
        String::new()
    };
    let api_version = object
        .types
        .as_ref()
        .map(|types| types.api_version.clone())
        .unwrap_or_else(|| version.api_version());

    ResourceEvent {
        resource: ResourceRef::new(kind, namespace, object.name_any(), api_version),
        kind: event_kind,
        spec: object.data.get("spec").cloned().unwrap_or(Value::Null),
    }
}

/// Live resources of `kind` missing from a completed listing
///
/// `listed` holds `(namespace, name)` pairs. With `namespace` set, only
/// resources in that namespace are considered (the listing saw no others).
pub fn vanished(
    live: Vec<ResourceRef>,
    listed: &HashSet<(String, String)>,
    kind: ResourceKind,
    namespace: Option<&str>,
) -> Vec<ResourceRef> {
    live.into_iter()
        .filter(|resource| resource.kind == kind)
        .filter(|resource| match namespace {
            Some(ns) if kind.is_namespaced() => resource.namespace == ns,
            _ => true,
        })
        .filter(|resource| {
            !listed.contains(&(resource.namespace.clone(), resource.name.clone()))
        })
        .collect()
}

/// Watch `kind` and push every change into `engine`
///
/// Runs until the watch stream ends. Call it in a `tokio::spawn()` task.
/// `namespace` only restricts namespaced kinds.
pub async fn watch_resources(
    client: Client,
    kind: ResourceKind,
    version: SchemaVersion,
    namespace: Option<String>,
    engine: SyncEngine,
    synced: Option<oneshot::Sender<()>>,
) -> Result<(), ControllerError> {
    let ar = api_resource(kind, version);
    let api: Api<DynamicObject> = match namespace.as_deref() {
        Some(ns) if kind.is_namespaced() => Api::namespaced_with(client, ns, &ar),
        _ => Api::all_with(client, &ar),
    };

    let stream = watcher(api, WatcherConfig::default()).default_backoff();
    futures::pin_mut!(stream);

    let mut synced = synced;
    let mut listed: Option<HashSet<(String, String)>> = None;
    info!(kind = %kind, version = %version, "Starting {} watcher", kind);

    while let Some(event) = stream.next().await {
        let (object, event_kind) = match event {
            Ok(watcher::Event::InitApply(object)) => (object, EventKind::Create),
            Ok(watcher::Event::Apply(object)) => (object, EventKind::Update),
            Ok(watcher::Event::Delete(object)) => (object, EventKind::Delete),
            Ok(watcher::Event::Init) => {
                debug!(kind = %kind, "watcher (re)listing");
                listed = Some(HashSet::new());
                continue;
            }
            Ok(watcher::Event::InitDone) => {
                info!(kind = %kind, "{} watcher initial sync complete", kind);
                if let Some(listed) = listed.take() {
                    let live = engine.live_resources();
                    for resource in vanished(live, &listed, kind, namespace.as_deref()) {
                        info!(resource = %resource, "resource deleted while unwatched");
                        let _ = engine.handle_event(ResourceEvent::delete(resource));
                    }
                }
                if let Some(tx) = synced.take() {
                    let _ = tx.send(());
                }
                continue;
            }
            Err(e) => {
                warn!(kind = %kind, "{} watcher error: {}", kind, e);
                continue;
            }
        };

        let event = to_event(kind, version, &object, event_kind);
        if let (EventKind::Create, Some(listed)) = (&event.kind, listed.as_mut()) {
            listed.insert((event.resource.namespace.clone(), event.resource.name.clone()));
        }
        debug!(resource = %event.resource, event = ?event.kind, "resource event");
        // Rejections are recorded by the engine
        let _ = engine.handle_event(event);
    }

    warn!(kind = %kind, "{} watcher stream ended", kind);
    Ok(())
}
