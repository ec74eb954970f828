//! Kube-backed cluster client, watch adapter, and event recorder.
//!
//! APIs are resolved dynamically per GVK so one client services every
//! registered kind.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{Api, ApiResource, DeleteParams, Patch, PatchParams, Preconditions};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::Client;
use kube_runtime::events::{Event, EventType as KubeEventType, Recorder, Reporter};
use kube_runtime::watcher;
use tracing::warn;

use super::{ClientError, ClusterClient, DeleteOptions, EventRecorder, EventType, WatchEvent};
use crate::translate::NamespacedName;

/// `ClusterClient` backed by a real API server connection.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, gvk: &GroupVersionKind, namespace: &str) -> Api<DynamicObject> {
        let resource = ApiResource::from_gvk(gvk);
        if namespace.is_empty() {
            Api::all_with(self.client.clone(), &resource)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &resource)
        }
    }

    fn convert_error(gvk: &GroupVersionKind, name: &NamespacedName, err: kube::Error) -> ClientError {
        match err {
            kube::Error::Api(api_err) if api_err.code == 404 => ClientError::NotFound {
                kind: gvk.kind.clone(),
                name: name.to_string(),
            },
            kube::Error::Api(api_err) if api_err.reason == "AlreadyExists" => {
                ClientError::AlreadyExists {
                    kind: gvk.kind.clone(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(api_err) if api_err.code == 409 => ClientError::Conflict {
                kind: gvk.kind.clone(),
                name: name.to_string(),
                message: api_err.message,
            },
            other => ClientError::Api(other.into()),
        }
    }
}

fn object_name(obj: &DynamicObject) -> NamespacedName {
    NamespacedName::from_object(obj)
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        name: &NamespacedName,
    ) -> Result<DynamicObject, ClientError> {
        self.api(gvk, &name.namespace)
            .get(&name.name)
            .await
            .map_err(|err| Self::convert_error(gvk, name, err))
    }

    async fn create(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let name = object_name(obj);
        self.api(gvk, &name.namespace)
            .create(&Default::default(), obj)
            .await
            .map_err(|err| Self::convert_error(gvk, &name, err))
    }

    async fn update(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let name = object_name(obj);
        self.api(gvk, &name.namespace)
            .replace(&name.name, &Default::default(), obj)
            .await
            .map_err(|err| Self::convert_error(gvk, &name, err))
    }

    async fn update_status(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError> {
        let name = object_name(obj);
        let status = obj.data.get("status").cloned().unwrap_or_default();
        self.api(gvk, &name.namespace)
            .patch_status(
                &name.name,
                &PatchParams::default(),
                &Patch::Merge(serde_json::json!({ "status": status })),
            )
            .await
            .map_err(|err| Self::convert_error(gvk, &name, err))
    }

    async fn patch_merge(
        &self,
        gvk: &GroupVersionKind,
        name: &NamespacedName,
        patch: serde_json::Value,
    ) -> Result<DynamicObject, ClientError> {
        self.api(gvk, &name.namespace)
            .patch(&name.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|err| Self::convert_error(gvk, name, err))
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        name: &NamespacedName,
        opts: &DeleteOptions,
    ) -> Result<(), ClientError> {
        let mut params = DeleteParams::default();
        if let Some(grace) = opts.grace_period_seconds {
            params = params.grace_period(u32::try_from(grace).unwrap_or(0));
        }
        if let Some(uid) = &opts.uid_precondition {
            params.preconditions = Some(Preconditions {
                uid: Some(uid.clone()),
                resource_version: None,
            });
        }

        self.api(gvk, &name.namespace)
            .delete(&name.name, &params)
            .await
            .map(|_| ())
            .map_err(|err| Self::convert_error(gvk, name, err))
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClientError> {
        self.api(gvk, namespace.unwrap_or_default())
            .list(&Default::default())
            .await
            .map(|list| list.items)
            .map_err(|err| {
                Self::convert_error(gvk, &NamespacedName::cluster_scoped("<list>"), err)
            })
    }
}

/// Subscribe to changes for one GVK, optionally scoped to a namespace.
///
/// Watcher restarts and re-lists are folded into the same event shape the
/// engine consumes: initial-sync objects surface as `Created`, later
/// applies as `Updated`.
#[must_use]
pub fn watch_events(
    client: Client,
    gvk: &GroupVersionKind,
    namespace: Option<&str>,
) -> BoxStream<'static, WatchEvent> {
    let resource = ApiResource::from_gvk(gvk);
    let api: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(client, ns, &resource),
        None => Api::all_with(client, &resource),
    };

    watcher(api, watcher::Config::default())
        .filter_map(|event| async move {
            match event {
                Ok(watcher::Event::Apply(obj)) => Some(WatchEvent::Updated(obj)),
                Ok(watcher::Event::Delete(obj)) => Some(WatchEvent::Deleted(obj)),
                Ok(watcher::Event::InitApply(obj)) => Some(WatchEvent::Created(obj)),
                Ok(watcher::Event::Init | watcher::Event::InitDone) => None,
                Err(err) => {
                    warn!("watch stream error, watcher will restart: {err}");
                    None
                }
            }
        })
        .boxed()
}

/// Event recorder publishing Kubernetes events through the API server.
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    #[must_use]
    pub fn new(client: Client, controller_name: &str) -> Self {
        Self {
            recorder: Recorder::new(
                client,
                Reporter {
                    controller: controller_name.to_string(),
                    instance: None,
                },
            ),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn event(&self, obj: &DynamicObject, event_type: EventType, reason: &str, message: &str) {
        let reference = ObjectReference {
            api_version: obj.types.as_ref().map(|t| t.api_version.clone()),
            kind: obj.types.as_ref().map(|t| t.kind.clone()),
            name: obj.metadata.name.clone(),
            namespace: obj.metadata.namespace.clone(),
            uid: obj.metadata.uid.clone(),
            ..Default::default()
        };

        let event = Event {
            type_: match event_type {
                EventType::Normal => KubeEventType::Normal,
                EventType::Warning => KubeEventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Sync".to_string(),
            secondary: None,
        };

        if let Err(err) = self.recorder.publish(&event, &reference).await {
            warn!(
                "failed to record {reason} event on {}: {err}",
                obj.metadata.name.as_deref().unwrap_or("unknown")
            );
        }
    }
}
