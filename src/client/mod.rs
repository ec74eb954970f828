//! # Cluster clients
//!
//! The abstract client interface the engine consumes, one implementation
//! per cluster. The kube-backed implementation lives in [`kubernetes`]; the
//! in-memory fake used by the test harness lives in
//! [`crate::testing`].

pub mod kubernetes;

use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind};
use thiserror::Error;

use crate::translate::NamespacedName;

/// Errors surfaced by cluster clients.
///
/// `NotFound` is tolerated where expected (cache staleness) and converted
/// to `None` by the engine; `AlreadyExists` is distinct from `Conflict`
/// and surfaced to the plugin; everything else is transient I/O that the
/// work queue retries with backoff.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    #[error("api error: {0}")]
    Api(anyhow::Error),
}

impl ClientError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClientError::AlreadyExists { .. })
    }
}

/// Options for delete calls.
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub grace_period_seconds: Option<i64>,
    /// Delete only if the live object still has this UID.
    pub uid_precondition: Option<String>,
}

/// Abstract operations against one cluster.
///
/// All operations take the GVK explicitly because the engine works on
/// dynamic objects; implementations resolve the concrete API from it.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        name: &NamespacedName,
    ) -> Result<DynamicObject, ClientError>;

    async fn create(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;

    async fn update(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;

    /// Update only the status subresource from `obj`'s status field.
    async fn update_status(
        &self,
        gvk: &GroupVersionKind,
        obj: &DynamicObject,
    ) -> Result<DynamicObject, ClientError>;

    /// Server-side merge patch.
    async fn patch_merge(
        &self,
        gvk: &GroupVersionKind,
        name: &NamespacedName,
        patch: serde_json::Value,
    ) -> Result<DynamicObject, ClientError>;

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        name: &NamespacedName,
        opts: &DeleteOptions,
    ) -> Result<(), ClientError>;

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ClientError>;
}

/// One change observed on a cluster, as produced by an event source
/// subscription for a given GVK.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Created(DynamicObject),
    Updated(DynamicObject),
    Deleted(DynamicObject),
    Generic(DynamicObject),
}

impl WatchEvent {
    #[must_use]
    pub fn object(&self) -> &DynamicObject {
        match self {
            WatchEvent::Created(obj)
            | WatchEvent::Updated(obj)
            | WatchEvent::Deleted(obj)
            | WatchEvent::Generic(obj) => obj,
        }
    }

    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self, WatchEvent::Deleted(_))
    }
}

/// Kubernetes event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// Records Kubernetes events on objects. User-visible sync failures are
/// Warning events with reason `SyncError`.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn event(&self, obj: &DynamicObject, event_type: EventType, reason: &str, message: &str);
}

/// Recorder that drops all events. Used where no event sink is wired up.
#[derive(Debug, Default)]
pub struct NoopEventRecorder;

#[async_trait]
impl EventRecorder for NoopEventRecorder {
    async fn event(
        &self,
        _obj: &DynamicObject,
        _event_type: EventType,
        _reason: &str,
        _message: &str,
    ) {
    }
}
