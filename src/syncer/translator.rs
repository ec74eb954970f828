//! # Translators
//!
//! Body/metadata translation shared by the resource plugins.
//!
//! `GenericTranslator` is the base for sync-down kinds: it stamps the
//! marker schema onto host objects and keeps it intact across updates.
//! `MirrorTranslator` is the base for host-sourced kinds, where the
//! virtual side is a plain projection of the host object.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::core::{DynamicObject, GroupVersionKind};
use tracing::info;

use crate::client::{EventRecorder, EventType};
use crate::constants::{
    CONTROLLER_ANNOTATION, CONTROLLER_LABEL, KIND_ANNOTATION, MARKER_LABEL, NAME_ANNOTATION,
    NAMESPACE_ANNOTATION, NAMESPACE_LABEL, SKIP_BACK_SYNC_ANNOTATION, UID_ANNOTATION,
};
use crate::mappings::{Mapper, MappingError};
use crate::syncer::context::{RegisterContext, SyncContext};
use crate::syncer::types::{SyncError, SyncOutcome};
use crate::translate::{annotation, api_kind, label, NameTranslator, NamespacedName};

/// Annotations owned by the engine on host objects. Preserved verbatim
/// across metadata updates (marker immutability).
const ENGINE_ANNOTATIONS: &[&str] = &[
    NAME_ANNOTATION,
    NAMESPACE_ANNOTATION,
    UID_ANNOTATION,
    KIND_ANNOTATION,
    CONTROLLER_ANNOTATION,
    SKIP_BACK_SYNC_ANNOTATION,
];

const ENGINE_LABELS: &[&str] = &[MARKER_LABEL, NAMESPACE_LABEL, CONTROLLER_LABEL];

fn gvk_api_kind(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        format!("{}/{}", gvk.version, gvk.kind)
    } else {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }
}

fn reset_server_metadata(obj: &mut DynamicObject) {
    obj.metadata.resource_version = None;
    obj.metadata.uid = None;
    obj.metadata.generation = None;
    obj.metadata.creation_timestamp = None;
    obj.metadata.deletion_timestamp = None;
    obj.metadata.deletion_grace_period_seconds = None;
    obj.metadata.owner_references = None;
    obj.metadata.managed_fields = None;
    obj.metadata.finalizers = None;
}

/// Base translator for kinds owned by the virtual cluster.
pub struct GenericTranslator {
    name: String,
    gvk: GroupVersionKind,
    mapper: Arc<dyn Mapper>,
    translator: Arc<NameTranslator>,
    recorder: Arc<dyn EventRecorder>,
}

impl GenericTranslator {
    pub fn new(
        ctx: &RegisterContext,
        name: &str,
        gvk: GroupVersionKind,
    ) -> Result<Self, MappingError> {
        let mapper = ctx.mappers.by_gvk(&gvk)?;
        Ok(Self {
            name: name.to_string(),
            gvk,
            mapper,
            translator: ctx.translator.clone(),
            recorder: ctx.virtual_event_recorder.clone(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    #[must_use]
    pub fn mapper(&self) -> &dyn Mapper {
        self.mapper.as_ref()
    }

    /// Host-side rendition of a virtual object: identity remapped, server
    /// metadata reset, marker schema stamped on.
    #[must_use]
    pub fn translate_metadata(&self, v_obj: &DynamicObject) -> DynamicObject {
        let v_name = NamespacedName::from_object(v_obj);
        let target = self.mapper.virtual_to_host(&v_name, Some(v_obj));

        let mut p_obj = v_obj.clone();
        reset_server_metadata(&mut p_obj);
        let NamespacedName { namespace, name } = target;
        p_obj.metadata.name = Some(name);
        p_obj.metadata.namespace = (!namespace.is_empty()).then_some(namespace);

        let mut annotations = v_obj.metadata.annotations.clone().unwrap_or_default();
        annotations.insert(NAME_ANNOTATION.to_string(), v_name.name.clone());
        if !v_name.namespace.is_empty() {
            annotations.insert(NAMESPACE_ANNOTATION.to_string(), v_name.namespace.clone());
        }
        annotations.insert(
            UID_ANNOTATION.to_string(),
            v_obj.metadata.uid.clone().unwrap_or_default(),
        );
        let kind = match api_kind(v_obj) {
            kind if kind.is_empty() => gvk_api_kind(&self.gvk),
            kind => kind,
        };
        annotations.insert(KIND_ANNOTATION.to_string(), kind);

        let mut labels = v_obj.metadata.labels.clone().unwrap_or_default();
        labels.insert(
            MARKER_LABEL.to_string(),
            self.translator.instance_name().to_string(),
        );
        if !v_name.namespace.is_empty() {
            labels.insert(NAMESPACE_LABEL.to_string(), v_name.namespace);
        }

        p_obj.metadata.annotations = Some(annotations);
        p_obj.metadata.labels = Some(labels);
        p_obj
    }

    /// Desired host metadata after an update: the virtual object's labels
    /// and annotations merged forward, with every engine-owned key
    /// preserved from the live host object.
    #[must_use]
    pub fn translate_metadata_update(
        &self,
        v_obj: &DynamicObject,
        p_obj: &DynamicObject,
    ) -> (bool, BTreeMap<String, String>, BTreeMap<String, String>) {
        let mut annotations = v_obj.metadata.annotations.clone().unwrap_or_default();
        for key in ENGINE_ANNOTATIONS {
            match annotation(p_obj, key) {
                Some(value) => {
                    annotations.insert((*key).to_string(), value.to_string());
                }
                None => {
                    annotations.remove(*key);
                }
            }
        }

        let mut labels = v_obj.metadata.labels.clone().unwrap_or_default();
        for key in ENGINE_LABELS {
            match label(p_obj, key) {
                Some(value) => {
                    labels.insert((*key).to_string(), value.to_string());
                }
                None => {
                    labels.remove(*key);
                }
            }
        }

        let changed = Some(&annotations) != p_obj.metadata.annotations.as_ref()
            || Some(&labels) != p_obj.metadata.labels.as_ref();
        (changed, annotations, labels)
    }

    /// Create the translated host object, surfacing an already-existing
    /// occupant as a sync error on the virtual object.
    pub async fn sync_to_host_create(
        &self,
        ctx: &SyncContext,
        v_obj: &DynamicObject,
        p_obj: DynamicObject,
    ) -> Result<SyncOutcome, SyncError> {
        let name = NamespacedName::from_object(&p_obj);
        info!("create host {} {name}", self.gvk.kind);

        match ctx.physical_client.create(&self.gvk, &p_obj).await {
            Ok(_) => Ok(SyncOutcome::done()),
            Err(err) => {
                self.record_sync_error(v_obj, &format!("Error syncing to physical cluster: {err}"))
                    .await;
                Err(err.into())
            }
        }
    }

    /// Emit the single user-visible `SyncError` warning event.
    pub async fn record_sync_error(&self, v_obj: &DynamicObject, message: &str) {
        self.recorder
            .event(v_obj, EventType::Warning, "SyncError", message)
            .await;
    }
}

/// Base translator for kinds whose source of truth is the host cluster.
pub struct MirrorTranslator {
    name: String,
    gvk: GroupVersionKind,
    mapper: Arc<dyn Mapper>,
}

impl MirrorTranslator {
    pub fn new(
        ctx: &RegisterContext,
        name: &str,
        gvk: GroupVersionKind,
    ) -> Result<Self, MappingError> {
        let mapper = ctx.mappers.by_gvk(&gvk)?;
        Ok(Self {
            name: name.to_string(),
            gvk,
            mapper,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    #[must_use]
    pub fn mapper(&self) -> &dyn Mapper {
        self.mapper.as_ref()
    }

    /// Virtual projection of a host object.
    #[must_use]
    pub fn translate_to_virtual(&self, p_obj: &DynamicObject) -> DynamicObject {
        let mut v_obj = p_obj.clone();
        reset_server_metadata(&mut v_obj);
        v_obj
    }

    /// Converge the virtual projection onto the current host state.
    /// Returns the updated object, or `None` when nothing changed.
    #[must_use]
    pub fn translate_update_to_virtual(
        &self,
        p_obj: &DynamicObject,
        v_obj: &DynamicObject,
    ) -> Option<DynamicObject> {
        let mut updated = v_obj.clone();
        updated.data = p_obj.data.clone();
        updated.metadata.labels = p_obj.metadata.labels.clone();
        updated.metadata.annotations = p_obj.metadata.annotations.clone();

        if updated.data == v_obj.data
            && updated.metadata.labels == v_obj.metadata.labels
            && updated.metadata.annotations == v_obj.metadata.annotations
        {
            return None;
        }

        Some(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappings::resources::{register_mappings, secrets_gvk};
    use crate::testing::{new_fake_register_context, test_object, with_uid};

    fn translator_for_secrets() -> (crate::testing::FakeContext, GenericTranslator) {
        let ctx = new_fake_register_context(crate::config::SyncConfig::default());
        register_mappings(&ctx).unwrap();
        let translator = GenericTranslator::new(&ctx, "secret", secrets_gvk()).unwrap();
        (ctx, translator)
    }

    #[test]
    fn test_translate_metadata_stamps_marker_schema() {
        let (_ctx, translator) = translator_for_secrets();
        let v_obj = with_uid(test_object("v1", "Secret", "default", "a"), "123");

        let p_obj = translator.translate_metadata(&v_obj);
        assert_eq!(p_obj.metadata.name.as_deref(), Some("a-x-default-x-suffix"));
        assert_eq!(p_obj.metadata.namespace.as_deref(), Some("workload"));
        assert!(p_obj.metadata.uid.is_none());

        let annotations = p_obj.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations.get(NAME_ANNOTATION).unwrap(), "a");
        assert_eq!(annotations.get(NAMESPACE_ANNOTATION).unwrap(), "default");
        assert_eq!(annotations.get(UID_ANNOTATION).unwrap(), "123");
        assert_eq!(annotations.get(KIND_ANNOTATION).unwrap(), "v1/Secret");

        let labels = p_obj.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get(MARKER_LABEL).unwrap(), "suffix");
        assert_eq!(labels.get(NAMESPACE_LABEL).unwrap(), "default");
    }

    #[test]
    fn test_translate_metadata_update_preserves_markers() {
        let (_ctx, translator) = translator_for_secrets();
        let mut v_obj = with_uid(test_object("v1", "Secret", "default", "a"), "123");
        let p_obj = translator.translate_metadata(&v_obj);

        // user adds a label on the virtual object
        v_obj
            .metadata
            .labels
            .get_or_insert_with(Default::default)
            .insert("app".to_string(), "demo".to_string());

        let (changed, annotations, labels) = translator.translate_metadata_update(&v_obj, &p_obj);
        assert!(changed);
        assert_eq!(labels.get("app").unwrap(), "demo");
        assert_eq!(labels.get(MARKER_LABEL).unwrap(), "suffix");
        assert_eq!(annotations.get(NAME_ANNOTATION).unwrap(), "a");
        assert_eq!(annotations.get(UID_ANNOTATION).unwrap(), "123");
    }

    #[test]
    fn test_translate_metadata_update_reports_unchanged() {
        let (_ctx, translator) = translator_for_secrets();
        let v_obj = with_uid(test_object("v1", "Secret", "default", "a"), "123");
        let p_obj = translator.translate_metadata(&v_obj);

        let (changed, _, _) = translator.translate_metadata_update(&v_obj, &p_obj);
        assert!(!changed);
    }
}
