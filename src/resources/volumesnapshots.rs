//! Volume snapshot syncer: virtual -> host owned, with bidirectional
//! deletion propagation.
//!
//! Snapshots are the one kind where deletion order matters: the host-side
//! snapshot holds the actual storage state, so deletions are propagated
//! with grace periods and UID preconditions, and finalizers/status are
//! synced back while either side is terminating.

use std::sync::Arc;

use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind};
use tracing::info;

use crate::client::DeleteOptions;
use crate::mappings::resources::volume_snapshots_gvk;
use crate::mappings::Mapper;
use crate::syncer::context::{RegisterContext, SyncContext};
use crate::syncer::translator::GenericTranslator;
use crate::syncer::types::{SyncError, SyncOutcome, Syncer};
use crate::translate::NamespacedName;

/// Grace period used when propagating a host-side deletion that carries
/// none.
const MINIMUM_GRACE_PERIOD_SECONDS: i64 = 30;

pub fn new(ctx: &RegisterContext) -> Result<Arc<dyn Syncer>, SyncError> {
    Ok(Arc::new(VolumeSnapshotSyncer {
        base: GenericTranslator::new(ctx, "volume-snapshot", volume_snapshots_gvk())?,
    }))
}

struct VolumeSnapshotSyncer {
    base: GenericTranslator,
}

fn status_of(obj: &DynamicObject) -> Option<&serde_json::Value> {
    obj.data.get("status")
}

fn copy_status(from: &DynamicObject, to: &mut DynamicObject) {
    let Some(data) = to.data.as_object_mut() else {
        return;
    };

    match status_of(from) {
        Some(status) => {
            data.insert("status".to_string(), status.clone());
        }
        None => {
            data.remove("status");
        }
    }
}

#[async_trait]
impl Syncer for VolumeSnapshotSyncer {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn gvk(&self) -> &GroupVersionKind {
        self.base.gvk()
    }

    fn mapper(&self) -> &dyn Mapper {
        self.base.mapper()
    }

    async fn sync_to_host(
        &self,
        ctx: &SyncContext,
        v_obj: DynamicObject,
    ) -> Result<SyncOutcome, SyncError> {
        if ctx.is_delete || v_obj.metadata.deletion_timestamp.is_some() {
            // the host snapshot is already gone; let the virtual object
            // finish deleting immediately
            let has_finalizers = v_obj
                .metadata
                .finalizers
                .as_ref()
                .is_some_and(|finalizers| !finalizers.is_empty());
            let grace = v_obj.metadata.deletion_grace_period_seconds.unwrap_or(0);
            if has_finalizers || grace > 0 {
                let mut updated = v_obj.clone();
                updated.metadata.finalizers = Some(Vec::new());
                updated.metadata.deletion_grace_period_seconds = Some(0);
                ctx.virtual_client.update(self.gvk(), &updated).await?;
            }

            return Ok(SyncOutcome::done());
        }

        let p_obj = self.base.translate_metadata(&v_obj);
        self.base.sync_to_host_create(ctx, &v_obj, p_obj).await
    }

    async fn sync(
        &self,
        ctx: &SyncContext,
        p_obj: DynamicObject,
        v_obj: DynamicObject,
    ) -> Result<SyncOutcome, SyncError> {
        let v_name = NamespacedName::from_object(&v_obj);
        let p_name = NamespacedName::from_object(&p_obj);

        if p_obj.metadata.deletion_timestamp.is_some() {
            if v_obj.metadata.deletion_timestamp.is_none() {
                info!(
                    "delete virtual volume snapshot {v_name}, because the host volume snapshot is being deleted"
                );
                ctx.virtual_client
                    .delete(
                        self.gvk(),
                        &v_name,
                        &DeleteOptions {
                            grace_period_seconds: Some(MINIMUM_GRACE_PERIOD_SECONDS),
                            uid_precondition: None,
                        },
                    )
                    .await?;
            } else if v_obj.metadata.deletion_grace_period_seconds
                != p_obj.metadata.deletion_grace_period_seconds
            {
                info!(
                    "delete virtual volume snapshot {v_name} with grace period {:?}",
                    p_obj.metadata.deletion_grace_period_seconds
                );
                ctx.virtual_client
                    .delete(
                        self.gvk(),
                        &v_name,
                        &DeleteOptions {
                            grace_period_seconds: p_obj.metadata.deletion_grace_period_seconds,
                            uid_precondition: v_obj.metadata.uid.clone(),
                        },
                    )
                    .await?;
            }

            // keep finalizers and status visible while the deletion runs
            // its course
            if v_obj.metadata.finalizers != p_obj.metadata.finalizers {
                let mut updated = v_obj.clone();
                updated.metadata.finalizers = p_obj.metadata.finalizers.clone();
                info!(
                    "update finalizers of virtual volume snapshot {v_name}, because they changed on the host object"
                );
                match ctx.virtual_client.update(self.gvk(), &updated).await {
                    Ok(_) => {}
                    Err(err) if err.is_not_found() => return Ok(SyncOutcome::done()),
                    Err(err) => return Err(err.into()),
                }
            }

            if status_of(&v_obj) != status_of(&p_obj) {
                let mut updated = v_obj.clone();
                copy_status(&p_obj, &mut updated);
                info!("update virtual volume snapshot {v_name}, because status has changed");
                match ctx.virtual_client.update_status(self.gvk(), &updated).await {
                    Ok(_) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err.into()),
                }
            }

            return Ok(SyncOutcome::done());
        }

        if v_obj.metadata.deletion_timestamp.is_some() {
            if p_obj.metadata.deletion_timestamp.is_none() {
                info!(
                    "delete host volume snapshot {p_name}, because virtual volume snapshot is being deleted"
                );
                ctx.physical_client
                    .delete(
                        self.gvk(),
                        &p_name,
                        &DeleteOptions {
                            grace_period_seconds: v_obj.metadata.deletion_grace_period_seconds,
                            uid_precondition: p_obj.metadata.uid.clone(),
                        },
                    )
                    .await?;
            }

            return Ok(SyncOutcome::done());
        }

        // steady state: snapshot class forward, status and finalizers
        // backward, metadata forward
        let mut errors: Vec<SyncError> = Vec::new();

        let (meta_changed, annotations, labels) =
            self.base.translate_metadata_update(&v_obj, &p_obj);
        let v_class = v_obj
            .data
            .get("spec")
            .and_then(|spec| spec.get("volumeSnapshotClassName"))
            .cloned();
        let p_class = p_obj
            .data
            .get("spec")
            .and_then(|spec| spec.get("volumeSnapshotClassName"))
            .cloned();

        if meta_changed || v_class != p_class {
            let mut updated = p_obj.clone();
            updated.metadata.annotations = Some(annotations);
            updated.metadata.labels = Some(labels);
            if let Some(spec) = updated.data.get_mut("spec").and_then(|s| s.as_object_mut()) {
                match &v_class {
                    Some(class) => {
                        spec.insert("volumeSnapshotClassName".to_string(), class.clone());
                    }
                    None => {
                        spec.remove("volumeSnapshotClassName");
                    }
                }
            }

            if let Err(err) = ctx.physical_client.update(self.gvk(), &updated).await {
                errors.push(err.into());
            }
        }

        if v_obj.metadata.finalizers != p_obj.metadata.finalizers
            || status_of(&v_obj) != status_of(&p_obj)
        {
            let mut updated = v_obj.clone();
            updated.metadata.finalizers = p_obj.metadata.finalizers.clone();
            copy_status(&p_obj, &mut updated);

            if let Err(err) = ctx.virtual_client.update(self.gvk(), &updated).await {
                if !err.is_not_found() {
                    errors.push(err.into());
                }
            }
        }

        match errors.len() {
            0 => Ok(SyncOutcome::done()),
            _ => {
                let message = errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                self.base
                    .record_sync_error(&v_obj, &format!("Error syncing: {message}"))
                    .await;
                Err(SyncError::Other(anyhow::anyhow!(message)))
            }
        }
    }
}
