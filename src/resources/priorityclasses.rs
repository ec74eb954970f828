//! Priority class syncer: virtual -> host owned, cluster-scoped.

use std::sync::Arc;

use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind};
use tracing::info;

use crate::mappings::resources::priority_classes_gvk;
use crate::mappings::Mapper;
use crate::syncer::context::{RegisterContext, SyncContext};
use crate::syncer::controller::delete_virtual_object;
use crate::syncer::translator::GenericTranslator;
use crate::syncer::types::{SyncError, SyncOutcome, Syncer};

pub fn new(ctx: &RegisterContext) -> Result<Arc<dyn Syncer>, SyncError> {
    Ok(Arc::new(PriorityClassSyncer {
        base: GenericTranslator::new(ctx, "priorityclass", priority_classes_gvk())?,
    }))
}

struct PriorityClassSyncer {
    base: GenericTranslator,
}

impl PriorityClassSyncer {
    fn translate(&self, v_obj: &DynamicObject) -> DynamicObject {
        let mut p_obj = self.base.translate_metadata(v_obj);
        // the host cluster already has a default priority class
        if let Some(body) = p_obj.data.as_object_mut() {
            body.remove("globalDefault");
        }
        p_obj
    }
}

#[async_trait]
impl Syncer for PriorityClassSyncer {
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
        if ctx.is_delete {
            return delete_virtual_object(ctx, self.gvk(), &v_obj, "host object was deleted").await;
        }

        let p_obj = self.translate(&v_obj);
        info!(
            "create host priority class {}",
            p_obj.metadata.name.as_deref().unwrap_or_default()
        );
        if let Err(err) = ctx.physical_client.create(self.gvk(), &p_obj).await {
            info!(
                "error syncing {} to host cluster: {err}",
                v_obj.metadata.name.as_deref().unwrap_or_default()
            );
            return Err(err.into());
        }

        Ok(SyncOutcome::done())
    }

    async fn sync(
        &self,
        ctx: &SyncContext,
        p_obj: DynamicObject,
        v_obj: DynamicObject,
    ) -> Result<SyncOutcome, SyncError> {
        let (meta_changed, annotations, labels) =
            self.base.translate_metadata_update(&v_obj, &p_obj);
        let desired = self.translate(&v_obj);
        let body_changed = p_obj.data != desired.data;
        if !meta_changed && !body_changed {
            return Ok(SyncOutcome::done());
        }

        let mut updated = p_obj.clone();
        updated.data = desired.data;
        updated.metadata.annotations = Some(annotations);
        updated.metadata.labels = Some(labels);

        if let Err(err) = ctx.physical_client.update(self.gvk(), &updated).await {
            self.base
                .record_sync_error(&v_obj, &format!("Error syncing: {err}"))
                .await;
            return Err(err.into());
        }

        Ok(SyncOutcome::done())
    }
}
