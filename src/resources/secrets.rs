//! Secret syncer: virtual -> host owned.

use std::sync::Arc;

use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind};

use crate::mappings::resources::secrets_gvk;
use crate::mappings::Mapper;
use crate::syncer::context::{RegisterContext, SyncContext};
use crate::syncer::translator::GenericTranslator;
use crate::syncer::types::{SyncError, SyncOutcome, Syncer};

pub fn new(ctx: &RegisterContext) -> Result<Arc<dyn Syncer>, SyncError> {
    Ok(Arc::new(SecretSyncer {
        base: GenericTranslator::new(ctx, "secret", secrets_gvk())?,
    }))
}

struct SecretSyncer {
    base: GenericTranslator,
}

#[async_trait]
impl Syncer for SecretSyncer {
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
        let p_obj = self.base.translate_metadata(&v_obj);
        self.base.sync_to_host_create(ctx, &v_obj, p_obj).await
    }

    async fn sync(
        &self,
        ctx: &SyncContext,
        p_obj: DynamicObject,
        v_obj: DynamicObject,
    ) -> Result<SyncOutcome, SyncError> {
        let (meta_changed, annotations, labels) =
            self.base.translate_metadata_update(&v_obj, &p_obj);
        let body_changed = p_obj.data != v_obj.data;
        if !meta_changed && !body_changed {
            return Ok(SyncOutcome::done());
        }

        let mut updated = p_obj.clone();
        updated.data = v_obj.data.clone();
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
