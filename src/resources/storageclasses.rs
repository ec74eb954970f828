//! Storage class syncer: host -> virtual mirror.
//!
//! The host cluster is the source of truth; the virtual side is a
//! projection kept converged on the host state.

use std::sync::Arc;

use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind};
use tracing::info;

use crate::mappings::resources::storage_classes_gvk;
use crate::mappings::Mapper;
use crate::syncer::context::{RegisterContext, SyncContext};
use crate::syncer::controller::delete_virtual_object;
use crate::syncer::translator::MirrorTranslator;
use crate::syncer::types::{SyncError, SyncOutcome, Syncer, ToVirtualSyncer};

pub fn new(ctx: &RegisterContext) -> Result<Arc<dyn Syncer>, SyncError> {
    Ok(Arc::new(StorageClassSyncer {
        base: MirrorTranslator::new(ctx, "storageclass", storage_classes_gvk())?,
    }))
}

struct StorageClassSyncer {
    base: MirrorTranslator,
}

#[async_trait]
impl Syncer for StorageClassSyncer {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn gvk(&self) -> &GroupVersionKind {
        self.base.gvk()
    }

    fn mapper(&self) -> &dyn Mapper {
        self.base.mapper()
    }

    fn to_virtual(&self) -> Option<&dyn ToVirtualSyncer> {
        Some(self)
    }

    async fn sync_to_host(
        &self,
        ctx: &SyncContext,
        v_obj: DynamicObject,
    ) -> Result<SyncOutcome, SyncError> {
        delete_virtual_object(ctx, self.gvk(), &v_obj, "physical object is missing").await
    }

    async fn sync(
        &self,
        ctx: &SyncContext,
        p_obj: DynamicObject,
        v_obj: DynamicObject,
    ) -> Result<SyncOutcome, SyncError> {
        let Some(updated) = self.base.translate_update_to_virtual(&p_obj, &v_obj) else {
            return Ok(SyncOutcome::done());
        };

        info!(
            "update virtual storage class {}, because host object changed",
            v_obj.metadata.name.as_deref().unwrap_or_default()
        );
        ctx.virtual_client.update(self.gvk(), &updated).await?;
        Ok(SyncOutcome::done())
    }
}

#[async_trait]
impl ToVirtualSyncer for StorageClassSyncer {
    async fn sync_to_virtual(
        &self,
        ctx: &SyncContext,
        p_obj: DynamicObject,
    ) -> Result<SyncOutcome, SyncError> {
        let v_obj = self.base.translate_to_virtual(&p_obj);
        info!(
            "create storage class {}, because it does not exist in virtual cluster",
            v_obj.metadata.name.as_deref().unwrap_or_default()
        );
        ctx.virtual_client.create(self.gvk(), &v_obj).await?;
        Ok(SyncOutcome::done())
    }
}
