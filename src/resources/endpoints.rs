//! Endpoints syncer: bridge between this process and the in-cluster
//! endpoints controller.
//!
//! Whether we manage the host endpoints of a service depends on the
//! service itself: services with a selector get their endpoints from the
//! native controller, selectorless services get them synced from the
//! virtual cluster. The pre-reconcile hook decides which side owns the
//! object and deletes stale host endpoints so the other owner can take
//! over.

use std::sync::Arc;

use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind};
use tracing::info;

use crate::constants::NAME_ANNOTATION;
use crate::mappings::resources::{endpoints_gvk, services_gvk};
use crate::mappings::Mapper;
use crate::syncer::context::{RegisterContext, SyncContext};
use crate::syncer::controller::delete_virtual_object;
use crate::syncer::request::SyncRequest;
use crate::syncer::translator::GenericTranslator;
use crate::syncer::types::{Starter, SyncError, SyncOutcome, Syncer};
use crate::translate::annotation;

pub fn new(ctx: &RegisterContext) -> Result<Arc<dyn Syncer>, SyncError> {
    Ok(Arc::new(EndpointsSyncer {
        base: GenericTranslator::new(ctx, "endpoints", endpoints_gvk())?,
    }))
}

struct EndpointsSyncer {
    base: GenericTranslator,
}

impl EndpointsSyncer {
    fn translate(&self, v_obj: &DynamicObject) -> DynamicObject {
        let mut p_obj = self.base.translate_metadata(v_obj);
        if let Some(subsets) = p_obj.data.get_mut("subsets") {
            strip_virtual_references(subsets);
        }
        p_obj
    }
}

/// Subset addresses reference virtual pods and nodes; those references
/// mean nothing to the host cluster.
fn strip_virtual_references(subsets: &mut serde_json::Value) {
    let Some(subsets) = subsets.as_array_mut() else {
        return;
    };

    for subset in subsets {
        for field in ["addresses", "notReadyAddresses"] {
            let Some(addresses) = subset.get_mut(field).and_then(|a| a.as_array_mut()) else {
                continue;
            };
            for address in addresses {
                if let Some(address) = address.as_object_mut() {
                    address.remove("targetRef");
                    address.remove("nodeName");
                }
            }
        }
    }
}

#[async_trait]
impl Syncer for EndpointsSyncer {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn gvk(&self) -> &GroupVersionKind {
        self.base.gvk()
    }

    fn mapper(&self) -> &dyn Mapper {
        self.base.mapper()
    }

    fn starter(&self) -> Option<&dyn Starter> {
        Some(self)
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

#[async_trait]
impl Starter for EndpointsSyncer {
    async fn reconcile_start(
        &self,
        ctx: &SyncContext,
        req: &SyncRequest,
    ) -> Result<bool, SyncError> {
        let service = match ctx.virtual_client.get(&services_gvk(), &req.to_name()).await {
            Ok(service) => service,
            Err(err) if err.is_not_found() => return Ok(true),
            Err(err) => return Err(err.into()),
        };

        let has_selector = service
            .data
            .get("spec")
            .and_then(|spec| spec.get("selector"))
            .and_then(|selector| selector.as_object())
            .is_some_and(|selector| !selector.is_empty());

        let host_name = self.virtual_to_host(&req.to_name(), None);

        if has_selector {
            // the native endpoints controller owns this object; drop any
            // endpoints we managed before so it can recreate them from the
            // selector
            let endpoints = match ctx.physical_client.get(self.gvk(), &host_name).await {
                Ok(endpoints) => endpoints,
                Err(err) => {
                    if !err.is_not_found() {
                        info!("error retrieving endpoints: {err}");
                    }
                    return Ok(true);
                }
            };

            if annotation(&endpoints, NAME_ANNOTATION).is_some_and(|name| !name.is_empty()) {
                info!(
                    "refresh endpoints {host_name} in host cluster because they should no longer be managed by this syncer"
                );
                if let Err(err) = ctx
                    .physical_client
                    .delete(self.gvk(), &host_name, &Default::default())
                    .await
                {
                    info!("error deleting endpoints {host_name}: {err}");
                    return Err(err.into());
                }
            }

            return Ok(true);
        }

        // selectorless service: we own the endpoints; drop a stale
        // native-controller-owned host object first
        if let Ok(endpoints) = ctx.physical_client.get(self.gvk(), &host_name).await {
            if annotation(&endpoints, NAME_ANNOTATION).unwrap_or_default().is_empty() {
                info!(
                    "refresh endpoints {host_name} in host cluster because they should be managed by this syncer now"
                );
                if let Err(err) = ctx
                    .physical_client
                    .delete(self.gvk(), &host_name, &Default::default())
                    .await
                {
                    info!("error deleting endpoints {host_name}: {err}");
                    return Err(err.into());
                }
            }
        }

        Ok(false)
    }

    fn reconcile_end(&self) {}
}
