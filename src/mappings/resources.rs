//! Per-kind mapper constructors and startup registration.
//!
//! Mappers are registered independently of syncers: a kind can be mapped
//! (so cross-kind lookups like owner translation work) even when no syncer
//! is wired up for it in this process.

use std::sync::Arc;

use kube::core::GroupVersionKind;

use super::generic::{ClusterScopedMapper, MirrorMapper, NamespacedMapper};
use super::{Mapper, MappingError};
use crate::constants::HOST_CONTENT_NAME_ANNOTATION;
use crate::syncer::context::RegisterContext;
use crate::translate::{annotation, NameTranslator};

pub fn secrets_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("", "v1", "Secret")
}

pub fn config_maps_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("", "v1", "ConfigMap")
}

pub fn endpoints_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("", "v1", "Endpoints")
}

pub fn services_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("", "v1", "Service")
}

pub fn priority_classes_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("scheduling.k8s.io", "v1", "PriorityClass")
}

pub fn storage_classes_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("storage.k8s.io", "v1", "StorageClass")
}

pub fn csi_drivers_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("storage.k8s.io", "v1", "CSIDriver")
}

pub fn csi_nodes_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("storage.k8s.io", "v1", "CSINode")
}

pub fn csi_storage_capacities_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("storage.k8s.io", "v1", "CSIStorageCapacity")
}

pub fn ingress_classes_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("networking.k8s.io", "v1", "IngressClass")
}

pub fn volume_snapshots_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("snapshot.storage.k8s.io", "v1", "VolumeSnapshot")
}

pub fn volume_snapshot_contents_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("snapshot.storage.k8s.io", "v1", "VolumeSnapshotContent")
}

/// Register every mapper enabled by the configuration. One-shot at startup.
pub fn register_mappings(ctx: &RegisterContext) -> Result<(), MappingError> {
    for mapper in build_mappers(ctx) {
        ctx.mappers.add(mapper)?;
    }

    Ok(())
}

fn namespaced(gvk: GroupVersionKind, translator: &Arc<NameTranslator>) -> Arc<dyn Mapper> {
    Arc::new(NamespacedMapper::new(gvk, translator.clone()))
}

fn cluster_scoped(gvk: GroupVersionKind, translator: &Arc<NameTranslator>) -> Arc<dyn Mapper> {
    Arc::new(ClusterScopedMapper::new(gvk, translator.clone()))
}

fn mirror(gvk: GroupVersionKind) -> Arc<dyn Mapper> {
    Arc::new(MirrorMapper::new(gvk))
}

fn build_mappers(ctx: &RegisterContext) -> Vec<Arc<dyn Mapper>> {
    let translator = &ctx.translator;
    let config = &ctx.config;

    let mut mappers: Vec<Arc<dyn Mapper>> = vec![
        namespaced(secrets_gvk(), translator),
        namespaced(config_maps_gvk(), translator),
        namespaced(endpoints_gvk(), translator),
        namespaced(services_gvk(), translator),
    ];

    if config.to_host.priority_classes.enabled {
        mappers.push(cluster_scoped(priority_classes_gvk(), translator));
    }

    // storage classes may be owned by either side, never both
    if config.to_host.storage_classes.enabled {
        mappers.push(cluster_scoped(storage_classes_gvk(), translator));
    } else if config.from_host.storage_classes.enabled {
        mappers.push(mirror(storage_classes_gvk()));
    }

    if config.from_host.csi_drivers.enabled {
        mappers.push(mirror(csi_drivers_gvk()));
    }
    if config.from_host.csi_nodes.enabled {
        mappers.push(mirror(csi_nodes_gvk()));
    }
    if config.from_host.csi_storage_capacities.enabled {
        mappers.push(mirror(csi_storage_capacities_gvk()));
    }
    if config.from_host.ingress_classes.enabled {
        mappers.push(mirror(ingress_classes_gvk()));
    }

    if config.to_host.volume_snapshots.enabled {
        mappers.push(namespaced(volume_snapshots_gvk(), translator));
        mappers.push(volume_snapshot_contents_mapper(translator.clone()));
    } else {
        mappers.push(mirror(volume_snapshot_contents_gvk()));
    }

    mappers
}

/// Snapshot contents adopted from the host carry a back-reference to the
/// host-side content name; translated contents use the hashed encoding.
fn volume_snapshot_contents_mapper(translator: Arc<NameTranslator>) -> Arc<dyn Mapper> {
    let resolver_translator = translator.clone();
    Arc::new(ClusterScopedMapper::with_name_fn(
        volume_snapshot_contents_gvk(),
        translator,
        Box::new(move |name, v_obj| {
            v_obj
                .and_then(|obj| annotation(obj, HOST_CONTENT_NAME_ANNOTATION))
                .filter(|host_name| !host_name.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| resolver_translator.physical_name_cluster_scoped(name))
        }),
    ))
}
