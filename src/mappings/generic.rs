//! Generic mapper implementations the per-kind constructors compose.

use std::sync::Arc;

use kube::core::{DynamicObject, GroupVersionKind};

use super::Mapper;
use crate::constants::{NAME_ANNOTATION, NAMESPACE_ANNOTATION};
use crate::translate::{annotation, NameTranslator, NamespacedName};

/// Mapper for kinds that are globally visible under identical names in both
/// clusters (cluster-scoped mirrors, e.g. host-sourced storage classes).
pub struct MirrorMapper {
    gvk: GroupVersionKind,
}

impl MirrorMapper {
    #[must_use]
    pub fn new(gvk: GroupVersionKind) -> Self {
        Self { gvk }
    }
}

impl Mapper for MirrorMapper {
    fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    fn virtual_to_host(
        &self,
        req: &NamespacedName,
        _v_obj: Option<&DynamicObject>,
    ) -> NamespacedName {
        req.clone()
    }

    fn host_to_virtual(
        &self,
        req: &NamespacedName,
        p_obj: Option<&DynamicObject>,
    ) -> NamespacedName {
        if let Some(p_obj) = p_obj {
            if let Some(name) = annotation(p_obj, NAME_ANNOTATION).filter(|n| !n.is_empty()) {
                return NamespacedName::new(
                    annotation(p_obj, NAMESPACE_ANNOTATION).unwrap_or_default(),
                    name,
                );
            }
        }

        // namespaced requests cannot be recovered without the object
        if !req.namespace.is_empty() {
            return NamespacedName::default();
        }

        req.clone()
    }

    fn is_managed(&self, _p_obj: &DynamicObject) -> bool {
        true
    }
}

/// Mapper for namespaced kinds synced into the single host workload
/// namespace under hash-suffixed names.
pub struct NamespacedMapper {
    gvk: GroupVersionKind,
    translator: Arc<NameTranslator>,
}

impl NamespacedMapper {
    #[must_use]
    pub fn new(gvk: GroupVersionKind, translator: Arc<NameTranslator>) -> Self {
        Self { gvk, translator }
    }
}

impl Mapper for NamespacedMapper {
    fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    fn virtual_to_host(
        &self,
        req: &NamespacedName,
        _v_obj: Option<&DynamicObject>,
    ) -> NamespacedName {
        if req.name.is_empty() {
            return NamespacedName::default();
        }

        NamespacedName::new(
            self.translator.physical_namespace(&req.namespace),
            self.translator.physical_name(&req.name, &req.namespace),
        )
    }

    fn host_to_virtual(
        &self,
        _req: &NamespacedName,
        p_obj: Option<&DynamicObject>,
    ) -> NamespacedName {
        // identity is recovered from the marker annotations; without the
        // object (delete event) there is nothing to recover
        let Some(p_obj) = p_obj else {
            return NamespacedName::default();
        };

        match annotation(p_obj, NAME_ANNOTATION).filter(|n| !n.is_empty()) {
            Some(name) => NamespacedName::new(
                annotation(p_obj, NAMESPACE_ANNOTATION).unwrap_or_default(),
                name,
            ),
            None => NamespacedName::default(),
        }
    }

    fn is_managed(&self, p_obj: &DynamicObject) -> bool {
        self.translator.is_managed(p_obj)
    }
}

/// Resolves the host name for a cluster-scoped virtual object. The default
/// is the hash-suffixed cluster-scoped encoding; kinds with back-references
/// (volume snapshot contents adopted from the host) override it.
pub type ClusterScopedNameFn =
    Box<dyn Fn(&str, Option<&DynamicObject>) -> String + Send + Sync>;

/// Mapper for cluster-scoped kinds owned by the virtual cluster.
pub struct ClusterScopedMapper {
    gvk: GroupVersionKind,
    translator: Arc<NameTranslator>,
    name_fn: Option<ClusterScopedNameFn>,
}

impl ClusterScopedMapper {
    #[must_use]
    pub fn new(gvk: GroupVersionKind, translator: Arc<NameTranslator>) -> Self {
        Self {
            gvk,
            translator,
            name_fn: None,
        }
    }

    /// Mapper with a custom virtual-to-host name resolver.
    #[must_use]
    pub fn with_name_fn(
        gvk: GroupVersionKind,
        translator: Arc<NameTranslator>,
        name_fn: ClusterScopedNameFn,
    ) -> Self {
        Self {
            gvk,
            translator,
            name_fn: Some(name_fn),
        }
    }
}

impl Mapper for ClusterScopedMapper {
    fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    fn virtual_to_host(
        &self,
        req: &NamespacedName,
        v_obj: Option<&DynamicObject>,
    ) -> NamespacedName {
        if req.name.is_empty() {
            return NamespacedName::default();
        }

        let name = match &self.name_fn {
            Some(name_fn) => name_fn(&req.name, v_obj),
            None => self.translator.physical_name_cluster_scoped(&req.name),
        };

        NamespacedName::cluster_scoped(name)
    }

    fn host_to_virtual(
        &self,
        _req: &NamespacedName,
        p_obj: Option<&DynamicObject>,
    ) -> NamespacedName {
        let Some(p_obj) = p_obj else {
            return NamespacedName::default();
        };

        match annotation(p_obj, NAME_ANNOTATION).filter(|n| !n.is_empty()) {
            Some(name) => NamespacedName::cluster_scoped(name),
            None => NamespacedName::default(),
        }
    }

    fn is_managed(&self, p_obj: &DynamicObject) -> bool {
        self.translator.is_managed_cluster_scoped(p_obj)
    }
}
