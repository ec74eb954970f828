//! # Name mapping registry
//!
//! Per-kind mappers translating object identities between the virtual and
//! host clusters, plus the process-wide registry the engine looks them up
//! in.
//!
//! Registration happens once at startup; lookups afterwards are read-only
//! and safe for concurrent readers.

pub mod generic;
pub mod resources;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use kube::core::{DynamicObject, GroupVersionKind};
use thiserror::Error;

use crate::translate::NamespacedName;

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("no mapper registered for kind {0}")]
    KindNotRegistered(String),

    #[error("mapper for kind {0} is already registered")]
    AlreadyRegistered(String),
}

/// Identity translation for one kind.
///
/// The mapping is total on the virtual side. On the host side it is
/// partial: a host object may be unmapped (foreign), in which case
/// `host_to_virtual` returns an empty identity and `is_managed` returns
/// false.
pub trait Mapper: Send + Sync {
    fn gvk(&self) -> &GroupVersionKind;

    /// Host identity for a virtual identity. `v_obj` is the live virtual
    /// object when available; some mappers consult it (back-references).
    fn virtual_to_host(
        &self,
        req: &NamespacedName,
        v_obj: Option<&DynamicObject>,
    ) -> NamespacedName;

    /// Virtual identity for a host identity. `p_obj` may be absent (delete
    /// events); mappers return an empty identity when they cannot recover
    /// one, and callers must tolerate that.
    fn host_to_virtual(
        &self,
        req: &NamespacedName,
        p_obj: Option<&DynamicObject>,
    ) -> NamespacedName;

    /// Whether a host object is owned by this process. Foreign objects are
    /// never mutated.
    fn is_managed(&self, p_obj: &DynamicObject) -> bool;
}

impl std::fmt::Debug for dyn Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Mapper").field(self.gvk()).finish()
    }
}

fn gvk_key(gvk: &GroupVersionKind) -> String {
    format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
}

/// Process-wide `GVK -> Mapper` table.
///
/// Built once at startup and injected into the register context; not an
/// ambient global.
#[derive(Default)]
pub struct MapperRegistry {
    mappers: RwLock<HashMap<String, Arc<dyn Mapper>>>,
}

impl MapperRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, mapper: Arc<dyn Mapper>) -> Result<(), MappingError> {
        let key = gvk_key(mapper.gvk());
        let mut mappers = self.mappers.write().unwrap_or_else(|e| e.into_inner());
        if mappers.contains_key(&key) {
            return Err(MappingError::AlreadyRegistered(key));
        }

        mappers.insert(key, mapper);
        Ok(())
    }

    pub fn by_gvk(&self, gvk: &GroupVersionKind) -> Result<Arc<dyn Mapper>, MappingError> {
        let key = gvk_key(gvk);
        let mappers = self.mappers.read().unwrap_or_else(|e| e.into_inner());
        mappers
            .get(&key)
            .cloned()
            .ok_or(MappingError::KindNotRegistered(key))
    }

    #[must_use]
    pub fn has(&self, gvk: &GroupVersionKind) -> bool {
        let mappers = self.mappers.read().unwrap_or_else(|e| e.into_inner());
        mappers.contains_key(&gvk_key(gvk))
    }
}

#[cfg(test)]
mod tests {
    use super::generic::MirrorMapper;
    use super::*;

    fn storage_class_gvk() -> GroupVersionKind {
        GroupVersionKind::gvk("storage.k8s.io", "v1", "StorageClass")
    }

    #[test]
    fn test_lookup_unregistered_kind_fails() {
        let registry = MapperRegistry::new();
        let err = registry.by_gvk(&storage_class_gvk()).unwrap_err();
        assert!(matches!(err, MappingError::KindNotRegistered(_)));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = MapperRegistry::new();
        registry
            .add(Arc::new(MirrorMapper::new(storage_class_gvk())))
            .unwrap();
        let err = registry
            .add(Arc::new(MirrorMapper::new(storage_class_gvk())))
            .unwrap_err();
        assert!(matches!(err, MappingError::AlreadyRegistered(_)));
    }

    #[test]
    fn test_lookup_after_registration() {
        let registry = MapperRegistry::new();
        registry
            .add(Arc::new(MirrorMapper::new(storage_class_gvk())))
            .unwrap();
        let mapper = registry.by_gvk(&storage_class_gvk()).unwrap();
        assert_eq!(mapper.gvk().kind, "StorageClass");
    }
}
