//! Contexts threaded through registration and reconciliation.

use std::sync::Arc;

use crate::client::{ClusterClient, EventRecorder};
use crate::config::SyncConfig;
use crate::mappings::MapperRegistry;
use crate::translate::NameTranslator;

/// Which cluster the event that triggered the current reconcile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Virtual,
    Host,
}

/// Everything a syncer needs at registration time.
#[derive(Clone)]
pub struct RegisterContext {
    pub config: Arc<SyncConfig>,
    /// Host-side workload namespace all synced namespaced objects land in.
    pub current_namespace: String,
    pub virtual_client: Arc<dyn ClusterClient>,
    pub physical_client: Arc<dyn ClusterClient>,
    pub virtual_event_recorder: Arc<dyn EventRecorder>,
    pub translator: Arc<NameTranslator>,
    pub mappers: Arc<MapperRegistry>,
}

/// Per-reconcile context handed to syncer hooks.
#[derive(Clone)]
pub struct SyncContext {
    pub virtual_client: Arc<dyn ClusterClient>,
    pub physical_client: Arc<dyn ClusterClient>,
    /// Host-side workload namespace.
    pub current_namespace: String,
    pub event_source: EventSource,
    /// The event that generated the current request was a deletion.
    pub is_delete: bool,
    pub translator: Arc<NameTranslator>,
    pub mappers: Arc<MapperRegistry>,
}

impl RegisterContext {
    /// Sync context for one reconcile pass.
    #[must_use]
    pub fn to_sync_context(&self, event_source: EventSource, is_delete: bool) -> SyncContext {
        SyncContext {
            virtual_client: self.virtual_client.clone(),
            physical_client: self.physical_client.clone(),
            current_namespace: self.current_namespace.clone(),
            event_source,
            is_delete,
            translator: self.translator.clone(),
            mappers: self.mappers.clone(),
        }
    }
}
