//! # Configuration
//!
//! Configuration surface consumed by the syncer engine.
//!
//! `SyncConfig` carries the per-kind enablement flags that gate which
//! mappers and syncers get registered. `SyncerOptions` carries the static
//! per-syncer options a plugin may override via
//! [`Syncer::options`](crate::syncer::types::Syncer::options).

use serde::{Deserialize, Serialize};

/// Per-kind enablement flags for both sync directions.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub to_host: ToHostSync,
    pub from_host: FromHostSync,
}

/// Kinds whose source of truth is the virtual cluster; the host side is a
/// projection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToHostSync {
    pub secrets: SyncKind,
    pub config_maps: SyncKind,
    pub endpoints: SyncKind,
    pub priority_classes: SyncKind,
    pub storage_classes: SyncKind,
    pub volume_snapshots: SyncKind,
}

impl Default for ToHostSync {
    fn default() -> Self {
        Self {
            secrets: SyncKind::enabled(),
            config_maps: SyncKind::enabled(),
            endpoints: SyncKind::enabled(),
            priority_classes: SyncKind::disabled(),
            storage_classes: SyncKind::disabled(),
            volume_snapshots: SyncKind::disabled(),
        }
    }
}

/// Kinds whose source of truth is the host cluster; the virtual side is a
/// projection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FromHostSync {
    pub storage_classes: SyncKind,
    pub csi_drivers: SyncKind,
    pub csi_nodes: SyncKind,
    pub csi_storage_capacities: SyncKind,
    pub ingress_classes: SyncKind,
}

impl Default for FromHostSync {
    fn default() -> Self {
        Self {
            storage_classes: SyncKind::disabled(),
            csi_drivers: SyncKind::enabled(),
            csi_nodes: SyncKind::enabled(),
            csi_storage_capacities: SyncKind::disabled(),
            ingress_classes: SyncKind::disabled(),
        }
    }
}

/// Enablement flag for one resource kind.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncKind {
    pub enabled: bool,
}

impl SyncKind {
    #[must_use]
    pub fn enabled() -> Self {
        Self { enabled: true }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self { enabled: false }
    }
}

/// Static options a syncer plugin may provide at registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncerOptions {
    /// Disables the UID-mismatch delete policy: when set, a host object
    /// whose recorded virtual UID no longer matches the live virtual object
    /// is left in place instead of being deleted and recreated.
    pub disable_uid_deletion: bool,
}
