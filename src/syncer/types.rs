//! # Syncer contract
//!
//! The typed interface each resource plugin implements, plus the optional
//! capabilities a plugin can expose. Capabilities are discovered through
//! accessor methods returning `Option<&dyn ...>` (populated at
//! registration), not through runtime downcasts.

use std::time::Duration;

use async_trait::async_trait;
use kube::core::{DynamicObject, GroupVersionKind};
use thiserror::Error;

use crate::client::ClientError;
use crate::config::SyncerOptions;
use crate::mappings::{Mapper, MappingError};
use crate::syncer::context::SyncContext;
use crate::syncer::request::SyncRequest;
use crate::translate::NamespacedName;

/// Errors produced by reconciles and syncer hooks.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A foreign host object occupies the desired name. Requeued with
    /// backoff after a warning event on the virtual object.
    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// Identity round-trip failure or similar programmer error.
    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result of one syncer hook invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub requeue_after: Option<Duration>,
}

impl SyncOutcome {
    /// Nothing further to do.
    #[must_use]
    pub fn done() -> Self {
        Self::default()
    }

    /// Revisit this key after a delay.
    #[must_use]
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }
}

/// A resource plugin: one kind, its identity mapping, and the three
/// transition hooks the engine dispatches to.
#[async_trait]
pub trait Syncer: Send + Sync {
    /// Stable identifier used in logs, events, and the controller
    /// annotation. Must not change for the lifetime of the process.
    fn name(&self) -> &str;

    /// The kind this syncer services.
    fn gvk(&self) -> &GroupVersionKind;

    /// Identity mapping for this kind.
    fn mapper(&self) -> &dyn Mapper;

    fn virtual_to_host(
        &self,
        req: &NamespacedName,
        v_obj: Option<&DynamicObject>,
    ) -> NamespacedName {
        self.mapper().virtual_to_host(req, v_obj)
    }

    fn host_to_virtual(
        &self,
        req: &NamespacedName,
        p_obj: Option<&DynamicObject>,
    ) -> NamespacedName {
        self.mapper().host_to_virtual(req, p_obj)
    }

    fn is_managed(&self, p_obj: &DynamicObject) -> bool {
        self.mapper().is_managed(p_obj)
    }

    /// Virtual object exists, host counterpart is absent: create or adopt
    /// on the host side.
    async fn sync_to_host(
        &self,
        ctx: &SyncContext,
        v_obj: DynamicObject,
    ) -> Result<SyncOutcome, SyncError>;

    /// Both objects exist: reconcile fields in both directions per kind
    /// policy.
    async fn sync(
        &self,
        ctx: &SyncContext,
        p_obj: DynamicObject,
        v_obj: DynamicObject,
    ) -> Result<SyncOutcome, SyncError>;

    /// Host-sourced capability: create the virtual counterpart of a host
    /// object. Kinds without it get the host object deleted instead when
    /// the virtual counterpart disappears.
    fn to_virtual(&self) -> Option<&dyn ToVirtualSyncer> {
        None
    }

    /// Pre/post reconcile hooks.
    fn starter(&self) -> Option<&dyn Starter> {
        None
    }

    /// Custom exclusion rules.
    fn excluder(&self) -> Option<&dyn ObjectExcluder> {
        None
    }

    /// Hook to add extra watch sources.
    fn modifier(&self) -> Option<&dyn ControllerModifier> {
        None
    }

    /// Static per-syncer options.
    fn options(&self) -> SyncerOptions {
        SyncerOptions::default()
    }
}

/// Capability of kinds whose source of truth is the host cluster.
#[async_trait]
pub trait ToVirtualSyncer: Send + Sync {
    /// Host object exists, virtual counterpart is absent.
    async fn sync_to_virtual(
        &self,
        ctx: &SyncContext,
        p_obj: DynamicObject,
    ) -> Result<SyncOutcome, SyncError>;
}

/// Pre-empts reconciles before any object is fetched.
#[async_trait]
pub trait Starter: Send + Sync {
    /// Returns `true` to skip the reconcile entirely.
    async fn reconcile_start(
        &self,
        ctx: &SyncContext,
        req: &SyncRequest,
    ) -> Result<bool, SyncError>;

    /// Always called after the reconcile, regardless of how
    /// `reconcile_start` returned.
    fn reconcile_end(&self);
}

/// Lets a plugin ignore objects it knows are managed by a sibling syncer.
pub trait ObjectExcluder: Send + Sync {
    fn exclude_virtual(&self, v_obj: &DynamicObject) -> bool;
    fn exclude_physical(&self, p_obj: &DynamicObject) -> bool;
}

/// Hook to contribute extra event sources to the controller at
/// registration (e.g. a cluster-wide cache for kinds the default host
/// watch does not cover).
pub trait ControllerModifier: Send + Sync {
    fn modify(
        &self,
        ctx: &crate::syncer::context::RegisterContext,
        sources: &mut crate::syncer::controller::EventSources,
    ) -> Result<(), SyncError>;
}
