//! # Sync engine
//!
//! The generic reconciliation engine and the contracts resource plugins
//! implement. See [`controller::SyncController`] for the reconcile
//! algorithm and [`types::Syncer`] for the plugin contract.

pub mod backoff;
pub mod context;
pub mod controller;
pub mod request;
pub mod translator;
pub mod types;

pub use context::{EventSource, RegisterContext, SyncContext};
pub use controller::{
    delete_host_object, delete_virtual_object, register_syncer, EventSources, SyncController,
};
pub use request::SyncRequest;
pub use types::{SyncError, SyncOutcome, Syncer};
