//! # Virtual Cluster Syncer
//!
//! Object synchronization core of a virtual control-plane: a process that
//! presents a virtual cluster API to workloads while projecting selected
//! resources onto an underlying host cluster.
//!
//! Each resource kind is serviced by a syncer plugged into the common
//! reconciliation engine. The engine:
//!
//! 1. **Receives change events from both clusters** - wrapped with enqueue
//!    policies that tag every request with its provenance
//! 2. **Maps identities** - every logical object has a virtual identity and
//!    a host identity, translated per kind by the mapper registry
//! 3. **Decides the transition** - create on host, update both, adopt to
//!    virtual, or delete, based on which sides exist and the ownership
//!    markers
//! 4. **Serializes work** - reconciles on the same logical object never run
//!    concurrently
//!
//! The controller manager, informers, CRD installation, and the startup CLI
//! live outside this crate; event sources are injected as streams and
//! clients behind the [`client::ClusterClient`] trait.

pub mod client;
pub mod config;
pub mod constants;
pub mod mappings;
pub mod observability;
pub mod resources;
pub mod syncer;
pub mod testing;
pub mod translate;
