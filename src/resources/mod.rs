//! # Resource syncers
//!
//! Per-kind plugins for the sync engine. Three archetypes:
//!
//! - **virtual -> host owned** ([`secrets`], [`priorityclasses`],
//!   [`volumesnapshots`]): the virtual cluster is the source of truth and
//!   the host side is a projection.
//! - **host -> virtual mirror** ([`storageclasses`]): the host cluster is
//!   the source of truth and the virtual side is a projection.
//! - **bridge** ([`endpoints`]): management is handed back and forth with
//!   an in-cluster controller depending on related object state.

pub mod endpoints;
pub mod priorityclasses;
pub mod secrets;
pub mod storageclasses;
pub mod volumesnapshots;
