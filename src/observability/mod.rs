//! Observability helpers (Prometheus metrics).

pub mod metrics;
