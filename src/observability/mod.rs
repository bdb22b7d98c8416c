//! Observability: Prometheus metrics exposition.

pub mod metrics;

pub use metrics::Metrics;
