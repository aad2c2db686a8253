//! # Observability
//!
//! - `metrics`: Prometheus metrics behind the injectable `MetricsSink`
//! - `refresh`: periodic cluster-wide gauge refresh

pub mod metrics;
pub mod refresh;

pub use metrics::{MetricsSink, PrometheusMetrics};
