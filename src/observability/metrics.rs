//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `jwker_processed_count` - Jwkers rolled out successfully
//! - `jwker_processing_failed_count` - Reconciles that ended in an error
//! - `jwker_finalized_count` - Jwkers deregistered and released for deletion
//! - `jwker_reconcile_duration_seconds` - Duration of reconciles that ran commit logic
//! - `jwker_total` - Jwker resources in the cluster
//! - `jwker_secrets_total` - Secrets managed by the controller in the cluster
//!
//! The reconciler only sees the `MetricsSink` trait; tests and alternative exporters
//! can supply their own implementation.

use anyhow::Result;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

/// Process-wide counters and gauges; implementations must be safe to share across workers
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    fn processed(&self);
    fn processing_failed(&self);
    fn finalized(&self);
    fn observe_reconcile_duration(&self, seconds: f64);
    fn set_jwkers_total(&self, count: i64);
    fn set_secrets_total(&self, count: i64);
}

/// `MetricsSink` backed by a dedicated Prometheus registry
#[derive(Debug, Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    processed: IntCounter,
    processing_failed: IntCounter,
    finalized: IntCounter,
    reconcile_duration: Histogram,
    jwkers_total: IntGauge,
    secrets_total: IntGauge,
}

impl PrometheusMetrics {
    /// Create and register all controller metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let processed = IntCounter::new("jwker_processed_count", "Number of jwkers processed")?;
        let processing_failed = IntCounter::new(
            "jwker_processing_failed_count",
            "Number of jwkers that failed to process",
        )?;
        let finalized = IntCounter::new("jwker_finalized_count", "Number of jwkers finalized")?;
        let reconcile_duration = Histogram::with_opts(
            HistogramOpts::new(
                "jwker_reconcile_duration_seconds",
                "Duration of jwker reconciliations in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;
        let jwkers_total = IntGauge::new("jwker_total", "Number of jwkers in the cluster")?;
        let secrets_total = IntGauge::new("jwker_secrets_total", "Number of jwker secrets total")?;

        registry.register(Box::new(processed.clone()))?;
        registry.register(Box::new(processing_failed.clone()))?;
        registry.register(Box::new(finalized.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(jwkers_total.clone()))?;
        registry.register(Box::new(secrets_total.clone()))?;

        Ok(Self {
            registry,
            processed,
            processing_failed,
            finalized,
            reconcile_duration,
            jwkers_total,
            secrets_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.get()
    }

    pub fn processing_failed_count(&self) -> u64 {
        self.processing_failed.get()
    }

    pub fn finalized_count(&self) -> u64 {
        self.finalized.get()
    }

    pub fn jwkers_total(&self) -> i64 {
        self.jwkers_total.get()
    }

    pub fn secrets_total(&self) -> i64 {
        self.secrets_total.get()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn processed(&self) {
        self.processed.inc();
    }

    fn processing_failed(&self) {
        self.processing_failed.inc();
    }

    fn finalized(&self) {
        self.finalized.inc();
    }

    fn observe_reconcile_duration(&self, seconds: f64) {
        self.reconcile_duration.observe(seconds);
    }

    fn set_jwkers_total(&self, count: i64) {
        self.jwkers_total.set(count);
    }

    fn set_secrets_total(&self, count: i64) {
        self.secrets_total.set(count);
    }
}
