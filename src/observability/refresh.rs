//! # Cluster Gauge Refresh
//!
//! Periodically counts `Jwker` resources and managed secrets across the cluster.

use crate::cluster::ClusterClient;
use crate::constants::{SECRET_TYPE_LABEL_KEY, SECRET_TYPE_LABEL_VALUE};
use crate::observability::MetricsSink;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Update `jwker_total` and `jwker_secrets_total` once
pub async fn refresh_cluster_metrics(cluster: &dyn ClusterClient, metrics: &dyn MetricsSink) -> Result<()> {
    let selector = format!("{SECRET_TYPE_LABEL_KEY}={SECRET_TYPE_LABEL_VALUE}");
    let secrets = cluster.list_secrets(None, &selector).await?;
    metrics.set_secrets_total(i64::try_from(secrets.len()).unwrap_or(i64::MAX));

    let jwkers = cluster.list_jwkers().await?;
    metrics.set_jwkers_total(i64::try_from(jwkers.len()).unwrap_or(i64::MAX));

    debug!(jwkers = jwkers.len(), secrets = secrets.len(), "refreshed cluster metrics");
    Ok(())
}

/// Spawn the refresh loop; failures are logged and retried on the next tick
pub fn start_metrics_refresh(
    cluster: Arc<dyn ClusterClient>,
    metrics: Arc<dyn MetricsSink>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(e) = refresh_cluster_metrics(cluster.as_ref(), metrics.as_ref()).await {
                warn!("Failed to refresh cluster metrics: {:#}", e);
            }
        }
    })
}
