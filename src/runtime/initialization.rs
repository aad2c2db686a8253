//! # Initialization
//!
//! Controller startup: rustls setup, tracing, configuration, the Kubernetes client,
//! the controller's own key, broker instances, metrics and the HTTP server.
//!
//! Startup work against the cluster must finish within `STARTUP_DEADLINE_SECS`,
//! otherwise the process exits and is restarted.

use crate::cluster::{ClusterClient, KubeClusterClient};
use crate::config::{BackoffKind, ControllerConfig};
use crate::constants::STARTUP_DEADLINE_SECS;
use crate::controller::backoff::{BackoffPolicy, FibonacciBackoff, FixedBackoff};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::jwk::Jwk;
use crate::observability::refresh::start_metrics_refresh;
use crate::observability::{MetricsSink, PrometheusMetrics};
use crate::runtime::bootstrap;
use crate::tokendings::{Instance, Tokendings, TokendingsClient};
use anyhow::{anyhow, Context, Result};
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub config: ControllerConfig,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .field(
                "server_ready",
                &self
                    .server_state
                    .is_ready
                    .load(std::sync::atomic::Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

pub async fn initialize() -> Result<InitializationResult> {
    // Must run before any TLS connection is made
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|e| anyhow!("failed to install rustls crypto provider: {e:?}"))?;

    let config = ControllerConfig::load()?;
    init_tracing(&config)?;

    info!("Starting jwker controller");
    info!(
        "Build info: version={}, datetime={}",
        env!("JWKER_BUILD_VERSION"),
        env!("JWKER_BUILD_DATETIME")
    );
    info!(
        cluster = %config.cluster_name,
        instances = ?config.tokendings_instances,
        "loaded configuration"
    );

    let client = Client::try_default()
        .await
        .context("creating Kubernetes client")?;
    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(client.clone()));

    let controller_jwk = tokio::time::timeout(
        Duration::from_secs(STARTUP_DEADLINE_SECS),
        bootstrap_controller_key(cluster.as_ref(), &config),
    )
    .await
    .context("timed out bootstrapping controller key")??;

    let instances = config
        .tokendings_instances
        .iter()
        .map(|url| Instance::new(url, config.client_id.clone(), controller_jwk.clone()))
        .collect::<Result<Vec<_>, _>>()?;
    let http = TokendingsClient::new(config.broker_timeout(), config.assertion_validity())?;
    let broker = Arc::new(Tokendings::new(http, instances));

    let prometheus = Arc::new(PrometheusMetrics::new()?);
    let server_state = Arc::new(ServerState::new(prometheus.registry().clone()));
    let metrics: Arc<dyn MetricsSink> = prometheus;

    let server = Arc::clone(&server_state);
    let port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(port, server).await {
            error!("HTTP server error: {}", e);
        }
    });

    start_metrics_refresh(
        Arc::clone(&cluster),
        Arc::clone(&metrics),
        config.metrics_refresh_interval(),
    );

    let reconciler = Arc::new(Reconciler::new(
        cluster,
        broker,
        metrics,
        backoff_policy(&config),
        config.cluster_name.clone(),
    ));

    Ok(InitializationResult {
        client,
        config,
        reconciler,
        server_state,
    })
}

async fn bootstrap_controller_key(cluster: &dyn ClusterClient, config: &ControllerConfig) -> Result<Jwk> {
    let jwk = match &config.client_jwk_file {
        Some(path) => bootstrap::load_jwk_file(path).await?,
        None => {
            bootstrap::ensure_private_jwk_secret(
                cluster,
                &config.controller_namespace,
                &config.private_jwk_secret_name,
            )
            .await?
        }
    };

    if let Some(name) = &config.shared_public_secret_name {
        bootstrap::ensure_public_secret(cluster, &config.controller_namespace, name, &jwk).await?;
    }
    Ok(jwk)
}

pub fn backoff_policy(config: &ControllerConfig) -> Arc<dyn BackoffPolicy> {
    match config.backoff {
        BackoffKind::Fixed => Arc::new(FixedBackoff::new(config.requeue_interval())),
        BackoffKind::Fibonacci => Arc::new(FibonacciBackoff::new(
            config.requeue_interval(),
            config.backoff_max(),
        )),
    }
}

fn init_tracing(config: &ControllerConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("jwker_controller={}", config.log_level)))
        .context("invalid log level")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if config.log_format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}
