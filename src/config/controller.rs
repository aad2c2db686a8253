//! # Controller Configuration
//!
//! Controller-level settings. Every flag can also be supplied through the environment
//! variable named next to it, which is how the deployment populates them.

use crate::constants::{
    DEFAULT_ASSERTION_VALIDITY_SECS, DEFAULT_BACKOFF_MAX_SECS, DEFAULT_BROKER_TIMEOUT_SECS,
    DEFAULT_CONTROLLER_NAMESPACE, DEFAULT_MAX_CONCURRENT_RECONCILES,
    DEFAULT_METRICS_REFRESH_INTERVAL_SECS, DEFAULT_PRIVATE_JWK_SECRET_NAME,
    DEFAULT_REQUEUE_INTERVAL_SECS,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Requeue policy after a failed reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackoffKind {
    /// Always wait `requeue_interval_secs`
    Fixed,
    /// Fibonacci growth from `requeue_interval_secs` up to `backoff_max_secs`
    Fibonacci,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "jwker-controller", version, about = "Issues TokenX client identities for Jwker resources")]
pub struct Cli {
    /// Name of the cluster, first segment of every client id
    #[arg(long, env = "CLUSTER_NAME")]
    pub cluster_name: String,

    /// Client id of this controller at the broker
    #[arg(long, env = "JWKER_CLIENT_ID")]
    pub client_id: String,

    /// File with the controller's private JWK; when absent the key is kept in a secret
    #[arg(long, env = "JWKER_CLIENT_JWK_FILE")]
    pub client_jwk_file: Option<PathBuf>,

    /// Comma separated base URLs of the tokendings instances
    #[arg(long, env = "TOKENDINGS_INSTANCES", value_delimiter = ',')]
    pub tokendings_instances: Vec<String>,

    /// Single tokendings base URL, used when no instance list is given
    #[arg(long, env = "TOKENDINGS_URL")]
    pub tokendings_url: Option<String>,

    #[arg(long, env = "POD_NAMESPACE", default_value = DEFAULT_CONTROLLER_NAMESPACE)]
    pub controller_namespace: String,

    #[arg(long, env = "PRIVATE_JWK_SECRET_NAME", default_value = DEFAULT_PRIVATE_JWK_SECRET_NAME)]
    pub private_jwk_secret_name: String,

    /// Secret receiving the controller's public JWKS, skipped when unset
    #[arg(long, env = "SHARED_PUBLIC_SECRET_NAME")]
    pub shared_public_secret_name: Option<String>,

    #[arg(long, env = "METRICS_PORT", default_value_t = crate::constants::DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    #[arg(long, env = "MAX_CONCURRENT_RECONCILES", default_value_t = DEFAULT_MAX_CONCURRENT_RECONCILES)]
    pub max_concurrent_reconciles: u16,

    /// Default tracing filter, overridden by RUST_LOG
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format: json or text
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    #[arg(long, env = "ASSERTION_VALIDITY_SECS", default_value_t = DEFAULT_ASSERTION_VALIDITY_SECS)]
    pub assertion_validity_secs: u64,

    #[arg(long, env = "BROKER_TIMEOUT_SECS", default_value_t = DEFAULT_BROKER_TIMEOUT_SECS)]
    pub broker_timeout_secs: u64,

    #[arg(long, env = "REQUEUE_INTERVAL_SECS", default_value_t = DEFAULT_REQUEUE_INTERVAL_SECS)]
    pub requeue_interval_secs: u64,

    #[arg(long, env = "BACKOFF", value_enum, default_value_t = BackoffKind::Fixed)]
    pub backoff: BackoffKind,

    #[arg(long, env = "BACKOFF_MAX_SECS", default_value_t = DEFAULT_BACKOFF_MAX_SECS)]
    pub backoff_max_secs: u64,

    #[arg(long, env = "METRICS_REFRESH_INTERVAL_SECS", default_value_t = DEFAULT_METRICS_REFRESH_INTERVAL_SECS)]
    pub metrics_refresh_interval_secs: u64,
}

/// Controller-level configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub cluster_name: String,
    pub client_id: String,
    pub client_jwk_file: Option<PathBuf>,
    /// Broker base URLs in the order they are registered with
    pub tokendings_instances: Vec<String>,
    pub controller_namespace: String,
    pub private_jwk_secret_name: String,
    pub shared_public_secret_name: Option<String>,
    pub metrics_port: u16,
    pub max_concurrent_reconciles: u16,
    pub log_level: String,
    pub log_format: String,
    pub assertion_validity_secs: u64,
    pub broker_timeout_secs: u64,
    pub requeue_interval_secs: u64,
    pub backoff: BackoffKind,
    pub backoff_max_secs: u64,
    pub metrics_refresh_interval_secs: u64,
}

impl From<Cli> for ControllerConfig {
    fn from(cli: Cli) -> Self {
        let mut tokendings_instances: Vec<String> = cli
            .tokendings_instances
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if tokendings_instances.is_empty() {
            tokendings_instances.extend(cli.tokendings_url.filter(|url| !url.trim().is_empty()));
        }

        Self {
            cluster_name: cli.cluster_name,
            client_id: cli.client_id,
            client_jwk_file: cli.client_jwk_file,
            tokendings_instances,
            controller_namespace: cli.controller_namespace,
            private_jwk_secret_name: cli.private_jwk_secret_name,
            shared_public_secret_name: cli.shared_public_secret_name.filter(|name| !name.is_empty()),
            metrics_port: cli.metrics_port,
            max_concurrent_reconciles: cli.max_concurrent_reconciles,
            log_level: cli.log_level,
            log_format: cli.log_format,
            assertion_validity_secs: cli.assertion_validity_secs,
            broker_timeout_secs: cli.broker_timeout_secs,
            requeue_interval_secs: cli.requeue_interval_secs,
            backoff: cli.backoff,
            backoff_max_secs: cli.backoff_max_secs,
            metrics_refresh_interval_secs: cli.metrics_refresh_interval_secs,
        }
    }
}

impl ControllerConfig {
    /// Parse flags from the process arguments and environment, then validate
    pub fn load() -> Result<Self> {
        let config = Self::from(Cli::parse());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            bail!("cluster name must not be empty");
        }
        if self.client_id.trim().is_empty() {
            bail!("controller client id must not be empty");
        }
        if self.tokendings_instances.is_empty() {
            bail!("at least one tokendings instance must be configured");
        }
        for instance in &self.tokendings_instances {
            url::Url::parse(instance).with_context(|| format!("invalid tokendings URL '{instance}'"))?;
        }
        if self.max_concurrent_reconciles == 0 {
            bail!("max concurrent reconciles must be at least 1");
        }
        for (flag, secs) in [
            ("assertion validity", self.assertion_validity_secs),
            ("broker timeout", self.broker_timeout_secs),
            ("requeue interval", self.requeue_interval_secs),
            ("metrics refresh interval", self.metrics_refresh_interval_secs),
        ] {
            if secs == 0 {
                bail!("{flag} must be at least 1 second");
            }
        }
        Ok(())
    }

    pub fn assertion_validity(&self) -> Duration {
        Duration::from_secs(self.assertion_validity_secs)
    }

    pub fn broker_timeout(&self) -> Duration {
        Duration::from_secs(self.broker_timeout_secs)
    }

    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_interval_secs)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn metrics_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_refresh_interval_secs)
    }
}
