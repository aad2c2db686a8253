//! # Types
//!
//! Core types for the reconciler.

use crate::cluster::{ClusterClient, ClusterError};
use crate::controller::backoff::BackoffPolicy;
use crate::crd::{AccessPolicy, Jwker};
use crate::inventory::SecretLists;
use crate::jwk::{KeyError, KeySet};
use crate::observability::MetricsSink;
use crate::tokendings::{BrokerClient, ClientId};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Jwker is missing {0}")]
    MissingObjectKey(&'static str),
    #[error("prepare failed: {0:#}")]
    Prepare(#[source] anyhow::Error),
    #[error("synchronization failed: {0:#}")]
    Synchronization(#[source] anyhow::Error),
    #[error("finalize failed: {0:#}")]
    Finalize(#[source] anyhow::Error),
    #[error("key generation failed: {0}")]
    KeyGeneration(#[source] KeyError),
    #[error("status update failed: {0}")]
    Status(#[source] ClusterError),
    #[error("Reconciliation failed: {0:#}")]
    ReconciliationFailed(#[from] anyhow::Error),
}

/// Everything commit needs, computed by prepare without side effects
#[derive(Debug, Clone)]
pub struct Transaction {
    pub client_id: ClientId,
    pub spec_hash: String,
    pub secret_name: String,
    pub access_policy: Option<AccessPolicy>,
    pub key_set: KeySet,
    pub secrets: SecretLists,
    pub owner: Option<OwnerReference>,
}

/// Shared reconcile context
pub struct Reconciler {
    pub cluster: Arc<dyn ClusterClient>,
    pub broker: Arc<dyn BrokerClient>,
    pub metrics: Arc<dyn MetricsSink>,
    pub backoff: Arc<dyn BackoffPolicy>,
    pub cluster_name: String,
    // One reconcile per resource at a time (namespace/name)
    resource_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    // Consecutive failures per resource, reset on success
    failures: Mutex<HashMap<String, u32>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("cluster_name", &self.cluster_name)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        broker: Arc<dyn BrokerClient>,
        metrics: Arc<dyn MetricsSink>,
        backoff: Arc<dyn BackoffPolicy>,
        cluster_name: impl Into<String>,
    ) -> Self {
        Self {
            cluster,
            broker,
            metrics,
            backoff,
            cluster_name: cluster_name.into(),
            resource_locks: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the lock serializing reconciles of one resource
    pub fn resource_lock(&self, namespace: &str, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .resource_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let lock = locks
            .entry(resource_key(namespace, name))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())));
        Arc::clone(lock)
    }

    /// Count a failure and return the number of consecutive failures so far
    pub fn record_failure(&self, namespace: &str, name: &str) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(resource_key(namespace, name)).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn reset_failures(&self, namespace: &str, name: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&resource_key(namespace, name));
    }

    /// Drop per-resource bookkeeping once the resource is gone
    pub fn forget(&self, namespace: &str, name: &str) {
        let key = resource_key(namespace, name);
        self.resource_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
    }

    /// Broker identity of `jwker` in this cluster
    pub fn client_id(&self, jwker: &Jwker) -> Result<ClientId, ReconcilerError> {
        let namespace = jwker
            .namespace()
            .ok_or(ReconcilerError::MissingObjectKey("metadata.namespace"))?;
        let name = jwker
            .metadata
            .name
            .clone()
            .ok_or(ReconcilerError::MissingObjectKey("metadata.name"))?;
        Ok(ClientId::new(&self.cluster_name, namespace, name))
    }
}

fn resource_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}
