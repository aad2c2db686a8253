//! # Cluster Access
//!
//! The reconciler talks to the Kubernetes API only through `ClusterClient`, which keeps
//! the prepare/commit logic testable without an API server.
//!
//! Writes to shared objects are optimistic: `Jwker` status and finalizer updates carry the
//! `resourceVersion` they were computed from, and secret replacements carry the version of
//! the secret they replace. A stale version surfaces as `ClusterError::Conflict`.

use crate::constants::FIELD_MANAGER;
use crate::crd::{Jwker, JwkerStatus};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} was modified concurrently")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name} has no {field}")]
    MissingField {
        kind: &'static str,
        namespace: String,
        name: String,
        field: &'static str,
    },
    #[error("kubernetes API error: {0}")]
    Api(#[source] kube::Error),
}

impl ClusterError {
    fn from_kube(err: kube::Error, kind: &'static str, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(api_err) if api_err.code == 409 => Self::Conflict {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(api_err) if api_err.code == 404 => Self::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            other => Self::Api(other),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Kubernetes operations needed by the controller
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_jwker(&self, namespace: &str, name: &str) -> Result<Option<Jwker>, ClusterError>;

    async fn list_jwkers(&self) -> Result<Vec<Jwker>, ClusterError>;

    /// Replace the finalizer list, failing with `Conflict` if `resource_version` is stale
    async fn update_jwker_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        finalizers: Vec<String>,
    ) -> Result<Jwker, ClusterError>;

    /// Replace the status, failing with `Conflict` if `resource_version` is stale
    async fn update_jwker_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        status: &JwkerStatus,
    ) -> Result<Jwker, ClusterError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError>;

    /// List secrets matching `label_selector`, in one namespace or cluster-wide
    async fn list_secrets(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<Secret>, ClusterError>;

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError>;

    /// Replace an existing secret; `secret.metadata.resource_version` must be current
    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ClusterError>;

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError>;
}

/// `ClusterClient` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient").finish_non_exhaustive()
    }
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn jwkers(&self, namespace: &str) -> Api<Jwker> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PostParams::default()
    }
}

fn secret_key(secret: &Secret) -> Result<(String, String), ClusterError> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    let namespace = secret.metadata.namespace.clone().unwrap_or_default();
    if name.is_empty() || namespace.is_empty() {
        return Err(ClusterError::MissingField {
            kind: "Secret",
            namespace,
            name,
            field: "name or namespace",
        });
    }
    Ok((namespace, name))
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_jwker(&self, namespace: &str, name: &str) -> Result<Option<Jwker>, ClusterError> {
        self.jwkers(namespace)
            .get_opt(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, "Jwker", namespace, name))
    }

    async fn list_jwkers(&self) -> Result<Vec<Jwker>, ClusterError> {
        let api: Api<Jwker> = Api::all(self.client.clone());
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(ClusterError::Api)
    }

    async fn update_jwker_finalizers(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        finalizers: Vec<String>,
    ) -> Result<Jwker, ClusterError> {
        // A resourceVersion inside a merge patch is checked by the API server as a precondition
        let patch = json!({
            "metadata": {
                "resourceVersion": resource_version,
                "finalizers": finalizers,
            }
        });
        self.jwkers(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ClusterError::from_kube(e, "Jwker", namespace, name))
    }

    async fn update_jwker_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
        status: &JwkerStatus,
    ) -> Result<Jwker, ClusterError> {
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        self.jwkers(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ClusterError::from_kube(e, "Jwker", namespace, name))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, ClusterError> {
        self.secrets(namespace)
            .get_opt(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, "Secret", namespace, name))
    }

    async fn list_secrets(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<Secret>, ClusterError> {
        let api: Api<Secret> = match namespace {
            Some(namespace) => self.secrets(namespace),
            None => Api::all(self.client.clone()),
        };
        api.list(&ListParams::default().labels(label_selector))
            .await
            .map(|list| list.items)
            .map_err(ClusterError::Api)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        let (namespace, name) = secret_key(secret)?;
        self.secrets(&namespace)
            .create(&post_params(), secret)
            .await
            .map_err(|e| ClusterError::from_kube(e, "Secret", &namespace, &name))
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret, ClusterError> {
        let (namespace, name) = secret_key(secret)?;
        self.secrets(&namespace)
            .replace(&name, &post_params(), secret)
            .await
            .map_err(|e| ClusterError::from_kube(e, "Secret", &namespace, &name))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        match self.secrets(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => Err(ClusterError::from_kube(e, "Secret", namespace, name)),
        }
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.list(&ListParams::default().labels(label_selector))
            .await
            .map(|list| list.items)
            .map_err(ClusterError::Api)
    }
}
