//! # Runtime Inventory
//!
//! Finds the secrets this controller manages for an application and splits them into
//! secrets that running pods still reference ("used") and secrets nothing references
//! ("unused", candidates for garbage collection).
//!
//! Also builds the managed secret itself.

use crate::cluster::{ClusterClient, ClusterError};
use crate::constants::{
    APP_LABEL_KEY, RELOADER_ANNOTATION_KEY, SECRET_TYPE_LABEL_KEY, SECRET_TYPE_LABEL_VALUE,
    TOKEN_X_CLIENT_ID_KEY, TOKEN_X_ISSUER_KEY, TOKEN_X_JWKS_URI_KEY, TOKEN_X_PRIVATE_JWK_KEY,
    TOKEN_X_TOKEN_ENDPOINT_KEY, TOKEN_X_WELL_KNOWN_URL_KEY,
};
use crate::jwk::{Jwk, KeyError};
use crate::tokendings::{ClientId, Instance};
use k8s_openapi::api::core::v1::{Container, Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("failed to query cluster: {0}")]
    Cluster(#[from] ClusterError),
    #[error("secret '{secret}' has no {TOKEN_X_PRIVATE_JWK_KEY} key")]
    MissingKey { secret: String },
    #[error("secret '{secret}' contains an invalid JWK: {source}")]
    InvalidJwk {
        secret: String,
        #[source]
        source: KeyError,
    },
    #[error("failed to serialize JWK: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Managed secrets of one application, split by whether a pod references them
#[derive(Debug, Clone, Default)]
pub struct SecretLists {
    pub used: Vec<Secret>,
    pub unused: Vec<Secret>,
}

/// `app=<name>,type=jwker.nais.io`
pub fn managed_secret_selector(app: &str) -> String {
    format!("{APP_LABEL_KEY}={app},{SECRET_TYPE_LABEL_KEY}={SECRET_TYPE_LABEL_VALUE}")
}

pub fn pod_selector(app: &str) -> String {
    format!("{APP_LABEL_KEY}={app}")
}

/// Query managed secrets and pods for `client_id` and partition the secrets
///
/// Either query failing fails the whole call; no partial partition is returned.
pub async fn application_secrets(
    cluster: &dyn ClusterClient,
    client_id: &ClientId,
) -> Result<SecretLists, InventoryError> {
    let secrets = cluster
        .list_secrets(Some(&client_id.namespace), &managed_secret_selector(&client_id.name))
        .await?;
    let pods = cluster
        .list_pods(&client_id.namespace, &pod_selector(&client_id.name))
        .await?;

    let lists = partition_by_usage(secrets, &pods);
    debug!(
        client = %client_id,
        used = lists.used.len(),
        unused = lists.unused.len(),
        "partitioned managed secrets"
    );
    Ok(lists)
}

pub fn partition_by_usage(secrets: Vec<Secret>, pods: &[Pod]) -> SecretLists {
    let in_use = secrets_in_use(pods);
    let (used, unused) = secrets.into_iter().partition(|secret| {
        secret
            .metadata
            .name
            .as_ref()
            .is_some_and(|name| in_use.contains(name))
    });
    SecretLists { used, unused }
}

/// Names of all secrets referenced by running pods
///
/// Volumes, `env[].valueFrom.secretKeyRef` and `envFrom[].secretRef` count, for init
/// containers as well. Pods that already terminated are ignored.
pub fn secrets_in_use(pods: &[Pod]) -> HashSet<String> {
    let mut names = HashSet::new();

    for pod in pods.iter().filter(|pod| !is_terminated(pod)) {
        let Some(spec) = &pod.spec else {
            continue;
        };

        for volume in spec.volumes.iter().flatten() {
            if let Some(name) = volume.secret.as_ref().and_then(|s| s.secret_name.clone()) {
                names.insert(name);
            }
        }

        let containers = spec
            .containers
            .iter()
            .chain(spec.init_containers.iter().flatten());
        for container in containers {
            collect_container_refs(container, &mut names);
        }
    }

    names
}

fn collect_container_refs(container: &Container, names: &mut HashSet<String>) {
    for env in container.env.iter().flatten() {
        if let Some(key_ref) = env.value_from.as_ref().and_then(|v| v.secret_key_ref.as_ref()) {
            names.insert(key_ref.name.clone());
        }
    }
    for env_from in container.env_from.iter().flatten() {
        if let Some(secret_ref) = &env_from.secret_ref {
            names.insert(secret_ref.name.clone());
        }
    }
}

fn is_terminated(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|status| status.phase.as_deref()),
        Some("Succeeded" | "Failed")
    )
}

/// Private JWK stored in a managed secret
pub fn extract_jwk(secret: &Secret) -> Result<Jwk, InventoryError> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(TOKEN_X_PRIVATE_JWK_KEY))
        .ok_or_else(|| InventoryError::MissingKey {
            secret: name.clone(),
        })?;

    serde_json::from_slice(&bytes.0).map_err(|err| InventoryError::InvalidJwk {
        secret: name,
        source: KeyError::Parse(err),
    })
}

/// Managed secret delivering `jwk` and the broker endpoints of `instance` to the application
pub fn secret_spec(
    secret_name: &str,
    client_id: &ClientId,
    jwk: &Jwk,
    instance: &Instance,
    owner: Option<OwnerReference>,
) -> Result<Secret, InventoryError> {
    let jwk_json = serde_json::to_vec(jwk)?;

    let data = BTreeMap::from([
        (TOKEN_X_PRIVATE_JWK_KEY.to_string(), ByteString(jwk_json)),
        (TOKEN_X_CLIENT_ID_KEY.to_string(), bytes(&client_id.to_string())),
        (TOKEN_X_WELL_KNOWN_URL_KEY.to_string(), bytes(&instance.well_known_url)),
        (TOKEN_X_ISSUER_KEY.to_string(), bytes(&instance.metadata.issuer)),
        (TOKEN_X_JWKS_URI_KEY.to_string(), bytes(&instance.metadata.jwks_uri)),
        (TOKEN_X_TOKEN_ENDPOINT_KEY.to_string(), bytes(&instance.metadata.token_endpoint)),
    ]);

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.to_string()),
            namespace: Some(client_id.namespace.clone()),
            labels: Some(BTreeMap::from([
                (APP_LABEL_KEY.to_string(), client_id.name.clone()),
                (SECRET_TYPE_LABEL_KEY.to_string(), SECRET_TYPE_LABEL_VALUE.to_string()),
            ])),
            annotations: Some(BTreeMap::from([(
                RELOADER_ANNOTATION_KEY.to_string(),
                "true".to_string(),
            )])),
            owner_references: owner.map(|owner| vec![owner]),
            ..ObjectMeta::default()
        },
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Secret::default()
    })
}

fn bytes(value: &str) -> ByteString {
    ByteString(value.as_bytes().to_vec())
}
