//! # Controller Key Bootstrap
//!
//! The controller signs bearer assertions and software statements with its own key.
//! That key comes from a file when one is configured, otherwise from a secret in the
//! controller namespace which is created with a fresh key on first start.
//!
//! When a shared public secret is configured, the public half is published there as a
//! JWKS for the broker to trust. An existing shared secret is left untouched.

use crate::cluster::ClusterClient;
use crate::constants::{PRIVATE_JWK_SECRET_KEY, SHARED_PUBLIC_JWKS_KEY};
use crate::jwk::{Jwk, JwkSet};
use anyhow::{bail, Context, Result};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;
use zeroize::Zeroizing;

/// Read the controller key from a JWK file
pub async fn load_jwk_file(path: &Path) -> Result<Jwk> {
    let raw = Zeroizing::new(
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
    );
    let jwk = Jwk::from_json(&raw).with_context(|| format!("parsing {}", path.display()))?;
    if !jwk.is_private() {
        bail!("{} does not contain a private key", path.display());
    }
    info!(kid = %jwk.kid, "loaded controller key from file");
    Ok(jwk)
}

/// Read the controller key from `namespace/name`, generating and storing one if absent
pub async fn ensure_private_jwk_secret(cluster: &dyn ClusterClient, namespace: &str, name: &str) -> Result<Jwk> {
    if let Some(secret) = cluster.get_secret(namespace, name).await? {
        let raw = secret
            .data
            .as_ref()
            .and_then(|data| data.get(PRIVATE_JWK_SECRET_KEY))
            .filter(|value| !value.0.is_empty())
            .with_context(|| format!("no {PRIVATE_JWK_SECRET_KEY} key in secret {namespace}/{name}"))?;
        let jwk: Jwk = serde_json::from_slice(&raw.0)
            .with_context(|| format!("parsing controller key from secret {namespace}/{name}"))?;
        info!(kid = %jwk.kid, "loaded controller key from secret");
        return Ok(jwk);
    }

    let jwk = Jwk::generate().context("generating controller key")?;
    let json = Zeroizing::new(serde_json::to_vec(&jwk)?);
    cluster
        .create_secret(&opaque_secret(namespace, name, PRIVATE_JWK_SECRET_KEY, json.to_vec()))
        .await
        .with_context(|| format!("creating secret {namespace}/{name}"))?;

    info!(kid = %jwk.kid, "generated controller key and stored it in {}/{}", namespace, name);
    Ok(jwk)
}

/// Publish the public half of `jwk` unless the shared secret already exists
pub async fn ensure_public_secret(cluster: &dyn ClusterClient, namespace: &str, name: &str, jwk: &Jwk) -> Result<()> {
    if cluster.get_secret(namespace, name).await?.is_some() {
        return Ok(());
    }

    let jwks = serde_json::to_vec(&JwkSet::new(vec![jwk.public()]))?;
    cluster
        .create_secret(&opaque_secret(namespace, name, SHARED_PUBLIC_JWKS_KEY, jwks))
        .await
        .with_context(|| format!("creating secret {namespace}/{name}"))?;

    info!(kid = %jwk.kid, "published controller public key to {}/{}", namespace, name);
    Ok(())
}

fn opaque_secret(namespace: &str, name: &str, key: &str, value: Vec<u8>) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        data: Some(BTreeMap::from([(key.to_string(), ByteString(value))])),
        type_: Some("Opaque".to_string()),
        ..Secret::default()
    }
}
