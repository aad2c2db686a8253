//! # Prepare
//!
//! Collects everything a rollout needs without changing anything: the application's
//! managed secrets split by usage, the key to publish and the public keys that must
//! stay registered because running pods still sign with them.

use super::types::{Reconciler, ReconcilerError, Transaction};
use crate::crd::Jwker;
use crate::inventory;
use crate::jwk::{Jwk, KeySet};
use anyhow::Context;
use kube::Resource;
use tracing::{debug, info};

pub async fn prepare(ctx: &Reconciler, jwker: &Jwker, spec_hash: String) -> Result<Transaction, ReconcilerError> {
    let client_id = ctx.client_id(jwker)?;
    let secrets = inventory::application_secrets(ctx.cluster.as_ref(), &client_id)
        .await
        .context("listing managed secrets")
        .map_err(ReconcilerError::Prepare)?;

    let secret_name = jwker.spec.secret_name.clone();
    // The key in the active secret survives only while the secret name is unchanged
    let reuse_active = jwker.synchronized_secret_name() == Some(secret_name.as_str());

    let mut current = None;
    let mut existing = Vec::new();
    for secret in &secrets.used {
        let jwk = inventory::extract_jwk(secret)
            .context("reading key from secret in use")
            .map_err(ReconcilerError::Prepare)?;
        if reuse_active && secret.metadata.name.as_deref() == Some(secret_name.as_str()) {
            current = Some(jwk);
        } else {
            existing.push(jwk.public());
        }
    }

    let current = match current {
        Some(jwk) => {
            debug!(kid = %jwk.kid, "reusing key from active secret");
            jwk
        }
        None => {
            // RSA key generation is CPU bound
            let jwk = tokio::task::spawn_blocking(Jwk::generate)
                .await
                .context("key generation task")?
                .map_err(ReconcilerError::KeyGeneration)?;
            info!(kid = %jwk.kid, "generated new key");
            jwk
        }
    };

    Ok(Transaction {
        key_set: KeySet::with_existing(current, &existing),
        client_id,
        spec_hash,
        secret_name,
        access_policy: jwker.spec.access_policy.clone(),
        secrets,
        owner: jwker.controller_owner_ref(&()),
    })
}
