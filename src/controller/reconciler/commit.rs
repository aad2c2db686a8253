//! # Commit
//!
//! Applies a prepared transaction: registers the public key set with every broker
//! instance, then writes the private key to the application's secret. Registration
//! comes first so an application never receives a key the broker does not know.

use super::types::{Reconciler, ReconcilerError, Transaction};
use crate::cluster::{ClusterClient, ClusterError};
use crate::inventory;
use crate::tokendings::SoftwareStatement;
use anyhow::{anyhow, Context};
use k8s_openapi::api::core::v1::Secret;
use tracing::{info, warn};

pub async fn commit(ctx: &Reconciler, tx: &Transaction) -> Result<(), ReconcilerError> {
    let statement = SoftwareStatement::new(&tx.client_id, tx.access_policy.as_ref())
        .context("building software statement")
        .map_err(ReconcilerError::Synchronization)?;

    ctx.broker
        .register(&tx.client_id, &tx.key_set.public, &statement)
        .await
        .context("registering client")
        .map_err(ReconcilerError::Synchronization)?;

    let instance = ctx
        .broker
        .instances()
        .first()
        .ok_or_else(|| ReconcilerError::Synchronization(anyhow!("no tokendings instances configured")))?;
    let jwk = tx
        .key_set
        .private_key()
        .ok_or_else(|| ReconcilerError::Synchronization(anyhow!("key set has no private key")))?;

    let secret = inventory::secret_spec(&tx.secret_name, &tx.client_id, jwk, instance, tx.owner.clone())
        .context("building secret")
        .map_err(ReconcilerError::Synchronization)?;
    write_secret(ctx.cluster.as_ref(), secret)
        .await
        .with_context(|| format!("writing secret {}", tx.secret_name))
        .map_err(ReconcilerError::Synchronization)?;

    info!(secret = %tx.secret_name, kid = %jwk.kid, "secret written");
    Ok(())
}

/// Delete managed secrets no pod references, except the one just written
///
/// Failures are logged and left for the next rollout.
pub async fn collect_garbage(ctx: &Reconciler, tx: &Transaction) {
    let stale = tx
        .secrets
        .unused
        .iter()
        .filter_map(|secret| secret.metadata.name.as_deref())
        .filter(|name| *name != tx.secret_name);

    for name in stale {
        match ctx.cluster.delete_secret(&tx.client_id.namespace, name).await {
            Ok(()) => info!(secret = %name, "deleted unused secret"),
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!(secret = %name, "failed to delete unused secret: {}", err),
        }
    }
}

/// Create the secret, or replace it at the version currently stored
async fn write_secret(cluster: &dyn ClusterClient, mut secret: Secret) -> Result<Secret, ClusterError> {
    let namespace = secret.metadata.namespace.clone().unwrap_or_default();
    let name = secret.metadata.name.clone().unwrap_or_default();

    match cluster.get_secret(&namespace, &name).await? {
        Some(existing) => {
            secret.metadata.resource_version = existing.metadata.resource_version;
            cluster.replace_secret(&secret).await
        }
        None => cluster.create_secret(&secret).await,
    }
}
