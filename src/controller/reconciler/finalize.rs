//! # Finalize
//!
//! Deletion path. The finalizer is released only after every broker instance has
//! forgotten the client, so a failed deregistration keeps the resource around and
//! the deletion is retried.

use super::status::remove_finalizer;
use super::types::{Reconciler, ReconcilerError};
use crate::crd::Jwker;
use crate::inventory::managed_secret_selector;
use anyhow::Context;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info, warn};

pub async fn finalize(ctx: &Reconciler, jwker: &Jwker) -> Result<Action, ReconcilerError> {
    if !jwker.has_finalizer() {
        debug!("finalizer already released");
        return Ok(Action::await_change());
    }

    let client_id = ctx.client_id(jwker)?;
    ctx.broker
        .deregister(&client_id)
        .await
        .context("deleting client")
        .map_err(ReconcilerError::Finalize)?;

    delete_managed_secrets(ctx, &client_id.namespace, &client_id.name).await;

    let namespace = jwker.namespace().unwrap_or_default();
    remove_finalizer(ctx, &namespace, &jwker.name_any())
        .await
        .context("removing finalizer")
        .map_err(ReconcilerError::Finalize)?;

    ctx.metrics.finalized();
    info!(client = %client_id, "client deleted, finalizer removed");
    Ok(Action::await_change())
}

// Owner references let the garbage collector remove these too; deleting them here
// also covers secrets written before owner references were set.
async fn delete_managed_secrets(ctx: &Reconciler, namespace: &str, app: &str) {
    let secrets = match ctx
        .cluster
        .list_secrets(Some(namespace), &managed_secret_selector(app))
        .await
    {
        Ok(secrets) => secrets,
        Err(err) => {
            warn!("failed to list managed secrets: {}", err);
            return;
        }
    };

    for name in secrets.iter().filter_map(|secret| secret.metadata.name.as_deref()) {
        match ctx.cluster.delete_secret(namespace, name).await {
            Ok(()) => debug!(secret = %name, "deleted managed secret"),
            Err(err) if err.is_not_found() => {}
            Err(err) => warn!(secret = %name, "failed to delete managed secret: {}", err),
        }
    }
}
