//! # Status and Finalizer Writes
//!
//! Read-modify-write helpers for the `Jwker` object itself. Each attempt re-reads the
//! resource, applies the change and writes it back with the `resourceVersion` it read.
//! A conflict means someone else wrote in between, so the helper starts over with a
//! fresh read, up to `MAX_CONFLICT_RETRIES` attempts.

use super::types::Reconciler;
use crate::cluster::ClusterError;
use crate::constants::{FINALIZER_NAME, MAX_CONFLICT_RETRIES};
use crate::crd::{Jwker, JwkerStatus, SynchronizationState};
use kube::ResourceExt;
use tracing::debug;

/// Apply `mutate` to the latest status of `namespace/name`
pub async fn update_status<F>(
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<Jwker, ClusterError>
where
    F: Fn(&mut JwkerStatus) + Send + Sync,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let latest = fetch(ctx, namespace, name).await?;
        let resource_version = resource_version(&latest, namespace, name)?;

        let mut status = latest.status.clone().unwrap_or_default();
        mutate(&mut status);

        match ctx
            .cluster
            .update_jwker_status(namespace, name, &resource_version, &status)
            .await
        {
            Err(err) if err.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                debug!(attempt, "status write conflicted, retrying with fresh resource");
            }
            result => return result,
        }
    }
}

/// Record a failed state, skipping the write when the state is already recorded
///
/// Repeating the same failure does not touch the resource, so a failing `Jwker`
/// produces no watch events of its own and retries follow the backoff policy.
pub async fn record_failure_state(
    ctx: &Reconciler,
    jwker: &Jwker,
    state: SynchronizationState,
) -> Result<(), ClusterError> {
    let current = jwker
        .status
        .as_ref()
        .and_then(|status| status.synchronization_state);
    if current == Some(state) {
        return Ok(());
    }

    let namespace = jwker.namespace().unwrap_or_default();
    update_status(ctx, &namespace, &jwker.name_any(), |status| status.transition(state)).await?;
    Ok(())
}

/// Make sure the finalizer is present, returning the resource as stored
pub async fn ensure_finalizer(ctx: &Reconciler, jwker: &Jwker) -> Result<Jwker, ClusterError> {
    if jwker.has_finalizer() {
        return Ok(jwker.clone());
    }
    let namespace = jwker.namespace().unwrap_or_default();
    let name = jwker.name_any();

    update_finalizers(ctx, &namespace, &name, |finalizers| {
        if !finalizers.iter().any(|f| f == FINALIZER_NAME) {
            finalizers.push(FINALIZER_NAME.to_string());
        }
    })
    .await
}

pub async fn remove_finalizer(ctx: &Reconciler, namespace: &str, name: &str) -> Result<Jwker, ClusterError> {
    update_finalizers(ctx, namespace, name, |finalizers| {
        finalizers.retain(|f| f != FINALIZER_NAME);
    })
    .await
}

async fn update_finalizers<F>(
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
    mutate: F,
) -> Result<Jwker, ClusterError>
where
    F: Fn(&mut Vec<String>) + Send + Sync,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let latest = fetch(ctx, namespace, name).await?;
        let resource_version = resource_version(&latest, namespace, name)?;

        let mut finalizers = latest.metadata.finalizers.clone().unwrap_or_default();
        mutate(&mut finalizers);
        if Some(&finalizers) == latest.metadata.finalizers.as_ref() {
            return Ok(latest);
        }

        match ctx
            .cluster
            .update_jwker_finalizers(namespace, name, &resource_version, finalizers)
            .await
        {
            Err(err) if err.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
                debug!(attempt, "finalizer write conflicted, retrying with fresh resource");
            }
            result => return result,
        }
    }
}

async fn fetch(ctx: &Reconciler, namespace: &str, name: &str) -> Result<Jwker, ClusterError> {
    ctx.cluster
        .get_jwker(namespace, name)
        .await?
        .ok_or_else(|| ClusterError::NotFound {
            kind: "Jwker",
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
}

fn resource_version(jwker: &Jwker, namespace: &str, name: &str) -> Result<String, ClusterError> {
    jwker
        .resource_version()
        .ok_or_else(|| ClusterError::MissingField {
            kind: "Jwker",
            namespace: namespace.to_string(),
            name: name.to_string(),
            field: "metadata.resourceVersion",
        })
}
