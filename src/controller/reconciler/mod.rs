//! # Reconciler
//!
//! Drives one `Jwker` towards its desired state.
//!
//! ## Flow
//!
//! 1. Serialize on the resource and re-read it, the event may be stale
//! 2. Deleted resources go through `finalize`
//! 3. Add the finalizer before any broker state exists
//! 4. Skip everything when the spec hash matches a completed rollout
//! 5. `prepare` (read only) then `commit` (broker, then secret)
//! 6. Record `RolloutComplete` and delete secrets no pod uses anymore
//!
//! Failures record `FailedPrepare` or `FailedSynchronization` and are retried by the
//! error policy.

mod commit;
mod finalize;
mod prepare;
mod status;
mod types;

pub use commit::{collect_garbage, commit};
pub use finalize::finalize;
pub use prepare::prepare;
pub use status::{ensure_finalizer, record_failure_state, remove_finalizer, update_status};
pub use types::{Reconciler, ReconcilerError, Transaction};

use crate::crd::{Jwker, SynchronizationState};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

pub async fn reconcile(jwker: Arc<Jwker>, ctx: Arc<Reconciler>) -> Result<Action, ReconcilerError> {
    let namespace = jwker
        .namespace()
        .ok_or(ReconcilerError::MissingObjectKey("metadata.namespace"))?;
    let name = jwker
        .metadata
        .name
        .clone()
        .ok_or(ReconcilerError::MissingObjectKey("metadata.name"))?;

    let span = info_span!("reconcile", jwker = %name, namespace = %namespace);
    reconcile_resource(&ctx, &namespace, &name).instrument(span).await
}

async fn reconcile_resource(ctx: &Reconciler, namespace: &str, name: &str) -> Result<Action, ReconcilerError> {
    let lock = ctx.resource_lock(namespace, name);
    let _guard = lock.lock().await;

    let Some(jwker) = ctx
        .cluster
        .get_jwker(namespace, name)
        .await
        .map_err(ReconcilerError::Status)?
    else {
        debug!("resource no longer exists");
        ctx.forget(namespace, name);
        return Ok(Action::await_change());
    };

    if jwker.metadata.deletion_timestamp.is_some() {
        return finalize(ctx, &jwker).await;
    }

    let jwker = ensure_finalizer(ctx, &jwker)
        .await
        .map_err(ReconcilerError::Status)?;

    let spec_hash = jwker
        .spec
        .hash()
        .map_err(|err| ReconcilerError::Prepare(err.into()))?;
    if jwker.is_synchronized(&spec_hash) {
        debug!(hash = %spec_hash, "already synchronized");
        ctx.reset_failures(namespace, name);
        return Ok(Action::await_change());
    }

    let started = Instant::now();
    info!(hash = %spec_hash, "starting rollout");

    let tx = match prepare(ctx, &jwker, spec_hash).await {
        Ok(tx) => tx,
        Err(err) => {
            // Key generation failures say nothing about the resource itself
            if !matches!(err, ReconcilerError::KeyGeneration(_)) {
                record_failure(ctx, &jwker, SynchronizationState::FailedPrepare).await;
            }
            return Err(err);
        }
    };

    if let Err(err) = commit(ctx, &tx).await {
        record_failure(ctx, &jwker, SynchronizationState::FailedSynchronization).await;
        return Err(err);
    }

    update_status(ctx, namespace, name, |status| {
        status.synchronization_hash = Some(tx.spec_hash.clone());
        status.synchronization_secret_name = Some(tx.secret_name.clone());
        status.transition(SynchronizationState::RolloutComplete);
    })
    .await
    .map_err(ReconcilerError::Status)?;

    collect_garbage(ctx, &tx).await;

    ctx.metrics.processed();
    ctx.metrics
        .observe_reconcile_duration(started.elapsed().as_secs_f64());
    ctx.reset_failures(namespace, name);
    info!(secret = %tx.secret_name, keys = ?tx.key_set.public.key_ids(), "✅ rollout complete");
    Ok(Action::await_change())
}

async fn record_failure(ctx: &Reconciler, jwker: &Jwker, state: SynchronizationState) {
    if let Err(err) = record_failure_state(ctx, jwker, state).await {
        warn!(%state, "failed to record status: {}", err);
    }
}
