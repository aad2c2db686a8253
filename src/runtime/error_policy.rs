//! # Error Policy
//!
//! Requeue delay for failed reconciles. Failures are counted per resource so one
//! broken `Jwker` backs off without slowing down the others.

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::Jwker;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use tracing::error;

pub fn error_policy(jwker: Arc<Jwker>, error: &ReconcilerError, ctx: Arc<Reconciler>) -> Action {
    let name = jwker.name_any();
    let namespace = jwker.namespace().unwrap_or_default();

    ctx.metrics.processing_failed();
    let attempt = ctx.record_failure(&namespace, &name);
    let delay = ctx.backoff.next_delay(attempt);

    error!(
        jwker = %name,
        namespace = %namespace,
        attempt,
        retry_in_secs = delay.as_secs(),
        "reconcile failed: {}",
        error
    );
    Action::requeue(delay)
}
