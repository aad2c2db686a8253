//! # Watch Loop
//!
//! Runs the `Jwker` controller until a shutdown signal arrives. Managed secrets are
//! watched as owned objects, so deleting or editing one wakes up its owner.

use crate::constants::{SECRET_TYPE_LABEL_KEY, SECRET_TYPE_LABEL_VALUE};
use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::Jwker;
use crate::runtime::error_policy::error_policy;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use kube_runtime::controller::{self, Controller};
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    max_concurrent_reconciles: u16,
) {
    let jwkers: Api<Jwker> = Api::all(client.clone());
    let secrets: Api<Secret> = Api::all(client);
    let managed = format!("{SECRET_TYPE_LABEL_KEY}={SECRET_TYPE_LABEL_VALUE}");

    info!(concurrency = max_concurrent_reconciles, "Starting controller watch loop...");
    server_state.set_ready(true);

    Controller::new(jwkers, watcher::Config::default())
        .owns(secrets, watcher::Config::default().labels(&managed))
        .with_config(controller::Config::default().concurrency(max_concurrent_reconciles))
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(jwker = %object.name, "reconciled"),
                Err(controller::Error::ReconcilerFailed(..)) => {}
                Err(e) => warn!("controller stream error: {}", e),
            }
        })
        .await;

    server_state.set_ready(false);
    info!("Controller watch loop stopped");
}
