//! # Controller
//!
//! Reconciliation of `Jwker` resources plus the pieces the watch loop needs around it:
//! requeue backoff and the HTTP server for metrics and probes.

pub mod backoff;
pub mod reconciler;
pub mod server;
