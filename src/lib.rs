//! # Jwker Controller
//!
//! Kubernetes controller that gives every application described by a `Jwker` resource
//! its own signing key and registers the public half with one or more TokenX
//! (tokendings) token-exchange brokers.
//!
//! ## Overview
//!
//! For each `Jwker` the controller:
//!
//! 1. **Prepares** the rollout - finds the application's managed secrets, keeps the public
//!    keys of secrets still mounted by running pods and picks or generates the active key
//! 2. **Registers** the public key set with every broker instance, authenticated by a
//!    self-signed bearer assertion and a signed software statement
//! 3. **Writes** the private key and broker endpoints to the application's secret
//! 4. **Cleans up** managed secrets no running pod references anymore
//! 5. **Deregisters** the client when the resource is deleted, guarded by a finalizer
//!
//! ## Modules
//!
//! - `crd` - `Jwker` custom resource and its status
//! - `jwk` - RSA key material
//! - `tokendings` - broker registration client
//! - `inventory` - secret usage discovery and secret construction
//! - `cluster` - Kubernetes access seam
//! - `controller` - reconciler, requeue backoff, HTTP server
//! - `runtime` - startup and watch loop

pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod inventory;
pub mod jwk;
pub mod observability;
pub mod runtime;
pub mod tokendings;
