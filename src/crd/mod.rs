//! # Custom Resource Definitions
//!
//! CRD types for the jwker controller.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `Jwker` resource and its access policy
//! - `status.rs` - Synchronization status written by the reconciler
//! - `hash.rs` - Fingerprint of the spec used as the idempotency key

mod hash;
mod spec;
mod status;

pub use hash::fingerprint;
pub use spec::{
    AccessPolicy, AccessPolicyInbound, AccessPolicyOutbound, AccessPolicyRule, Jwker, JwkerSpec,
};
pub use status::{JwkerStatus, SynchronizationState};
