//! # Jwker Status
//!
//! Status written by the reconciler after every prepare/commit attempt.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of the last reconcile that ran commit logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum SynchronizationState {
    /// Broker registration and secret write both succeeded
    RolloutComplete,
    /// Inventory or key material could not be prepared; the broker was not contacted
    FailedPrepare,
    /// Broker registration or secret write failed
    FailedSynchronization,
}

impl fmt::Display for SynchronizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::RolloutComplete => "RolloutComplete",
            Self::FailedPrepare => "FailedPrepare",
            Self::FailedSynchronization => "FailedSynchronization",
        };
        f.write_str(state)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JwkerStatus {
    /// Fingerprint of the spec that was last rolled out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization_state: Option<SynchronizationState>,
    /// Secret that received the private key on the last rollout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization_secret_name: Option<String>,
    /// Unix time of the last status change, in nanoseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synchronization_time: Option<i64>,
}

impl JwkerStatus {
    /// Record a state transition at the current time
    pub fn transition(&mut self, state: SynchronizationState) {
        self.synchronization_state = Some(state);
        self.synchronization_time = chrono::Utc::now().timestamp_nanos_opt();
    }
}
