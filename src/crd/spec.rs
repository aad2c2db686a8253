//! # Jwker Spec
//!
//! The `Jwker` resource declares that an application needs a TokenX client identity.

use serde::{Deserialize, Serialize};

/// Jwker Custom Resource Definition
///
/// Created by the deployment pipeline next to the application. The controller
/// only reads the spec; it owns the status and its own finalizer.
///
/// # Example
///
/// ```yaml
/// apiVersion: nais.io/v1
/// kind: Jwker
/// metadata:
///   name: myapplication
///   namespace: mynamespace
/// spec:
///   secretName: myapplication-tokenx-8f2c1
///   accessPolicy:
///     inbound:
///       rules:
///         - application: otherapplication
///           namespace: othernamespace
///     outbound:
///       rules: []
/// ```
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Jwker",
    group = "nais.io",
    version = "v1",
    namespaced,
    status = "crate::crd::JwkerStatus",
    printcolumn = r#"{"name":"Secret", "type":"string", "jsonPath":".spec.secretName"}, {"name":"State", "type":"string", "jsonPath":".status.synchronizationState"}, {"name":"Hash", "type":"string", "jsonPath":".status.synchronizationHash", "priority": 1}"#
)]
#[serde(rename_all = "camelCase")]
pub struct JwkerSpec {
    /// Inbound and outbound rules forwarded to the broker in the software statement.
    /// Field order matters: it is part of the fingerprint input.
    #[serde(default)]
    pub access_policy: Option<AccessPolicy>,
    /// Name of the secret that receives the private key
    pub secret_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inbound: Option<AccessPolicyInbound>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbound: Option<AccessPolicyOutbound>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct AccessPolicyInbound {
    #[serde(default)]
    pub rules: Vec<AccessPolicyRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct AccessPolicyOutbound {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<AccessPolicyRule>,
}

/// A single access policy rule
///
/// Empty `namespace`/`cluster` mean "same as the application declaring the rule"
/// and are resolved when the software statement is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct AccessPolicyRule {
    pub application: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster: String,
}

impl AccessPolicy {
    pub fn inbound_rules(&self) -> &[AccessPolicyRule] {
        self.inbound.as_ref().map_or(&[], |inbound| inbound.rules.as_slice())
    }

    pub fn outbound_rules(&self) -> &[AccessPolicyRule] {
        self.outbound.as_ref().map_or(&[], |outbound| outbound.rules.as_slice())
    }
}

impl JwkerSpec {
    /// Fingerprint of the desired state, compared against `status.synchronizationHash`
    pub fn hash(&self) -> Result<String, serde_json::Error> {
        crate::crd::fingerprint(self)
    }
}

impl Jwker {
    /// Whether the reconciler can skip all work for the current spec
    pub fn is_synchronized(&self, spec_hash: &str) -> bool {
        self.status.as_ref().is_some_and(|status| {
            status.synchronization_hash.as_deref() == Some(spec_hash)
                && status.synchronization_state == Some(crate::crd::SynchronizationState::RolloutComplete)
        })
    }

    /// Secret name recorded by the last successful rollout
    pub fn synchronized_secret_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|status| status.synchronization_secret_name.as_deref())
    }

    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| finalizers.iter().any(|f| f == crate::constants::FINALIZER_NAME))
    }
}
