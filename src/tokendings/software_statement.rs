//! Software statement: the application's resolved access policy, signed by the controller.

use crate::crd::{AccessPolicy, AccessPolicyRule};
use crate::jwk::Jwk;
use crate::tokendings::{ClientId, TokendingsError};
use jsonwebtoken::{encode, Algorithm, Header};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoftwareStatement {
    pub app_id: String,
    pub access_policy_inbound: Vec<String>,
    pub access_policy_outbound: Vec<String>,
}

impl SoftwareStatement {
    /// Resolve every rule against `client_id` and render `cluster:namespace:application`
    pub fn new(client_id: &ClientId, access_policy: Option<&AccessPolicy>) -> Result<Self, TokendingsError> {
        let access_policy = access_policy.ok_or(TokendingsError::MissingAccessPolicy)?;
        let resolve = |rules: &[AccessPolicyRule]| -> Vec<String> {
            rules.iter().map(|rule| resolve_rule(client_id, rule)).collect()
        };

        Ok(Self {
            app_id: client_id.to_string(),
            access_policy_inbound: resolve(access_policy.inbound_rules()),
            access_policy_outbound: resolve(access_policy.outbound_rules()),
        })
    }

    /// Compact JWS signed with the controller's key
    pub fn sign(&self, jwk: &Jwk) -> Result<String, TokendingsError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(jwk.kid.clone());
        Ok(encode(&header, self, &jwk.encoding_key()?)?)
    }
}

fn resolve_rule(client_id: &ClientId, rule: &AccessPolicyRule) -> String {
    let cluster = if rule.cluster.is_empty() {
        client_id.cluster.as_str()
    } else {
        rule.cluster.as_str()
    };
    let namespace = if rule.namespace.is_empty() {
        client_id.namespace.as_str()
    } else {
        rule.namespace.as_str()
    };
    format!("{cluster}:{namespace}:{}", rule.application)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AccessPolicyInbound, AccessPolicyOutbound};
    use jsonwebtoken::{decode, decode_header, Validation};

    fn rule(application: &str, namespace: &str, cluster: &str) -> AccessPolicyRule {
        AccessPolicyRule {
            application: application.to_string(),
            namespace: namespace.to_string(),
            cluster: cluster.to_string(),
        }
    }

    fn client_id() -> ClientId {
        ClientId::new("mycluster", "mynamespace", "myapplication")
    }

    #[test]
    fn test_rules_resolve_against_requesting_application() {
        let policy = AccessPolicy {
            inbound: Some(AccessPolicyInbound {
                rules: vec![
                    rule("otherapplication", "othernamespace", "mycluster"),
                    rule("otherapplicationinsamecluster", "othernamespace", ""),
                    rule("otherapplicationinsamenamespace", "", ""),
                ],
            }),
            outbound: Some(AccessPolicyOutbound { rules: vec![] }),
        };

        let statement = SoftwareStatement::new(&client_id(), Some(&policy)).unwrap();

        assert_eq!(statement.app_id, "mycluster:mynamespace:myapplication");
        assert_eq!(
            statement.access_policy_inbound,
            vec![
                "mycluster:othernamespace:otherapplication",
                "mycluster:othernamespace:otherapplicationinsamecluster",
                "mycluster:mynamespace:otherapplicationinsamenamespace",
            ]
        );
        assert!(statement.access_policy_outbound.is_empty());
    }

    #[test]
    fn test_fully_specified_rule_passes_through() {
        let policy = AccessPolicy {
            inbound: None,
            outbound: Some(AccessPolicyOutbound {
                rules: vec![rule("api", "team", "prod-gcp")],
            }),
        };

        let statement = SoftwareStatement::new(&client_id(), Some(&policy)).unwrap();
        assert!(statement.access_policy_inbound.is_empty());
        assert_eq!(statement.access_policy_outbound, vec!["prod-gcp:team:api"]);
    }

    #[test]
    fn test_missing_access_policy_is_rejected() {
        let err = SoftwareStatement::new(&client_id(), None).unwrap_err();
        assert!(matches!(err, TokendingsError::MissingAccessPolicy));
    }

    #[test]
    fn test_serialized_field_names() {
        let statement = SoftwareStatement::new(&client_id(), Some(&AccessPolicy::default())).unwrap();
        assert_eq!(
            serde_json::to_value(&statement).unwrap(),
            serde_json::json!({
                "appId": "mycluster:mynamespace:myapplication",
                "accessPolicyInbound": [],
                "accessPolicyOutbound": []
            })
        );
    }

    #[test]
    fn test_signed_statement_verifies_with_controller_key() {
        let jwk = Jwk::generate().unwrap();
        let statement = SoftwareStatement::new(&client_id(), Some(&AccessPolicy::default())).unwrap();
        let token = statement.sign(&jwk).unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.typ.as_deref(), Some("JWT"));
        assert_eq!(header.kid.as_deref(), Some(jwk.kid.as_str()));

        let mut validation = Validation::new(Algorithm::RS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        let decoded = decode::<SoftwareStatement>(&token, &jwk.decoding_key().unwrap(), &validation).unwrap();
        assert_eq!(decoded.claims, statement);
    }
}
