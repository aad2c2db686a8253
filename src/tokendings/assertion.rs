//! Self-signed client assertions (RFC 7523) used as bearer tokens towards the broker.
//!
//! Assertions are minted per request and never cached.

use crate::jwk::Jwk;
use crate::tokendings::TokendingsError;
use jsonwebtoken::{encode, Algorithm, Header};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientAssertionClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub nbf: i64,
    pub iat: i64,
    pub jti: String,
}

/// Sign an assertion for `audience` valid for `validity` from now
pub fn client_assertion(
    jwk: &Jwk,
    client_id: &str,
    audience: &str,
    validity: Duration,
) -> Result<String, TokendingsError> {
    let now = chrono::Utc::now().timestamp();
    let validity = i64::try_from(validity.as_secs()).unwrap_or(i64::MAX);
    let claims = ClientAssertionClaims {
        iss: client_id.to_string(),
        sub: client_id.to_string(),
        aud: audience.to_string(),
        exp: now.saturating_add(validity),
        nbf: now,
        iat: now,
        jti: uuid::Uuid::new_v4().to_string(),
    };

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(jwk.kid.clone());
    Ok(encode(&header, &claims, &jwk.encoding_key()?)?)
}
