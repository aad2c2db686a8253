//! # Key Material
//!
//! RSA signing keys in JSON Web Key form.
//!
//! - `Jwk::generate` creates a fresh RS256 signing key
//! - `Jwk::public` strips the private members
//! - `KeySet::with_existing` builds the private/public pair registered with the broker
//!
//! Base64 members use the URL-safe alphabet without padding (RFC 7518 §6.3).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const KEY_BITS: usize = 2048;
const KEY_TYPE_RSA: &str = "RSA";
const KEY_USE_SIG: &str = "sig";
const ALG_RS256: &str = "RS256";

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("failed to generate RSA key: {0}")]
    Generate(#[source] rsa::Error),
    #[error("key '{kid}' has no private material")]
    NotPrivate { kid: String },
    #[error("unsupported key type '{0}'")]
    UnsupportedKeyType(String),
    #[error("invalid base64 in member '{member}': {source}")]
    InvalidComponent {
        member: &'static str,
        #[source]
        source: base64::DecodeError,
    },
    #[error("inconsistent RSA components: {0}")]
    InvalidKey(#[source] rsa::Error),
    #[error("failed to encode key as PKCS#1: {0}")]
    Encode(#[source] rsa::pkcs1::Error),
    #[error("invalid verification key: {0}")]
    Verification(#[from] jsonwebtoken::errors::Error),
    #[error("failed to parse JWK: {0}")]
    Parse(#[from] serde_json::Error),
}

/// RSA JSON Web Key, public or private
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    pub n: String,
    pub e: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// Key material for one rollout
///
/// `private` holds exactly the key written to the active secret; `public` is what
/// the broker accepts signatures from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet {
    pub private: JwkSet,
    pub public: JwkSet,
}

impl Jwk {
    /// Generate a new RSA-2048 signing key with a random key id
    pub fn generate() -> Result<Self, KeyError> {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS).map_err(KeyError::Generate)?;
        Ok(Self::from_private_key(&key, uuid::Uuid::new_v4().to_string()))
    }

    fn from_private_key(key: &RsaPrivateKey, kid: String) -> Self {
        let primes = key.primes();
        Self {
            kty: KEY_TYPE_RSA.to_string(),
            kid,
            key_use: Some(KEY_USE_SIG.to_string()),
            alg: Some(ALG_RS256.to_string()),
            n: encode_uint(key.n()),
            e: encode_uint(key.e()),
            d: Some(encode_uint(key.d())),
            p: primes.first().map(encode_uint),
            q: primes.get(1).map(encode_uint),
            dp: key.dp().map(encode_uint),
            dq: key.dq().map(encode_uint),
            qi: key.crt_coefficient().as_ref().map(encode_uint),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, KeyError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn is_private(&self) -> bool {
        self.d.is_some()
    }

    /// Public projection of this key
    #[must_use]
    pub fn public(&self) -> Self {
        Self {
            kty: self.kty.clone(),
            kid: self.kid.clone(),
            key_use: self.key_use.clone(),
            alg: self.alg.clone(),
            n: self.n.clone(),
            e: self.e.clone(),
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
        }
    }

    /// Signing key for `jsonwebtoken`
    pub fn encoding_key(&self) -> Result<EncodingKey, KeyError> {
        let der = self.to_rsa_private_key()?.to_pkcs1_der().map_err(KeyError::Encode)?;
        Ok(EncodingKey::from_rsa_der(der.as_bytes()))
    }

    /// Verification key for `jsonwebtoken`
    pub fn decoding_key(&self) -> Result<DecodingKey, KeyError> {
        self.ensure_rsa()?;
        Ok(DecodingKey::from_rsa_components(&self.n, &self.e)?)
    }

    fn to_rsa_private_key(&self) -> Result<RsaPrivateKey, KeyError> {
        self.ensure_rsa()?;
        let not_private = || KeyError::NotPrivate {
            kid: self.kid.clone(),
        };
        let d = self.d.as_deref().ok_or_else(not_private)?;
        let p = self.p.as_deref().ok_or_else(not_private)?;
        let q = self.q.as_deref().ok_or_else(not_private)?;

        RsaPrivateKey::from_components(
            decode_uint("n", &self.n)?,
            decode_uint("e", &self.e)?,
            decode_uint("d", d)?,
            vec![decode_uint("p", p)?, decode_uint("q", q)?],
        )
        .map_err(KeyError::InvalidKey)
    }

    fn ensure_rsa(&self) -> Result<(), KeyError> {
        if self.kty == KEY_TYPE_RSA {
            Ok(())
        } else {
            Err(KeyError::UnsupportedKeyType(self.kty.clone()))
        }
    }
}

impl JwkSet {
    pub fn new(keys: Vec<Jwk>) -> Self {
        Self { keys }
    }

    pub fn key_ids(&self) -> Vec<&str> {
        self.keys.iter().map(|key| key.kid.as_str()).collect()
    }
}

impl KeySet {
    /// Pair `current` with the public halves of keys still in use elsewhere
    ///
    /// The public set keeps insertion order: `existing` first, then `current`.
    /// Duplicate key ids are dropped, the first occurrence wins.
    pub fn with_existing(current: Jwk, existing: &[Jwk]) -> Self {
        let mut seen = HashSet::new();
        let public = existing
            .iter()
            .chain(std::iter::once(&current))
            .filter(|key| seen.insert(key.kid.clone()))
            .map(Jwk::public)
            .collect();

        Self {
            private: JwkSet::new(vec![current]),
            public: JwkSet::new(public),
        }
    }

    /// The single key destined for the active secret
    pub fn private_key(&self) -> Option<&Jwk> {
        self.private.keys.first()
    }
}

fn encode_uint(value: &BigUint) -> String {
    URL_SAFE_NO_PAD.encode(value.to_bytes_be())
}

fn decode_uint(member: &'static str, value: &str) -> Result<BigUint, KeyError> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map(|bytes| BigUint::from_bytes_be(&bytes))
        .map_err(|source| KeyError::InvalidComponent { member, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    fn generated() -> &'static Jwk {
        static KEY: OnceLock<Jwk> = OnceLock::new();
        KEY.get_or_init(|| Jwk::generate().unwrap())
    }

    fn public_only(kid: &str) -> Jwk {
        Jwk {
            kid: kid.to_string(),
            ..generated().public()
        }
    }

    #[test]
    fn test_generate_sets_signing_metadata() {
        let key = generated();
        assert_eq!(key.kty, "RSA");
        assert_eq!(key.key_use.as_deref(), Some("sig"));
        assert_eq!(key.alg.as_deref(), Some("RS256"));
        assert!(key.is_private());
        assert!(uuid::Uuid::parse_str(&key.kid).is_ok());
        // 2048-bit modulus is 256 bytes
        assert_eq!(URL_SAFE_NO_PAD.decode(&key.n).unwrap().len(), 256);
    }

    #[test]
    fn test_public_projection_strips_private_members() {
        let public = generated().public();
        assert!(!public.is_private());
        assert_eq!(public.kid, generated().kid);
        assert_eq!(public.n, generated().n);
        assert_eq!(public, public.public());

        let json = serde_json::to_value(&public).unwrap();
        for member in ["d", "p", "q", "dp", "dq", "qi"] {
            assert!(json.get(member).is_none(), "{member} leaked into public key");
        }
        assert_eq!(json["use"], "sig");
    }

    #[test]
    fn test_json_roundtrip_preserves_signing_ability() {
        let json = serde_json::to_string(generated()).unwrap();
        let parsed = Jwk::from_json(&json).unwrap();
        assert_eq!(&parsed, generated());
        assert!(parsed.encoding_key().is_ok());
    }

    #[test]
    fn test_encoding_key_requires_private_material() {
        let err = generated().public().encoding_key().err().unwrap();
        assert!(matches!(err, KeyError::NotPrivate { .. }));
    }

    #[test]
    fn test_key_set_private_holds_only_current_key() {
        let key_set = KeySet::with_existing(generated().clone(), &[public_only("old")]);
        assert_eq!(key_set.private.keys.len(), 1);
        assert_eq!(key_set.private_key(), Some(generated()));
        assert_eq!(key_set.public.key_ids(), vec!["old", generated().kid.as_str()]);
        assert!(key_set.public.keys.iter().all(|key| !key.is_private()));
    }

    #[test]
    fn test_key_set_deduplicates_by_key_id() {
        let current = generated().clone();
        let existing = vec![
            public_only("a"),
            public_only("a"),
            current.public(),
            public_only("b"),
        ];

        let key_set = KeySet::with_existing(current.clone(), &existing);
        assert_eq!(key_set.public.key_ids(), vec!["a", current.kid.as_str(), "b"]);
    }
}
