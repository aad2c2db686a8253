//! # Tokendings
//!
//! Client for the TokenX token-exchange broker ("tokendings").
//!
//! - `assertion.rs` - Self-signed bearer assertions authenticating the controller
//! - `software_statement.rs` - Signed access policy statement sent on registration
//! - `client.rs` - HTTP calls against a single broker instance
//!
//! `Tokendings` fans registration and deletion out over every configured instance,
//! in configuration order, stopping at the first instance that fails.

mod assertion;
mod client;
mod software_statement;

pub use assertion::{client_assertion, ClientAssertionClaims};
pub use client::{ClientRegistration, TokendingsClient};
pub use software_statement::SoftwareStatement;

use crate::constants::WELL_KNOWN_OAUTH_PATH;
use crate::jwk::{Jwk, JwkSet, KeyError};
use async_trait::async_trait;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TokendingsError {
    #[error("no access policy defined")]
    MissingAccessPolicy,
    #[error("invalid broker URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("failed to sign JWT: {0}")]
    Sign(#[from] jsonwebtoken::errors::Error),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} responded {status}: {body}")]
    UnexpectedStatus { url: String, status: u16, body: String },
    #[error("tokendings instance {instance}: {source}")]
    Instance {
        instance: String,
        #[source]
        source: Box<TokendingsError>,
    },
}

impl TokendingsError {
    fn for_instance(instance: &Instance, source: Self) -> Self {
        Self::Instance {
            instance: instance.base_url.clone(),
            source: Box::new(source),
        }
    }
}

/// Canonical identity of an application at the broker
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId {
    pub cluster: String,
    pub namespace: String,
    pub name: String,
}

impl ClientId {
    pub fn new(cluster: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.cluster, self.namespace, self.name)
    }
}

/// Endpoints published to applications in their secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub issuer: String,
    pub jwks_uri: String,
    pub token_endpoint: String,
}

/// One broker deployment together with the controller's credentials for it
#[derive(Debug, Clone)]
pub struct Instance {
    pub base_url: String,
    /// Client id the controller authenticates as
    pub client_id: String,
    /// Key the controller signs assertions and software statements with
    pub client_jwk: Jwk,
    pub metadata: Metadata,
    pub well_known_url: String,
}

impl Instance {
    pub fn new(base_url: &str, client_id: impl Into<String>, client_jwk: Jwk) -> Result<Self, TokendingsError> {
        url::Url::parse(base_url).map_err(|source| TokendingsError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self {
            metadata: Metadata {
                issuer: base_url.clone(),
                jwks_uri: format!("{base_url}/jwks"),
                token_endpoint: format!("{base_url}/token"),
            },
            well_known_url: format!("{base_url}{WELL_KNOWN_OAUTH_PATH}"),
            client_id: client_id.into(),
            client_jwk,
            base_url,
        })
    }

    pub fn registration_endpoint(&self) -> String {
        format!("{}/registration/client", self.base_url)
    }
}

/// Registration operations against the configured broker instances
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Instances in configuration order; the first one is published to applications
    fn instances(&self) -> &[Instance];

    /// Register (or re-register) `client_id` with `jwks` at every instance
    async fn register(
        &self,
        client_id: &ClientId,
        jwks: &JwkSet,
        statement: &SoftwareStatement,
    ) -> Result<(), TokendingsError>;

    /// Remove `client_id` from every instance; unknown clients count as removed
    async fn deregister(&self, client_id: &ClientId) -> Result<(), TokendingsError>;
}

/// HTTP-backed `BrokerClient`
#[derive(Debug, Clone)]
pub struct Tokendings {
    client: TokendingsClient,
    instances: Vec<Instance>,
}

impl Tokendings {
    pub fn new(client: TokendingsClient, instances: Vec<Instance>) -> Self {
        Self { client, instances }
    }
}

#[async_trait]
impl BrokerClient for Tokendings {
    fn instances(&self) -> &[Instance] {
        &self.instances
    }

    async fn register(
        &self,
        client_id: &ClientId,
        jwks: &JwkSet,
        statement: &SoftwareStatement,
    ) -> Result<(), TokendingsError> {
        for instance in &self.instances {
            let registration = ClientRegistration {
                client_name: client_id.to_string(),
                jwks: jwks.clone(),
                software_statement: statement
                    .sign(&instance.client_jwk)
                    .map_err(|err| TokendingsError::for_instance(instance, err))?,
            };

            if let Err(err) = self.client.register(instance, &registration).await {
                warn!(client = %client_id, instance = %instance.base_url, "registration failed: {}", err);
                return Err(TokendingsError::for_instance(instance, err));
            }
            info!(
                client = %client_id,
                instance = %instance.base_url,
                keys = ?jwks.key_ids(),
                "registered client"
            );
        }
        Ok(())
    }

    async fn deregister(&self, client_id: &ClientId) -> Result<(), TokendingsError> {
        for instance in &self.instances {
            if let Err(err) = self.client.delete_client(instance, client_id).await {
                warn!(client = %client_id, instance = %instance.base_url, "deletion failed: {}", err);
                return Err(TokendingsError::for_instance(instance, err));
            }
            info!(client = %client_id, instance = %instance.base_url, "deleted client");
        }
        Ok(())
    }
}
