//! HTTP protocol of a single tokendings instance.

use crate::jwk::JwkSet;
use crate::tokendings::{client_assertion, ClientId, Instance, TokendingsError};
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Body of `POST /registration/client`
#[derive(Debug, Clone, Serialize)]
pub struct ClientRegistration {
    pub client_name: String,
    pub jwks: JwkSet,
    pub software_statement: String,
}

#[derive(Debug, Clone)]
pub struct TokendingsClient {
    http: reqwest::Client,
    assertion_validity: Duration,
}

impl TokendingsClient {
    /// `timeout` bounds every request; a timed out request is a retryable failure
    pub fn new(timeout: Duration, assertion_validity: Duration) -> Result<Self, TokendingsError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TokendingsError::HttpClient)?;
        Ok(Self {
            http,
            assertion_validity,
        })
    }

    pub async fn register(
        &self,
        instance: &Instance,
        registration: &ClientRegistration,
    ) -> Result<(), TokendingsError> {
        let url = instance.registration_endpoint();
        let assertion = client_assertion(
            &instance.client_jwk,
            &instance.client_id,
            &url,
            self.assertion_validity,
        )?;

        debug!(url = %url, client = %registration.client_name, "registering client");
        let response = self
            .http
            .post(&url)
            .bearer_auth(assertion)
            .json(registration)
            .send()
            .await
            .map_err(|source| TokendingsError::Request {
                url: url.clone(),
                source,
            })?;

        expect_status(url, response, &[StatusCode::CREATED]).await
    }

    /// 404 is accepted so that repeated deletes are harmless
    pub async fn delete_client(&self, instance: &Instance, client_id: &ClientId) -> Result<(), TokendingsError> {
        let audience = instance.registration_endpoint();
        let client_name: String = url::form_urlencoded::byte_serialize(client_id.to_string().as_bytes()).collect();
        let url = format!("{audience}/{client_name}");
        let assertion = client_assertion(
            &instance.client_jwk,
            &instance.client_id,
            &audience,
            self.assertion_validity,
        )?;

        debug!(url = %url, client = %client_id, "deleting client");
        let response = self
            .http
            .delete(&url)
            .bearer_auth(assertion)
            .send()
            .await
            .map_err(|source| TokendingsError::Request {
                url: url.clone(),
                source,
            })?;

        expect_status(url, response, &[StatusCode::NO_CONTENT, StatusCode::NOT_FOUND]).await
    }
}

async fn expect_status(
    url: String,
    response: reqwest::Response,
    accepted: &[StatusCode],
) -> Result<(), TokendingsError> {
    let status = response.status();
    if accepted.contains(&status) {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(TokendingsError::UnexpectedStatus {
        url,
        status: status.as_u16(),
        body,
    })
}
