//! HTTP client for the teamserver REST API.
//!
//! Async `reqwest` client with Bearer token authentication. The token is
//! installed after a successful authentication and attached to every
//! subsequent request.

use std::sync::RwLock;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::types::{AgentIdentity, AuthRequest, AuthResponse, CommandStatusUpdate};

/// Errors from the teamserver API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("teamserver error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The narrow interface the rest of the workspace consumes.
///
/// [`ApiClient`] is the HTTP implementation; tests substitute mocks.
#[async_trait::async_trait]
pub trait Teamserver: Send + Sync {
    /// Performs the authentication handshake.
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResponse, ApiError>;

    /// Installs the bearer token used by every later call.
    fn set_token(&self, token: &str);

    /// Registers a running agent instance.
    async fn register_agent(
        &self,
        identity: &AgentIdentity,
    ) -> Result<serde_json::Value, ApiError>;

    /// Relays an encoded listener payload synchronously; returns the
    /// encoded response payload.
    async fn transmit(&self, magick: &str, payload: &str) -> Result<String, ApiError>;

    /// Reports the outcome of a dispatched command execution.
    async fn update_command_status(&self, update: &CommandStatusUpdate) -> Result<(), ApiError>;
}

#[derive(serde::Deserialize)]
struct TransmitResponse {
    payload: String,
}

/// Teamserver REST client.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl ApiClient {
    /// Creates a client with a default HTTP stack.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Ok(Self::with_client(reqwest::Client::builder().build()?, base_url))
    }

    /// Creates a client over a pre-assembled `reqwest::Client` (custom TLS,
    /// proxies) — the constructor the connection layer uses.
    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            token: RwLock::new(None),
        }
    }

    /// Performs an authenticated POST and returns the raw response body.
    async fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%url, "teamserver request");

        let mut request = self.http.post(&url).json(body);
        let token = self.token.read().unwrap().clone();
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// POST followed by JSON deserialisation of the body.
    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<R, ApiError> {
        let bytes = self.post(endpoint, body).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait::async_trait]
impl Teamserver for ApiClient {
    async fn authenticate(&self, request: &AuthRequest) -> Result<AuthResponse, ApiError> {
        self.post_json("/auth", request).await
    }

    fn set_token(&self, token: &str) {
        *self.token.write().unwrap() = Some(token.to_string());
    }

    async fn register_agent(
        &self,
        identity: &AgentIdentity,
    ) -> Result<serde_json::Value, ApiError> {
        self.post_json("/agent", identity).await
    }

    async fn transmit(&self, magick: &str, payload: &str) -> Result<String, ApiError> {
        let body = serde_json::json!({ "magick": magick, "payload": payload });
        let response: TransmitResponse = self.post_json("/listener/transmit", &body).await?;
        Ok(response.payload)
    }

    async fn update_command_status(&self, update: &CommandStatusUpdate) -> Result<(), ApiError> {
        self.post("/command/status", update).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display() {
        let err = ApiError::Api {
            status: 401,
            body: "unauthorized".into(),
        };
        assert_eq!(err.to_string(), "teamserver error 401: unauthorized");
    }

    #[test]
    fn token_is_installed_once_set() {
        let client = ApiClient::new("http://localhost:3000").unwrap();
        assert!(client.token.read().unwrap().is_none());
        client.set_token("t1");
        assert_eq!(client.token.read().unwrap().as_deref(), Some("t1"));
        client.set_token("t2");
        assert_eq!(client.token.read().unwrap().as_deref(), Some("t2"));
    }

    #[test]
    fn transmit_response_parses() {
        let parsed: TransmitResponse =
            serde_json::from_str(r#"{"payload":"H4sIAAAAAAAA"}"#).unwrap();
        assert_eq!(parsed.payload, "H4sIAAAAAAAA");
    }
}
