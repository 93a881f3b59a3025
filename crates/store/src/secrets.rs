use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

/// Client for the key/value secret-persistence API.
///
/// Rotated credentials are written here so restarts pick up the latest pair;
/// the in-process copy is only a cache.
#[derive(Clone)]
pub struct SecretStore {
    http: Client,
    base_url: Url,
    token: String,
}

impl SecretStore {
    /// Creates a new secret store client with the provided configuration.
    pub fn new(base_url: Url, token: impl Into<String>, http: Client) -> Self {
        Self {
            http,
            base_url,
            token: token.into(),
        }
    }

    /// Durably stores one named secret value, overwriting any previous value.
    pub async fn put_secret(&self, name: &str, value: &str) -> Result<(), SecretStoreError> {
        let url = self.base_url.join(&format!("secrets/{name}"))?;
        let response = self
            .http
            .put(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .json(&serde_json::json!({ "value": value }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<unavailable>"));
            return Err(SecretStoreError::Status { status, body });
        }
        Ok(())
    }
}

/// Errors produced by the secret store client.
#[derive(Debug, Error)]
pub enum SecretStoreError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}
