use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use url::Url;

/// Client responsible for OAuth flow interactions with Twitch.
#[derive(Clone)]
pub struct TwitchOAuthClient {
    http: Client,
    base_url: Url,
    client_id: String,
    client_secret: String,
}

impl TwitchOAuthClient {
    /// Creates a new client with the provided HTTP instance and configuration.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        base_url: Url,
        http: Client,
    ) -> Self {
        Self {
            http,
            base_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Exchanges the stored refresh token for a new access/refresh pair.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, OAuthError> {
        let url = self.base_url.join("token")?;
        let response = self
            .http
            .post(url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        parse_json(response).await
    }
}

/// Token exchange/refresh response returned by Twitch.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Vec<String>,
    pub token_type: String,
}

impl TokenResponse {
    /// Computes the expiration timestamp relative to the provided instant.
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in as i64)
    }
}

/// Errors that can occur during OAuth interactions.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

async fn parse_json<T>(response: Response) -> Result<T, OAuthError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(OAuthError::Status { status, body });
    }

    Ok(response.json().await?)
}
