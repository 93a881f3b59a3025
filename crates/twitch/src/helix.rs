use reqwest::{Client, Method, Response, StatusCode};
use thiserror::Error;
use url::Url;

/// Client for the Twitch Helix whisper API.
#[derive(Clone)]
pub struct HelixClient {
    http: Client,
    base_url: Url,
    client_id: String,
}

impl HelixClient {
    /// Creates a new Helix client with the provided configuration.
    pub fn new(client_id: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            client_id: client_id.into(),
        }
    }

    /// Sends a whisper from the bot account to the target user.
    pub async fn send_whisper(
        &self,
        access_token: &str,
        request: &SendWhisperRequest<'_>,
    ) -> Result<(), HelixError> {
        let mut url = self.base_url.join("whispers")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("from_user_id", request.from_user_id);
            query.append_pair("to_user_id", request.to_user_id);
        }

        let body = serde_json::json!({ "message": request.message });
        let response = self
            .authorized_request(Method::POST, url, access_token)
            .json(&body)
            .send()
            .await?;

        ensure_success(response).await
    }

    fn authorized_request(
        &self,
        method: Method,
        url: Url,
        access_token: &str,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Client-Id", &self.client_id)
            .header("Authorization", format!("Bearer {access_token}"))
    }
}

/// Parameters for sending a whisper.
pub struct SendWhisperRequest<'a> {
    pub from_user_id: &'a str,
    pub to_user_id: &'a str,
    pub message: &'a str,
}

/// Errors produced by the Helix client.
#[derive(Debug, Error)]
pub enum HelixError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

impl HelixError {
    /// Whether the failure indicates a rejected bearer credential.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Status { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}

async fn ensure_success(response: Response) -> Result<(), HelixError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(HelixError::Status { status, body });
    }
    Ok(())
}
