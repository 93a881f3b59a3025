use metrics::counter;
use thiserror::Error;
use tracing::warn;

use optout_twitch::{HelixClient, HelixError, SendWhisperRequest};

use crate::credentials::{CredentialError, TokenManager};

/// Sends confirmation whispers to users over the rotating user credential.
#[derive(Clone)]
pub struct Notifier {
    helix: HelixClient,
    tokens: TokenManager,
    bot_user_id: String,
}

impl Notifier {
    pub fn new(helix: HelixClient, tokens: TokenManager, bot_user_id: impl Into<String>) -> Self {
        Self {
            helix,
            tokens,
            bot_user_id: bot_user_id.into(),
        }
    }

    /// Whispers `text` to the user, refreshing the credential at most once.
    ///
    /// A 401/403 on the first send triggers the refresh protocol and a
    /// single retry with the rotated token. A 401/403 on the retry is
    /// terminal for this request; retrying or refreshing again against a
    /// provider that is rejecting the client outright cannot succeed.
    pub async fn notify(&self, user_id: &str, text: &str) -> Result<(), NotifyError> {
        let request = SendWhisperRequest {
            from_user_id: &self.bot_user_id,
            to_user_id: user_id,
            message: text,
        };

        let token = self.tokens.access_token().await;
        match self.helix.send_whisper(&token, &request).await {
            Ok(()) => {
                counter!("whisper_send_total", "result" => "ok").increment(1);
                Ok(())
            }
            Err(err) if err.is_auth_failure() => {
                warn!(
                    stage = "notify",
                    user_id,
                    error = %err,
                    "outbound send rejected; rotating credential"
                );
                let rotated = self.tokens.refresh_after_auth_failure(&token).await?;
                match self.helix.send_whisper(&rotated, &request).await {
                    Ok(()) => {
                        counter!("whisper_send_total", "result" => "retried").increment(1);
                        Ok(())
                    }
                    Err(err) if err.is_auth_failure() => {
                        counter!("whisper_send_total", "result" => "auth_error").increment(1);
                        Err(NotifyError::ChannelAuth(err))
                    }
                    Err(err) => {
                        counter!("whisper_send_total", "result" => "error").increment(1);
                        Err(NotifyError::ChannelRequest(err))
                    }
                }
            }
            Err(err) => {
                counter!("whisper_send_total", "result" => "error").increment(1);
                Err(NotifyError::ChannelRequest(err))
            }
        }
    }
}

/// Errors surfaced when a confirmation whisper cannot be delivered.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("channel rejected the rotated credential: {0}")]
    ChannelAuth(HelixError),
    #[error("failed to deliver whisper: {0}")]
    ChannelRequest(HelixError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialState;
    use chrono::{DateTime, Utc};
    use httpmock::prelude::*;
    use optout_store::SecretStore;
    use optout_twitch::TwitchOAuthClient;
    use reqwest::Client;
    use serde_json::json;
    use std::sync::Arc;
    use url::Url;

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .expect("fixed time")
            .with_timezone(&Utc)
    }

    fn notifier(server: &MockServer) -> Notifier {
        let http = Client::builder().build().expect("client");
        let oauth = TwitchOAuthClient::new(
            "client",
            "secret",
            Url::parse(&server.url("/oauth2/")).expect("url"),
            http.clone(),
        );
        let secrets = SecretStore::new(
            Url::parse(&server.url("/kv/")).expect("url"),
            "kv-token",
            http.clone(),
        );
        let helix = HelixClient::new(
            "client",
            Url::parse(&server.url("/helix/")).expect("url"),
            http,
        );
        let initial = CredentialState {
            access_token: "old-access".to_string(),
            refresh_token: "old-refresh".to_string(),
            expires_at: fixed_now(),
            obtained_at: fixed_now(),
        };
        let now = fixed_now();
        let tokens =
            TokenManager::new(oauth, secrets, initial).with_clock(Arc::new(move || now));
        Notifier::new(helix, tokens, "bot-1")
    }

    async fn mock_refresh(server: &MockServer) -> httpmock::Mock<'_> {
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/oauth2/token")
                    .body_contains("grant_type=refresh_token");
                then.status(200).json_body(json!({
                    "access_token": "new-access",
                    "refresh_token": "new-refresh",
                    "expires_in": 3600,
                    "scope": [],
                    "token_type": "bearer"
                }));
            })
            .await
    }

    async fn mock_secret_puts(server: &MockServer) -> httpmock::Mock<'_> {
        server
            .mock_async(|when, then| {
                when.method(PUT).path_contains("/kv/secrets/");
                then.status(200);
            })
            .await
    }

    async fn mock_whisper<'a>(
        server: &'a MockServer,
        token: &str,
        status: u16,
    ) -> httpmock::Mock<'a> {
        let authorization = format!("Bearer {token}");
        server
            .mock_async(move |when, then| {
                when.method(POST)
                    .path("/helix/whispers")
                    .header("Authorization", authorization);
                then.status(status);
            })
            .await
    }

    #[tokio::test]
    async fn delivers_whisper_with_current_token() {
        let server = MockServer::start_async().await;
        let send = mock_whisper(&server, "old-access", 204).await;
        let notifier = notifier(&server);

        notifier.notify("u-1", "hello").await.expect("notify");
        send.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_token_is_rotated_and_send_retried_once() {
        let server = MockServer::start_async().await;
        let rejected = mock_whisper(&server, "old-access", 401).await;
        let retried = mock_whisper(&server, "new-access", 204).await;
        let refresh = mock_refresh(&server).await;
        let persisted = mock_secret_puts(&server).await;
        let notifier = notifier(&server);

        notifier.notify("u-1", "hello").await.expect("notify");
        rejected.assert_async().await;
        refresh.assert_async().await;
        persisted.assert_hits_async(4).await;
        retried.assert_async().await;
    }

    #[tokio::test]
    async fn second_rejection_does_not_refresh_again() {
        let server = MockServer::start_async().await;
        let rejected = mock_whisper(&server, "old-access", 401).await;
        let retried = mock_whisper(&server, "new-access", 401).await;
        let refresh = mock_refresh(&server).await;
        let _persisted = mock_secret_puts(&server).await;
        let notifier = notifier(&server);

        let err = notifier.notify("u-1", "hello").await.expect_err("notify");
        assert!(matches!(err, NotifyError::ChannelAuth(_)));
        rejected.assert_async().await;
        retried.assert_async().await;
        refresh.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn non_auth_failure_is_not_retried() {
        let server = MockServer::start_async().await;
        let send = mock_whisper(&server, "old-access", 500).await;
        let refresh = mock_refresh(&server).await;
        let notifier = notifier(&server);

        let err = notifier.notify("u-1", "hello").await.expect_err("notify");
        assert!(matches!(err, NotifyError::ChannelRequest(_)));
        send.assert_async().await;
        refresh.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn refresh_failure_aborts_without_retrying_the_send() {
        let server = MockServer::start_async().await;
        let send = mock_whisper(&server, "old-access", 401).await;
        let refresh = server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(401).body("client rejected");
            })
            .await;
        let notifier = notifier(&server);

        let err = notifier.notify("u-1", "hello").await.expect_err("notify");
        assert!(matches!(
            err,
            NotifyError::Credential(CredentialError::Refresh(_))
        ));
        send.assert_hits_async(1).await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn concurrent_rejections_share_one_refresh() {
        let server = MockServer::start_async().await;
        let _rejected = mock_whisper(&server, "old-access", 401).await;
        let _retried = mock_whisper(&server, "new-access", 204).await;
        let refresh = mock_refresh(&server).await;
        let _persisted = mock_secret_puts(&server).await;
        let notifier = notifier(&server);

        let (first, second) = tokio::join!(
            notifier.notify("u-1", "hello"),
            notifier.notify("u-2", "hello"),
        );
        first.expect("first notify");
        second.expect("second notify");
        refresh.assert_hits_async(1).await;
    }
}
