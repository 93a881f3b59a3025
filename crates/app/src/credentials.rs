use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

use optout_store::{SecretStore, SecretStoreError};
use optout_twitch::{OAuthError, TwitchOAuthClient};
use optout_util::CredentialSeed;

pub const SECRET_ACCESS_TOKEN: &str = "TWITCH_USER_ACCESS_TOKEN";
pub const SECRET_REFRESH_TOKEN: &str = "TWITCH_USER_REFRESH_TOKEN";
pub const SECRET_EXPIRES_AT: &str = "TWITCH_USER_EXPIRES_AT";
pub const SECRET_OBTAINED_AT: &str = "TWITCH_USER_OBTAINED_AT";

/// Current bearer credential pair for the bot user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialState {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub obtained_at: DateTime<Utc>,
}

impl CredentialState {
    /// Builds the startup state from configuration, filling absent
    /// timestamps from the current clock.
    pub fn from_seed(seed: CredentialSeed, now: DateTime<Utc>) -> Self {
        Self {
            access_token: seed.access_token,
            refresh_token: seed.refresh_token,
            expires_at: seed.expires_at.unwrap_or(now),
            obtained_at: seed.obtained_at.unwrap_or(now),
        }
    }
}

/// Owns the rotating user credential and executes the refresh protocol.
///
/// The state sits behind a `tokio::sync::Mutex`, and
/// [`TokenManager::refresh_after_auth_failure`] compares the caller's
/// observed token against the stored one while holding the lock. Concurrent
/// auth failures therefore collapse into a single provider refresh: the
/// first caller through the lock rotates the pair, later callers see a token
/// that no longer matches what they observed and reuse the rotated one.
#[derive(Clone)]
pub struct TokenManager {
    oauth: TwitchOAuthClient,
    secrets: SecretStore,
    state: Arc<Mutex<CredentialState>>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl TokenManager {
    pub fn new(oauth: TwitchOAuthClient, secrets: SecretStore, initial: CredentialState) -> Self {
        Self {
            oauth,
            secrets,
            state: Arc::new(Mutex::new(initial)),
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the access token outbound calls should currently use.
    pub async fn access_token(&self) -> String {
        self.state.lock().await.access_token.clone()
    }

    /// Rotates the credential pair after an outbound call was rejected.
    ///
    /// `observed` is the access token the caller was using when the channel
    /// returned 401/403. The rotated pair is persisted to the secret store
    /// before control returns; when persistence fails the pair is still
    /// installed in-process, since the provider has already invalidated the
    /// old refresh token.
    pub async fn refresh_after_auth_failure(
        &self,
        observed: &str,
    ) -> Result<String, CredentialError> {
        let mut state = self.state.lock().await;
        if state.access_token != observed {
            counter!("token_refresh_total", "result" => "reused").increment(1);
            return Ok(state.access_token.clone());
        }

        let token = match self.oauth.refresh_token(&state.refresh_token).await {
            Ok(token) => token,
            Err(err) => {
                counter!("token_refresh_total", "result" => "error").increment(1);
                error!(stage = "credentials", error = %err, "token refresh failed");
                return Err(CredentialError::Refresh(err));
            }
        };

        let now = (self.clock)();
        let refreshed = CredentialState {
            access_token: token.access_token.clone(),
            refresh_token: token
                .refresh_token
                .clone()
                .unwrap_or_else(|| state.refresh_token.clone()),
            expires_at: token.expires_at(now),
            obtained_at: now,
        };

        let persisted = self.persist(&refreshed).await;
        *state = refreshed;
        info!(
            stage = "credentials",
            expires_at = %state.expires_at.to_rfc3339(),
            "access token rotated"
        );

        match persisted {
            Ok(()) => {
                counter!("token_refresh_total", "result" => "ok").increment(1);
                Ok(state.access_token.clone())
            }
            Err(err) => {
                counter!("token_refresh_total", "result" => "persist_error").increment(1);
                error!(stage = "credentials", error = %err, "failed to persist rotated credentials");
                Err(CredentialError::Persist(err))
            }
        }
    }

    async fn persist(&self, state: &CredentialState) -> Result<(), SecretStoreError> {
        self.secrets
            .put_secret(SECRET_ACCESS_TOKEN, &state.access_token)
            .await?;
        self.secrets
            .put_secret(SECRET_REFRESH_TOKEN, &state.refresh_token)
            .await?;
        self.secrets
            .put_secret(SECRET_EXPIRES_AT, &state.expires_at.to_rfc3339())
            .await?;
        self.secrets
            .put_secret(SECRET_OBTAINED_AT, &state.obtained_at.to_rfc3339())
            .await?;
        Ok(())
    }
}

/// Errors surfaced by the credential lifecycle manager.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("failed to refresh access token: {0}")]
    Refresh(#[from] OAuthError),
    #[error("failed to persist rotated credentials: {0}")]
    Persist(#[from] SecretStoreError),
}
