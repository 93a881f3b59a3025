pub mod secrets;

use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use thiserror::Error;
use url::Url;

use optout_core::types::{OptOutRecord, Platform};

pub use secrets::{SecretStore, SecretStoreError};

/// Client for the external opt-out record store.
///
/// Records are plain documents keyed by `(user_id, platform)`; the store
/// itself has document PUT/GET/DELETE semantics behind a service-account
/// bearer token.
#[derive(Clone)]
pub struct OptOutStore {
    http: Client,
    base_url: Url,
    token: String,
}

/// Result of an [`OptOutStore::add`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Created,
    AlreadyOptedOut,
}

/// Result of an [`OptOutStore::remove`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotOptedOut,
}

impl OptOutStore {
    /// Creates a new store client with the provided configuration.
    pub fn new(base_url: Url, token: impl Into<String>, http: Client) -> Self {
        Self {
            http,
            base_url,
            token: token.into(),
        }
    }

    /// Records an opt-out for the user, skipping the write if one exists.
    ///
    /// Calling this twice for the same `(user_id, platform)` leaves exactly
    /// one stored record and returns success both times.
    pub async fn add(
        &self,
        user_id: &str,
        platform: Platform,
        created_at: DateTime<Utc>,
    ) -> Result<AddOutcome, StoreError> {
        let url = self.document_url(user_id, platform)?;

        let response = self
            .authorized_request(Method::GET, url.clone())
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => return Ok(AddOutcome::AlreadyOptedOut),
            StatusCode::NOT_FOUND => {}
            _ => return Err(classify_failure(response).await),
        }

        let record = OptOutRecord {
            user_id: user_id.to_string(),
            platform,
            created_at,
        };
        let response = self
            .authorized_request(Method::PUT, url)
            .json(&record)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(AddOutcome::Created)
        } else {
            Err(classify_failure(response).await)
        }
    }

    /// Deletes the user's opt-out record; an absent record is success.
    pub async fn remove(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<RemoveOutcome, StoreError> {
        let url = self.document_url(user_id, platform)?;
        let response = self.authorized_request(Method::DELETE, url).send().await?;
        match response.status() {
            status if status.is_success() => Ok(RemoveOutcome::Removed),
            StatusCode::NOT_FOUND => Ok(RemoveOutcome::NotOptedOut),
            _ => Err(classify_failure(response).await),
        }
    }

    fn document_url(&self, user_id: &str, platform: Platform) -> Result<Url, StoreError> {
        let document_id = OptOutRecord::document_id(user_id, platform);
        Ok(self.base_url.join(&format!("opt_outs/{document_id}"))?)
    }

    fn authorized_request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
    }
}

/// Errors produced by the opt-out store client.
///
/// `Auth` covers 401/403 responses from the backing store and is kept apart
/// from `Status` so callers can distinguish a dead service credential from an
/// otherwise failing request.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store rejected credentials with {status}: {body}")]
    Auth { status: StatusCode, body: String },
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

async fn classify_failure(response: Response) -> StoreError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<unavailable>"));
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        StoreError::Auth { status, body }
    } else {
        StoreError::Status { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn store(base_url: &Url) -> OptOutStore {
        OptOutStore::new(
            base_url.clone(),
            "service-token",
            Client::builder().build().expect("client"),
        )
    }

    fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .expect("timestamp")
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn add_writes_record_when_absent() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/v1/")).expect("url");
        let store = store(&base);

        let lookup = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/opt_outs/u-1_twitch")
                    .header("Authorization", "Bearer service-token");
                then.status(404);
            })
            .await;
        let write = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/v1/opt_outs/u-1_twitch")
                    .header("Authorization", "Bearer service-token")
                    .json_body_partial(
                        r#"{"user_id": "u-1", "platform": "twitch", "created_at": "2024-01-01T00:00:00Z"}"#,
                    );
                then.status(200);
            })
            .await;

        let outcome = store
            .add("u-1", Platform::Twitch, fixed_now())
            .await
            .expect("add");
        assert_eq!(outcome, AddOutcome::Created);
        lookup.assert_async().await;
        write.assert_async().await;
    }

    #[tokio::test]
    async fn add_skips_write_when_record_exists() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/v1/")).expect("url");
        let store = store(&base);

        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/opt_outs/u-1_twitch");
                then.status(200)
                    .json_body(serde_json::json!({"user_id": "u-1", "platform": "twitch"}));
            })
            .await;
        let write = server
            .mock_async(|when, then| {
                when.method(PUT).path("/v1/opt_outs/u-1_twitch");
                then.status(200);
            })
            .await;

        let outcome = store
            .add("u-1", Platform::Twitch, fixed_now())
            .await
            .expect("add");
        assert_eq!(outcome, AddOutcome::AlreadyOptedOut);
        write.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn add_twice_writes_once_and_succeeds_twice() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/v1/")).expect("url");
        let store = store(&base);

        let mut absent = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/opt_outs/u-1_twitch");
                then.status(404);
            })
            .await;
        let write = server
            .mock_async(|when, then| {
                when.method(PUT).path("/v1/opt_outs/u-1_twitch");
                then.status(200);
            })
            .await;

        let first = store
            .add("u-1", Platform::Twitch, fixed_now())
            .await
            .expect("first add");
        assert_eq!(first, AddOutcome::Created);

        absent.delete_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/opt_outs/u-1_twitch");
                then.status(200)
                    .json_body(serde_json::json!({"user_id": "u-1", "platform": "twitch"}));
            })
            .await;

        let second = store
            .add("u-1", Platform::Twitch, fixed_now())
            .await
            .expect("second add");
        assert_eq!(second, AddOutcome::AlreadyOptedOut);
        write.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn remove_deletes_existing_record() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/v1/")).expect("url");
        let store = store(&base);

        let delete = server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/v1/opt_outs/u-1_twitch")
                    .header("Authorization", "Bearer service-token");
                then.status(200);
            })
            .await;

        let outcome = store.remove("u-1", Platform::Twitch).await.expect("remove");
        assert_eq!(outcome, RemoveOutcome::Removed);
        delete.assert_async().await;
    }

    #[tokio::test]
    async fn remove_treats_absent_record_as_success() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/v1/")).expect("url");
        let store = store(&base);

        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/v1/opt_outs/u-1_twitch");
                then.status(404);
            })
            .await;

        let outcome = store.remove("u-1", Platform::Twitch).await.expect("remove");
        assert_eq!(outcome, RemoveOutcome::NotOptedOut);
    }

    #[tokio::test]
    async fn rejected_credentials_surface_as_auth_failure() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/v1/")).expect("url");
        let store = store(&base);

        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/opt_outs/u-1_twitch");
                then.status(403).body("forbidden");
            })
            .await;

        let err = store
            .add("u-1", Platform::Twitch, fixed_now())
            .await
            .expect_err("should error");
        assert!(matches!(err, StoreError::Auth { status, .. } if status == StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn server_errors_surface_as_request_failure() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/v1/")).expect("url");
        let store = store(&base);

        server
            .mock_async(|when, then| {
                when.method(DELETE).path("/v1/opt_outs/u-1_twitch");
                then.status(500).body("boom");
            })
            .await;

        let err = store
            .remove("u-1", Platform::Twitch)
            .await
            .expect_err("should error");
        assert!(
            matches!(err, StoreError::Status { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR)
        );
    }
}
