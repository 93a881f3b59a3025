use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use metrics::{counter, histogram};
use tracing::{error, info, warn};

use optout_core::classifier::{classify, ClassifyError, WebhookEvent};
use optout_core::types::MessageType;
use optout_store::StoreError;

use crate::problem::ProblemResponse;
use crate::router::AppState;
use crate::signature::{self, WebhookEnvelope};

const HEADER_MESSAGE_ID: &str = "Twitch-Eventsub-Message-Id";
const HEADER_TIMESTAMP: &str = "Twitch-Eventsub-Message-Timestamp";
const HEADER_SIGNATURE: &str = "Twitch-Eventsub-Message-Signature";
const HEADER_MESSAGE_TYPE: &str = "Twitch-Eventsub-Message-Type";

const MAX_TIMESTAMP_SKEW_SECS: i64 = 600;

pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ProblemResponse> {
    let start = Instant::now();
    let label = headers
        .get(HEADER_MESSAGE_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| MessageType::try_from(raw).ok())
        .map(MessageType::metric_label)
        .unwrap_or("unknown");

    let result = process(&state, &headers, &body).await;
    histogram!("webhook_ack_latency_seconds", "type" => label)
        .record(start.elapsed().as_secs_f64());
    result
}

async fn process(
    state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<Response, ProblemResponse> {
    let message_type_raw = headers
        .get(HEADER_MESSAGE_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            ProblemResponse::bad_request(
                "missing_header",
                format!("missing header {HEADER_MESSAGE_TYPE}"),
            )
        })?;
    let message_type = MessageType::try_from(message_type_raw)
        .map_err(|detail| ProblemResponse::bad_request("invalid_message_type", detail))?;
    let label = message_type.metric_label();

    // The three authentication headers feed the MAC; a delivery without them
    // cannot be verified and is rejected the same way as a bad signature.
    let message_id = auth_header(headers, HEADER_MESSAGE_ID)?;
    let timestamp_raw = auth_header(headers, HEADER_TIMESTAMP)?;
    let provided_signature = auth_header(headers, HEADER_SIGNATURE)?;

    let timestamp = chrono::DateTime::parse_from_rfc3339(timestamp_raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|err| {
            ProblemResponse::bad_request("invalid_timestamp", format!("invalid RFC3339 timestamp: {err}"))
        })?;

    let now = state.now();
    let skew = now.signed_duration_since(timestamp).num_seconds().abs();
    if skew > MAX_TIMESTAMP_SKEW_SECS {
        warn!(
            stage = "ingress",
            %message_id,
            %timestamp_raw,
            now = %now.to_rfc3339(),
            skew_seconds = skew,
            "timestamp outside ±10 minute window"
        );
        return Err(ProblemResponse::bad_request(
            "timestamp_out_of_range",
            "timestamp outside the allowed ±10 minute window",
        ));
    }

    let secret = state.webhook_secret();
    let envelope = WebhookEnvelope {
        message_id,
        timestamp: timestamp_raw,
        signature: provided_signature,
        body,
    };
    if !signature::verify(&secret, &envelope) {
        counter!("eventsub_invalid_signature_total", "type" => label).increment(1);
        warn!(stage = "ingress", %message_id, "rejected delivery with invalid signature");
        return Err(ProblemResponse::invalid_signature("signature mismatch"));
    }

    counter!("eventsub_ingress_total", "type" => label).increment(1);

    let body_str = std::str::from_utf8(body).map_err(|_| {
        ProblemResponse::bad_request("invalid_payload", "request body must be valid UTF-8")
    })?;

    let event = classify(message_type, body_str).map_err(|err| match err {
        ClassifyError::MissingChallenge(_) => {
            ProblemResponse::bad_request("missing_challenge", err.to_string())
        }
        ClassifyError::InvalidNotification(_) => {
            ProblemResponse::bad_request("invalid_payload", err.to_string())
        }
    })?;

    match event {
        WebhookEvent::Challenge(challenge) => {
            info!(stage = "ingress", %message_id, "answering subscription handshake");
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(axum::http::header::CONTENT_TYPE, "text/plain")
                .body(challenge.into())
                .unwrap())
        }
        WebhookEvent::Revocation => {
            warn!(stage = "ingress", %message_id, "subscription revoked by the platform");
            Ok(Response::builder()
                .status(StatusCode::NO_CONTENT)
                .body(axum::body::Body::empty())
                .unwrap())
        }
        WebhookEvent::Notification(whisper) => {
            let outcome = state
                .command_executor()
                .execute(&whisper)
                .await
                .map_err(|err| match err {
                    StoreError::Auth { .. } => {
                        error!(stage = "ingress", %message_id, error = %err, "record store rejected service credentials");
                        ProblemResponse::bad_gateway(
                            "store_auth_failure",
                            "record store rejected service credentials",
                        )
                    }
                    other => {
                        error!(stage = "ingress", %message_id, error = %other, "failed to update opt-out record");
                        ProblemResponse::bad_gateway(
                            "store_request_failure",
                            "failed to update opt-out record",
                        )
                    }
                })?;
            info!(
                stage = "ingress",
                %message_id,
                outcome = outcome.as_str(),
                "notification processed"
            );
            Ok(Response::builder()
                .status(StatusCode::OK)
                .body(axum::body::Body::empty())
                .unwrap())
        }
    }
}

fn auth_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ProblemResponse> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ProblemResponse::invalid_signature(format!("missing header {name}")))
}
