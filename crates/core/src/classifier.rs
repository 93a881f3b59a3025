use serde::Deserialize;
use thiserror::Error;

use crate::types::MessageType;

/// Classified webhook payload, one variant per message category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Subscription handshake; the challenge string must be echoed verbatim.
    Challenge(String),
    /// The platform revoked the subscription; acknowledge and stop.
    Revocation,
    /// A whisper was delivered to the bot account.
    Notification(WhisperEvent),
}

/// Inner event of a whisper notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WhisperEvent {
    pub from_user_id: String,
    pub from_user_name: String,
    pub message: WhisperText,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WhisperText {
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct VerificationPayload {
    challenge: String,
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    event: WhisperEvent,
}

/// Errors produced when a payload does not match its declared message type.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("verification payload must include challenge: {0}")]
    MissingChallenge(serde_json::Error),
    #[error("notification payload does not match the whisper event shape: {0}")]
    InvalidNotification(serde_json::Error),
}

/// Decodes the raw body into a closed [`WebhookEvent`] variant.
///
/// The message type comes from transport metadata, so the body is parsed
/// strictly against the shape that type promises; anything else is an error
/// rather than loosely-typed data leaking further in.
pub fn classify(kind: MessageType, body: &str) -> Result<WebhookEvent, ClassifyError> {
    match kind {
        MessageType::Verification => {
            let payload: VerificationPayload =
                serde_json::from_str(body).map_err(ClassifyError::MissingChallenge)?;
            Ok(WebhookEvent::Challenge(payload.challenge))
        }
        MessageType::Revocation => Ok(WebhookEvent::Revocation),
        MessageType::Notification => {
            let payload: NotificationPayload =
                serde_json::from_str(body).map_err(ClassifyError::InvalidNotification)?;
            Ok(WebhookEvent::Notification(payload.event))
        }
    }
}
