use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const OPT_OUT_TOKEN: &str = "optout";
pub const OPT_IN_TOKEN: &str = "optin";

/// EventSub message category carried in the message-type header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Verification,
    Notification,
    Revocation,
}

impl TryFrom<&str> for MessageType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "webhook_callback_verification" => Ok(Self::Verification),
            "notification" => Ok(Self::Notification),
            "revocation" => Ok(Self::Revocation),
            other => Err(format!("unsupported message type: {other}")),
        }
    }
}

impl MessageType {
    pub fn metric_label(self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::Notification => "notification",
            Self::Revocation => "revocation",
        }
    }
}

/// Chat platforms an opt-out can be recorded against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitch,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Twitch => "twitch",
        }
    }
}

/// Command decoded from the free-text body of a whisper.
///
/// Only the first whitespace-delimited token is significant and matching is
/// case-sensitive; everything else is reported back verbatim so callers can
/// log what the user actually sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    OptOut,
    OptIn,
    Unrecognized(String),
}

impl Command {
    pub fn parse(text: &str) -> Self {
        match text.split_whitespace().next() {
            Some(OPT_OUT_TOKEN) => Self::OptOut,
            Some(OPT_IN_TOKEN) => Self::OptIn,
            _ => Self::Unrecognized(text.to_string()),
        }
    }

    pub fn metric_kind(&self) -> &'static str {
        match self {
            Self::OptOut => "optout",
            Self::OptIn => "optin",
            Self::Unrecognized(_) => "unrecognized",
        }
    }
}

/// A single user's suppression entry for one platform.
///
/// Identity is `(user_id, platform)`; the record is a presence flag and has
/// no mutable fields after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptOutRecord {
    pub user_id: String,
    pub platform: Platform,
    pub created_at: DateTime<Utc>,
}

impl OptOutRecord {
    /// Document identifier used by the record store.
    pub fn document_id(user_id: &str, platform: Platform) -> String {
        format!("{user_id}_{}", platform.as_str())
    }
}
