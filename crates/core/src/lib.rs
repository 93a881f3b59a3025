pub mod classifier;
pub mod types;

pub use classifier::{classify, ClassifyError, WebhookEvent, WhisperEvent, WhisperText};
pub use types::{Command, MessageType, OptOutRecord, Platform};
