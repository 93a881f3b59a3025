use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{info, warn};

use optout_core::classifier::WhisperEvent;
use optout_core::types::{Command, Platform};
use optout_store::{OptOutStore, StoreError};

use crate::notify::Notifier;

const OPT_OUT_CONFIRMATION: &str = "You have been opted out of the leaderboards";
const OPT_IN_CONFIRMATION: &str = "You have been opted back into the leaderboards";

/// Result of dispatching one whisper command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    OptedOut,
    OptedIn,
    Ignored,
}

impl CommandOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OptedOut => "opted_out",
            Self::OptedIn => "opted_in",
            Self::Ignored => "ignored",
        }
    }
}

/// Maps recognized whisper commands onto idempotent store mutations.
#[derive(Clone)]
pub struct CommandExecutor {
    store: OptOutStore,
    notifier: Notifier,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl CommandExecutor {
    pub fn new(
        store: OptOutStore,
        notifier: Notifier,
        clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Executes the command embedded in the whisper text.
    ///
    /// Store failures abort the command and propagate; the platform is
    /// expected to redeliver. A failed confirmation whisper is only logged —
    /// the mutation is already durable and must not be lost because a
    /// best-effort message bounced.
    pub async fn execute(&self, event: &WhisperEvent) -> Result<CommandOutcome, StoreError> {
        let command = Command::parse(&event.message.text);
        counter!("optout_commands_total", "kind" => command.metric_kind()).increment(1);

        let outcome = match command {
            Command::OptOut => {
                self.store
                    .add(&event.from_user_id, Platform::Twitch, self.now())
                    .await?;
                info!(
                    stage = "command",
                    user_id = %event.from_user_id,
                    "user opted out"
                );
                self.confirm(&event.from_user_id, OPT_OUT_CONFIRMATION).await;
                CommandOutcome::OptedOut
            }
            Command::OptIn => {
                self.store
                    .remove(&event.from_user_id, Platform::Twitch)
                    .await?;
                info!(
                    stage = "command",
                    user_id = %event.from_user_id,
                    "user opted back in"
                );
                self.confirm(&event.from_user_id, OPT_IN_CONFIRMATION).await;
                CommandOutcome::OptedIn
            }
            Command::Unrecognized(text) => {
                info!(
                    stage = "command",
                    user_id = %event.from_user_id,
                    text,
                    "ignoring unrecognized command"
                );
                CommandOutcome::Ignored
            }
        };

        Ok(outcome)
    }

    async fn confirm(&self, user_id: &str, text: &str) {
        if let Err(err) = self.notifier.notify(user_id, text).await {
            warn!(
                stage = "command",
                user_id,
                error = %err,
                "failed to send confirmation whisper"
            );
        }
    }
}
