pub mod helix;
pub mod oauth;

pub use helix::{HelixClient, HelixError, SendWhisperRequest};
pub use oauth::{OAuthError, TokenResponse, TwitchOAuthClient};
