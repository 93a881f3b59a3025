use std::{env, fmt, net::SocketAddr};

use chrono::{DateTime, Utc};
use url::Url;

use super::server_bind_address;

pub const DEFAULT_HELIX_URL: &str = "https://api.twitch.tv/helix/";
pub const DEFAULT_OAUTH_URL: &str = "https://id.twitch.tv/oauth2/";

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns `true` when the current environment should behave as development.
    pub fn is_development(self) -> bool {
        matches!(self, Self::Development)
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Base URL plus bearer token for one of the collaborating HTTP services.
#[derive(Debug, Clone)]
pub struct ServiceEndpoint {
    pub base_url: Url,
    pub token: String,
}

/// User credential material the process starts from.
///
/// The expiry and obtainment timestamps are optional because freshly
/// provisioned deployments only know the token pair itself; the lifecycle
/// manager fills the gaps from its own clock.
#[derive(Debug, Clone)]
pub struct CredentialSeed {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub obtained_at: Option<DateTime<Utc>>,
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub webhook_secret: String,
    pub twitch_client_id: String,
    pub twitch_client_secret: String,
    pub bot_user_id: String,
    pub credential_seed: CredentialSeed,
    pub helix_base_url: Url,
    pub oauth_base_url: Url,
    pub optout_store: ServiceEndpoint,
    pub secret_store: ServiceEndpoint,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_value = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = server_bind_address().map_err(ConfigError::BindAddress)?;

        Ok(Self {
            bind_addr,
            environment,
            webhook_secret: required_var("TWITCH_WEBHOOK_SECRET")?,
            twitch_client_id: required_var("TWITCH_CLIENT_ID")?,
            twitch_client_secret: required_var("TWITCH_CLIENT_SECRET")?,
            bot_user_id: required_var("TWITCH_BOT_USER_ID")?,
            credential_seed: CredentialSeed {
                access_token: required_var("TWITCH_USER_ACCESS_TOKEN")?,
                refresh_token: required_var("TWITCH_USER_REFRESH_TOKEN")?,
                expires_at: optional_timestamp("TWITCH_USER_EXPIRES_AT")?,
                obtained_at: optional_timestamp("TWITCH_USER_OBTAINED_AT")?,
            },
            helix_base_url: url_var("TWITCH_HELIX_URL", DEFAULT_HELIX_URL)?,
            oauth_base_url: url_var("TWITCH_OAUTH_URL", DEFAULT_OAUTH_URL)?,
            optout_store: ServiceEndpoint {
                base_url: required_url("OPTOUT_STORE_URL")?,
                token: required_var("OPTOUT_STORE_TOKEN")?,
            },
            secret_store: ServiceEndpoint {
                base_url: required_url("SECRET_STORE_URL")?,
                token: required_var("SECRET_STORE_TOKEN")?,
            },
        })
    }
}

fn required_var(name: &'static str) -> Result<String, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(name)),
    }
}

fn required_url(name: &'static str) -> Result<Url, ConfigError> {
    let raw = required_var(name)?;
    Url::parse(&raw).map_err(|err| ConfigError::InvalidUrl(name, err))
}

fn url_var(name: &'static str, default: &str) -> Result<Url, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    Url::parse(&raw).map_err(|err| ConfigError::InvalidUrl(name, err))
}

fn optional_timestamp(name: &'static str) -> Result<Option<DateTime<Utc>>, ConfigError> {
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|err| ConfigError::InvalidTimestamp(name, err)),
        _ => Ok(None),
    }
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    MissingVar(&'static str),
    InvalidUrl(&'static str, url::ParseError),
    InvalidTimestamp(&'static str, chrono::ParseError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::MissingVar(name) => write!(f, "{name} must be set and non-empty"),
            Self::InvalidUrl(name, err) => write!(f, "{name} is not a valid URL: {err}"),
            Self::InvalidTimestamp(name, err) => {
                write!(f, "{name} is not a valid RFC3339 timestamp: {err}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
