mod command;
mod credentials;
mod notify;
mod problem;
mod router;
mod signature;
mod telemetry;
mod webhook;

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use optout_store::{OptOutStore, SecretStore};
use optout_twitch::{HelixClient, TwitchOAuthClient};
use optout_util::{load_env_file, AppConfig};

use credentials::{CredentialState, TokenManager};
use notify::Notifier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let http = reqwest::Client::builder().build()?;
    let oauth = TwitchOAuthClient::new(
        config.twitch_client_id.clone(),
        config.twitch_client_secret.clone(),
        config.oauth_base_url.clone(),
        http.clone(),
    );
    let helix = HelixClient::new(
        config.twitch_client_id.clone(),
        config.helix_base_url.clone(),
        http.clone(),
    );
    let secrets = SecretStore::new(
        config.secret_store.base_url.clone(),
        config.secret_store.token.clone(),
        http.clone(),
    );
    let store = OptOutStore::new(
        config.optout_store.base_url.clone(),
        config.optout_store.token.clone(),
        http,
    );

    let initial = CredentialState::from_seed(config.credential_seed.clone(), Utc::now());
    let tokens = TokenManager::new(oauth, secrets, initial);
    let notifier = Notifier::new(helix, tokens, config.bot_user_id.clone());

    let webhook_secret: Arc<[u8]> =
        Arc::from(config.webhook_secret.clone().into_bytes().into_boxed_slice());
    let state = router::AppState::new(metrics, webhook_secret, store, notifier);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
