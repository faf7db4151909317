use anyhow::{Context, Result};
use std::sync::Arc;
use tokenwarden::api::{create_router, AppState};
use tokenwarden::config::load_config_with_env;
use tokenwarden::credentials::SqliteTokenStore;
use tokenwarden::oauth::OAuthExchangeClient;
use tokenwarden::scheduler::RefreshScheduler;
use tokenwarden::token::{LifecyclePolicy, TokenLifecycleManager};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokenwarden=info".into()),
        )
        .init();

    info!("Token warden starting...");

    let config_path =
        std::env::var("TOKENWARDEN_CONFIG").unwrap_or_else(|_| "tokenwarden.toml".to_string());
    let config = load_config_with_env(&config_path)?;

    let encryption_key = std::env::var("TOKENWARDEN_ENCRYPTION_KEY")
        .context("TOKENWARDEN_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;

    if config.oauth.client_id.is_empty() || config.oauth.client_secret.is_empty() {
        warn!("OAuth client credentials are not configured; token exchanges will be rejected");
    }

    info!(
        config_path = %config_path,
        database_path = %config.store.database_path.display(),
        token_url = %config.oauth.token_url,
        bind_address = %config.server.bind_address,
        "Configuration loaded"
    );

    let store = Arc::new(
        SqliteTokenStore::new(&config.store.database_path, &encryption_key)
            .context("Failed to initialize token store")?,
    );
    info!("Token store initialized");

    let exchange = Arc::new(
        OAuthExchangeClient::new(&config.oauth).context("Failed to initialize OAuth client")?,
    );

    let manager = Arc::new(TokenLifecycleManager::new(
        store,
        exchange,
        LifecyclePolicy::from(&config.provider),
    ));

    let shutdown = CancellationToken::new();
    let scheduler_handle =
        RefreshScheduler::new(Arc::clone(&manager), config.refresh.clone()).spawn(shutdown.clone());

    let bind_address = config.server.bind_address.clone();
    let router = create_router(AppState::new(Arc::clone(&manager), config)?);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!(address = %bind_address, "Token API listening");

    let server_shutdown = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        let serve = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await });
        if let Err(e) = serve.await {
            error!(error = %e, "Token API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    shutdown.cancel();
    if let Err(e) = scheduler_handle.await {
        error!(error = %e, "Refresh scheduler task failed");
    }
    if let Err(e) = server_handle.await {
        error!(error = %e, "Token API server task failed");
    }
    info!("Token warden stopped");

    Ok(())
}
