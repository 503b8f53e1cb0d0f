use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatrelay::{
    api, auth,
    config::RelayConfig,
    hub::{ChatSink, Hub, SubscriberRegistry},
    simulation::SimulationProfile,
    upstream::{UpstreamClient, WebSocketConnector},
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatrelay=debug,tower_http=debug,axum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting chat relay...");

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let auth_config = Arc::new(auth::AuthConfig::from_env());

    let registry = Arc::new(SubscriberRegistry::new(config.subscriber_buffer));

    let upstream = config.upstream.clone().map(|upstream_config| {
        tracing::info!("Connecting to upstream chat at {}", upstream_config.url);
        let sink: Arc<dyn ChatSink> = registry.clone();
        UpstreamClient::spawn(upstream_config, Arc::new(WebSocketConnector), sink)
    });

    let hub = Arc::new(Hub::new(
        registry,
        upstream,
        config
            .simulation_enabled
            .then(SimulationProfile::hub_wide),
    ));
    hub.start(config.initial_channel.clone()).await;

    let app = api::router(hub.clone(), auth_config);

    let listener = match tokio::net::TcpListener::bind(config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.bind_addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on http://{}", config.bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    hub.shutdown().await;
    tracing::info!("Goodbye");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
