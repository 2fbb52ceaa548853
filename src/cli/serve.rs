//! Serve command implementation

use crate::api::{create_router, AppState};
use crate::auth::PgKeyStore;
use crate::cli::ServeArgs;
use crate::config::GatewayConfig;
use crate::hub::Hub;
use crate::limiter::RedisRateLimiter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }

    cancel_token.cancel();
}

/// Main serve command handler
pub async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    crate::cli::init_tracing(args.log_level.as_deref())?;

    let mut config = GatewayConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }

    tracing::info!(port = config.port, "Starting Switchboard gateway");

    let keys = PgKeyStore::connect(&config.database_url).await?;
    keys.init_schema().await?;

    let limiter = RedisRateLimiter::connect(&config.redis_url).await?;

    let hub = Arc::new(Hub::new());
    let cancel_token = CancellationToken::new();
    let hub_handle = hub.start(cancel_token.clone());

    let state = Arc::new(AppState::new(
        Arc::clone(&hub),
        Arc::new(keys),
        Arc::new(limiter),
    ));
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(addr = %addr, "Gateway listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token.clone()))
        .await?;

    cancel_token.cancel();
    hub_handle.await?;

    tracing::info!("Gateway stopped");
    Ok(())
}
