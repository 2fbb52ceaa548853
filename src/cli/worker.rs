//! Worker command implementation

use crate::cli::WorkerArgs;
use crate::config::WorkerConfig;
use crate::worker::Session;
use tokio_util::sync::CancellationToken;

/// Main worker command handler
pub async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    crate::cli::init_tracing(args.log_level.as_deref())?;

    let config = WorkerConfig::load(&args.config)?;
    tracing::info!(
        config = %args.config.display(),
        server_url = %config.server_url,
        max_parallel = config.max_parallel,
        "Starting Switchboard worker"
    );

    let session = Session::new(config);
    let cancel_token = CancellationToken::new();

    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received SIGINT, shutting down...");
            shutdown.cancel();
        }
    });

    session.run(cancel_token).await;

    tracing::info!("Worker stopped");
    Ok(())
}
