//! `inspect-watch` binary.
//!
//! Reads `ClientConfig` and `WatchOptions` from the environment (a
//! `.env` file is honoured) and watches the project until Ctrl-C.

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inspect_watch=debug,inspect_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (config, options) = inspect_watch::load_config().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        api_url = %config.api_url,
        project_id = %options.project_id,
        poll_interval_ms = config.poll_interval_ms,
        "Starting inspect-watch",
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
        }
        signal.cancel();
    });

    if let Err(e) = inspect_watch::run(&config, options, shutdown).await {
        tracing::error!(error = %e, "inspect-watch failed");
        std::process::exit(1);
    }
}
