use std::sync::Arc;

use anyhow::{Context, Error};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use lm_serve::api::server::create_router;
use lm_serve::config::{MODEL_ID, ServerArgs};
use lm_serve::provider;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = ServerArgs::parse();

    // Downloading and mapping the weights blocks for minutes on a cold cache.
    let state = tokio::task::spawn_blocking(|| provider::load_state(MODEL_ID))
        .await
        .context("model loader panicked")??;
    let state = Arc::new(state);
    tracing::info!(
        model = %state.model_id,
        device = state.device_kind().as_str(),
        "model loaded"
    );

    let app = create_router(state);

    let addr = args.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
