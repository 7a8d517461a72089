//! steward-server: boot the execution core and serve the ingress API.

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use steward_server::logs::{LogBuffer, LogCaptureLayer};
use steward_server::{app, build_runtime, RuntimeConfig};

#[tokio::main]
async fn main() {
    let logs = Arc::new(LogBuffer::default());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(LogCaptureLayer::new(logs.clone()))
        .init();

    let config = RuntimeConfig::from_env();
    let port = config.port;

    let (state, background) = match build_runtime(config, logs).await {
        Ok(built) => built,
        Err(e) => {
            tracing::error!(error = %e, "boot failed");
            std::process::exit(1);
        }
    };
    let mut shutdown_rx = state.shutdown.subscribe();

    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, %addr, "could not bind ingress listener");
            std::process::exit(1);
        }
    };
    tracing::info!(%addr, "steward-server listening");

    let orchestrator = state.orchestrator.clone();
    let serve = axum::serve(listener, app(state)).with_graceful_shutdown(async move {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                tracing::info!("graceful shutdown requested");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt signal received");
            }
        }
    });

    if let Err(e) = serve.await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }

    orchestrator.shutdown();
    for handle in background {
        handle.abort();
    }
    tracing::info!("steward-server stopped");
}
