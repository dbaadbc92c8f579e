//! Binary entrypoint for the graphmend HTTP server.
//!
//! Configuration is read by [`ServerConfig::from_env`]: an optional JSON
//! file named by `GRAPHMEND_CONFIG`, then `GRAPHMEND_*` overrides. Logging
//! follows `RUST_LOG` (default `info`).

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use graphmend_server::config::ServerConfig;
use graphmend_server::router::build_router;
use graphmend_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;
    let state = AppState::new(&config)?;

    let shutdown = CancellationToken::new();
    let decay = state.memory.clone().spawn_decay_schedule(
        Duration::from_secs(config.memory.decay_interval_secs),
        shutdown.clone(),
    );

    let service = state.service.clone();
    let app = build_router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("graphmend server starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => signal.cancel(),
                Err(err) => {
                    tracing::error!(error = %err, "cannot listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    service.shutdown();
    shutdown.cancel();
    decay.await?;
    tracing::info!("graphmend server stopped");
    Ok(())
}
