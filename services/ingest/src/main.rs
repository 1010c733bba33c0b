// ingest: dials vendor media servers for live meetings and feeds the
// transcript/enrichment pipeline.

use ingest::config;
use ingest::http;
use ingest::router::EventRouter;
use ingest::state::AppState;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() {
    // First CLI arg overrides the default config path.
    let config = match std::env::args().nth(1) {
        Some(path) => config::load_config_from_path(std::path::Path::new(&path)),
        None => config::load_config(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level when set.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(config.log_level.as_filter_directive())
            }),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.http.bind,
        subscribe_mask = config.media.subscribe,
        fillers = config.media.fillers,
        "ingest starting"
    );

    let state = AppState::build(config);
    let router = Arc::new(EventRouter::new(state.clone()));
    let app = http::build_router(state.clone(), router);

    let listener = match tokio::net::TcpListener::bind(&state.config.http.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("FATAL: cannot bind {}: {e}", state.config.http.bind);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        eprintln!("FATAL: server error: {e}");
        std::process::exit(1);
    }

    // Archive whatever is still live so late metadata queries keep working
    // while the process drains.
    state.registry.clear().await;
    info!("ingest stopped");
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
