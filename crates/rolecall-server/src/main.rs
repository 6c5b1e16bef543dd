use tracing_subscriber::EnvFilter;

use rolecall_server::config::ServerConfig;
use rolecall_server::{build_app, spawn_idle_reaper};

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("ROLECALL_LOG_FORMAT").is_ok_and(|f| f == "json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = ServerConfig::load();
    config.validate();
    let addr = config.listen_addr.clone();

    let (app, state) = build_app(config);
    spawn_idle_reaper(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));
    tracing::info!("Rolecall server listening on {addr}");

    let shutdown = state.shutdown.clone();
    let countdown = std::sync::Arc::clone(&state.countdown);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested, closing streams");
            countdown.cancel_all();
            shutdown.cancel();
        })
        .await;

    if let Err(e) = result {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
