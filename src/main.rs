//! Pushline server binary.

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pushline::adapters::http::api_router;
use pushline::adapters::websocket::websocket_router;
use pushline::adapters::Adapter;
use pushline::config::{AppConfig, LogFormat};
use pushline::ports::ConnectionAdapter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_logging(&config);
    config.validate()?;

    let addr = config.server.socket_addr()?;
    let adapter = Adapter::init(&config).await.map_err(|e| {
        tracing::error!("Failed to initialize adapter: {}", e);
        e
    })?;

    let app = Router::new()
        .merge(websocket_router())
        .merge(api_router())
        .layer(TraceLayer::new_for_http())
        .with_state(adapter.clone());

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        driver = %adapter.driver(),
        environment = ?config.server.environment,
        "Pushline listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = adapter.disconnect().await {
        tracing::warn!("Adapter disconnect failed: {}", e);
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.server.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
