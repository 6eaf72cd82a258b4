//! Main entry point for the image generation server

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zimage_server::{api, config::Settings, engine::SyntheticEngine, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let registry = tracing_subscriber::registry().with(filter);
    if settings.logging.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("Starting image generation server");
    info!(
        "Loaded configuration: server={}:{}",
        settings.server.host, settings.server.port
    );

    let engine = Arc::new(SyntheticEngine::from_config(&settings.engine));
    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    let app_state = Arc::new(AppState::new(settings, engine));
    let model = app_state.config_store.snapshot();
    info!(
        model_id = %model.model_id,
        config_file = ?app_state.config_store.path(),
        "Model will load on first generation"
    );

    // Build the router
    let app = api::create_router(app_state);

    info!("Server listening on {}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}
