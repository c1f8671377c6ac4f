//! BreakupBot HTTP server entry point
//!
//! Configuration comes from `CONFIG_FILE`, `config.yaml` or environment
//! variables, in that order.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use breakupbot::config::Config;
use breakupbot::generation::{OpenAiGateway, TextGenerator};
use breakupbot::{api, store};

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown..."),
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::auto_load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.log_level),
    )
    .init();

    info!("Starting BreakupBot v{}", env!("CARGO_PKG_VERSION"));

    if config.openai.api_key.is_empty() {
        warn!("OPENAI_API_KEY is not set, generation requests will fail");
    }
    if config.throttle.enabled {
        info!(
            "Tries throttle enabled: {} tries, {} minute cooldown",
            config.throttle.max_tries, config.throttle.cooldown_minutes
        );
    }

    let kv = store::connect(&config.store).await?;
    let generator: Arc<dyn TextGenerator> = Arc::new(OpenAiGateway::new(config.openai.clone()));

    let bind_addr = config.bind_addr.clone();
    let state = api::AppState::new(config, kv, generator);
    let app = api::router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {bind_addr}"))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
