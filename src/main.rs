//! Iris Serving Engine - Main Entry Point

use iris_serve::{api, load_engine, ServeConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Iris serving engine v{}", env!("CARGO_PKG_VERSION"));

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/serve.json".into());

    let config = ServeConfig::load_or_default(&config_path)
        .map_err(|e| format!("{config_path}: {e}"))?
        .with_env_overrides()?;

    let engine = Arc::new(load_engine(&config)?);
    let app = api::build_router(engine);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
