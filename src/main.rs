use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use slotkeeper::config::AppConfig;
use slotkeeper::db;
use slotkeeper::handlers;
use slotkeeper::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    if config.api_token.is_empty() {
        tracing::warn!("API_TOKEN is not set, authentication is disabled");
    }

    let conn = db::init_db(&config.database_url)
        .with_context(|| format!("opening database at {}", config.database_url))?;

    let state = Arc::new(AppState::new(config.clone(), conn));
    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
