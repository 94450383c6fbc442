use carewatch_gateway::{config, server};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up JWT_SECRET, CAREWATCH_PORT, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::config();
    tracing::info!("Starting Carewatch gateway in {:?} mode", config.environment);

    let state = server::AppState::from_config(config)
        .map_err(|e| anyhow::anyhow!("cannot start without JWT_SECRET: {}", e))?;
    let app = server::app(state, config);

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", bind_addr, e))?;

    tracing::info!("Carewatch gateway listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
