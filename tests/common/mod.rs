#![allow(dead_code)]

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use carewatch_gateway::auth::{generate_jwt, Claims};
use carewatch_gateway::config::AppConfig;
use carewatch_gateway::server::{self, AppState};
use reqwest::StatusCode;

pub const SECRET: &str = "integration-test-secret";
pub const ALLOWED_ORIGIN: &str = "http://localhost:5173";

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    pub ws_url: String,
}

impl TestServer {
    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }
}

/// Run the gateway in-process on a free port for the lifetime of the test runtime
pub async fn spawn_server() -> Result<TestServer> {
    let mut config = AppConfig::from_env();
    config.security.jwt_secret = SECRET.to_string();
    config.api.enable_request_logging = false;
    config.security.enable_cors = true;
    config.security.cors_origins = vec![ALLOWED_ORIGIN.to_string()];
    config.realtime.channel_namespace = None;

    let state = AppState::from_config(&config)?;
    let app = server::app(state, &config);

    let port = portpicker::pick_unused_port().context("failed to pick free port")?;
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .context("failed to bind test listener")?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let server = TestServer {
        port,
        base_url: format!("http://127.0.0.1:{}", port),
        ws_url: format!("ws://127.0.0.1:{}/realtime", port),
    };
    server.wait_ready(Duration::from_secs(5)).await?;
    Ok(server)
}

pub fn token(claims: &Claims) -> String {
    generate_jwt(claims, SECRET).expect("failed to sign test token")
}
