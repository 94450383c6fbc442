// handlers/health.rs - GET /health handler (public)

use axum::response::Json;
use serde_json::{json, Value};

pub async fn health_get() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
