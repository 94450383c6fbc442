// handlers/realtime.rs - GET /realtime (WebSocket) and POST /api/realtime/:channel
//
// The WebSocket endpoint authenticates during the HTTP upgrade: a refused
// handshake never reaches the socket stage, so clients see a plain 4xx.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        rejection::JsonRejection,
        Extension, Path, Query, State,
    },
    http::HeaderMap,
    response::{Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::auth::{extract_jwt_from_headers, tenant_hint_from_headers};
use crate::middleware::{ApiResponse, ApiResult};
use crate::realtime::{ChannelKey, ClientFrame, ControlFrame, RealtimeHub, ServerFrame};
use crate::server::{AppState, REALTIME_CONNECT};
use crate::tenant::ScopedExecutionContext;

#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    pub token: Option<String>,
    pub tenant: Option<String>,
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PublishQuery {
    pub namespace: Option<String>,
}

pub async fn realtime_ws(
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = match query.token.as_deref() {
        Some(token) => token,
        None => extract_jwt_from_headers(&headers)?,
    };
    let hint = query.tenant.as_deref().or_else(|| tenant_hint_from_headers(&headers));

    let context = state
        .pipeline
        .authorize_token(token, hint, &REALTIME_CONNECT)
        .map_err(|e| {
            tracing::info!("Realtime handshake refused: {}", e);
            ApiError::from(e)
        })?;

    let namespace = state.namespace_or_default(query.namespace);
    let hub = state.hub.clone();
    let capacity = state.channel_capacity;

    Ok(ws.on_upgrade(move |socket| serve_socket(socket, context, namespace, hub, capacity)))
}

pub async fn publish_post(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Query(query): Query<PublishQuery>,
    Extension(context): Extension<ScopedExecutionContext>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Value> {
    let Json(payload) = payload?;
    let tenant = context
        .tenant_id()
        .ok_or_else(|| ApiError::internal_server_error("Tenant context missing for publish"))?;

    let key = ChannelKey::new(tenant, state.namespace_or_default(query.namespace), channel);
    let delivered = state.hub.publish(&key, payload).await;
    tracing::debug!("Published to {:?}: {} listener(s)", key, delivered);

    Ok(ApiResponse::accepted(json!({
        "channel": key.channel,
        "delivered": delivered,
    })))
}

async fn serve_socket(
    mut socket: WebSocket,
    context: ScopedExecutionContext,
    namespace: Option<String>,
    hub: RealtimeHub,
    capacity: usize,
) {
    let connection_id = Uuid::new_v4();
    let Some(tenant) = context.tenant_id().map(str::to_string) else {
        tracing::error!("Realtime connection {} has no tenant", connection_id);
        return;
    };
    tracing::info!(
        "Realtime connection {} open for '{}' in tenant '{}'",
        connection_id,
        context.identity().subject_id(),
        tenant
    );

    if !send_frame(&mut socket, &ServerFrame::Control(ControlFrame::Ready)).await {
        return;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Arc<ServerFrame>>(capacity.max(1));
    // Dropping a stop sender ends its forwarder
    let mut joined: HashMap<String, oneshot::Sender<()>> = HashMap::new();

    loop {
        tokio::select! {
            Some(frame) = outbound_rx.recv() => {
                if !send_frame(&mut socket, &frame).await {
                    break;
                }
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(ClientFrame::Join { channel }) => {
                        if joined.contains_key(&channel) {
                            continue;
                        }
                        let key = ChannelKey::new(tenant.clone(), namespace.clone(), channel.clone());
                        let rx = hub.subscribe(key.clone()).await;
                        let (stop_tx, stop_rx) = oneshot::channel();
                        spawn_forwarder(hub.clone(), key, rx, outbound_tx.clone(), stop_rx);
                        joined.insert(channel, stop_tx);
                    }
                    Ok(ClientFrame::Leave { channel }) => {
                        joined.remove(&channel);
                    }
                    Err(e) => {
                        tracing::debug!("Ignoring malformed frame on {}: {}", connection_id, e);
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!("Realtime connection {} errored: {}", connection_id, e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::info!("Realtime connection {} closed ({} channel(s))", connection_id, joined.len());
}

fn spawn_forwarder(
    hub: RealtimeHub,
    key: ChannelKey,
    mut rx: broadcast::Receiver<Arc<ServerFrame>>,
    outbound: mpsc::Sender<Arc<ServerFrame>>,
    mut stop: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop => break,
                received = rx.recv() => match received {
                    Ok(frame) => {
                        if outbound.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Subscriber on {:?} lagged; {} message(s) skipped", key, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        drop(rx);
        hub.release(&key).await;
    });
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> bool {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode realtime frame: {}", e);
            return true;
        }
    };
    socket.send(Message::Text(text)).await.is_ok()
}
