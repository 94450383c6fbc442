//! WebSocket transport over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::error::RealtimeError;
use super::protocol::{ClientFrame, HandshakeParams, ServerFrame};
use super::transport::{Connection, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsTransport {
    endpoint: Url,
}

impl WsTransport {
    pub fn new(endpoint: &str) -> Result<Self, RealtimeError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| RealtimeError::Protocol(format!("invalid realtime endpoint '{}': {}", endpoint, e)))?;

        match endpoint.scheme() {
            "ws" | "wss" => Ok(Self { endpoint }),
            other => Err(RealtimeError::Protocol(format!("unsupported realtime scheme '{}'", other))),
        }
    }

    /// Endpoint with handshake params appended as query parameters
    pub fn handshake_url(&self, params: &HandshakeParams) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("token", &params.token);
            if let Some(tenant) = &params.tenant {
                query.append_pair("tenant", tenant);
            }
            if let Some(namespace) = &params.namespace {
                query.append_pair("namespace", namespace);
            }
        }
        url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, params: &HandshakeParams) -> Result<Box<dyn Connection>, RealtimeError> {
        let url = self.handshake_url(params);
        tracing::debug!("Connecting to realtime endpoint {}", self.endpoint);

        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => Ok(Box::new(WsConnection { stream })),
            // The gateway answers the upgrade with 4xx when it refuses credentials
            Err(tungstenite::Error::Http(response)) if response.status().is_client_error() => {
                Err(RealtimeError::AuthHandshakeFailed(format!(
                    "gateway refused handshake with status {}",
                    response.status()
                )))
            }
            Err(e) => Err(RealtimeError::TransportDisconnected(e.to_string())),
        }
    }
}

struct WsConnection {
    stream: WsStream,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: &ClientFrame) -> Result<(), RealtimeError> {
        let text = serde_json::to_string(frame).map_err(|e| RealtimeError::Protocol(e.to_string()))?;
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| RealtimeError::TransportDisconnected(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<ServerFrame, RealtimeError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(
                        serde_json::from_str(&text).map_err(|e| RealtimeError::Protocol(e.to_string())),
                    );
                }
                Ok(Message::Close(_)) => return None,
                // Ping/pong are answered by tungstenite itself
                Ok(_) => continue,
                Err(e) => return Some(Err(RealtimeError::TransportDisconnected(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("Error closing realtime socket: {}", e);
        }
    }
}
