use thiserror::Error;

/// Realtime layer errors.
///
/// Transport failures are absorbed by the reconnect loop and never reach
/// channel handlers; they only surface through connection state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    #[error("Realtime handshake failed: {0}")]
    AuthHandshakeFailed(String),

    #[error("Transport disconnected: {0}")]
    TransportDisconnected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Credentials unavailable: {0}")]
    Credentials(String),

    #[error("Realtime session is closed")]
    SessionClosed,
}

impl RealtimeError {
    /// Whether the reconnect loop may retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, RealtimeError::TransportDisconnected(_) | RealtimeError::Protocol(_))
    }
}

/// Error returned by a channel handler; logged and otherwise ignored.
pub type HandlerError = anyhow::Error;
