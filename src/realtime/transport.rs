use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::error::RealtimeError;
use super::protocol::{ClientFrame, HandshakeParams, ServerFrame};
use crate::tenant::ScopedExecutionContext;

/// Opens physical connections. Implementations must be cheap to call
/// repeatedly; the session calls `connect` on every (re)connect attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection carrying `params` in its handshake.
    ///
    /// Return `AuthHandshakeFailed` when the peer refuses the credentials and
    /// `TransportDisconnected` for anything worth retrying.
    async fn connect(&self, params: &HandshakeParams) -> Result<Box<dyn Connection>, RealtimeError>;
}

#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: &ClientFrame) -> Result<(), RealtimeError>;

    /// Next inbound frame; `None` once the peer has gone away.
    /// Must be cancel-safe, the session polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<ServerFrame, RealtimeError>>;

    async fn close(&mut self);
}

/// Token and tenant used for a handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub tenant: Option<String>,
}

/// Supplies current credentials; invoked lazily on every (re)connect so a
/// refreshed token is always picked up.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credentials(&self) -> Result<Credentials, RealtimeError>;
}

/// Updatable in-memory credentials, e.g. fed by a token refresh loop.
#[derive(Debug, Default)]
pub struct CredentialStore {
    current: RwLock<Option<Credentials>>,
}

impl CredentialStore {
    pub fn new(token: impl Into<String>, tenant: Option<String>) -> Arc<Self> {
        let store = Self::default();
        store.update(token, tenant);
        Arc::new(store)
    }

    pub fn update(&self, token: impl Into<String>, tenant: Option<String>) {
        let credentials = Credentials { token: token.into(), tenant };
        match self.current.write() {
            Ok(mut guard) => *guard = Some(credentials),
            Err(poisoned) => *poisoned.into_inner() = Some(credentials),
        }
    }

    /// Drop credentials, e.g. on logout; the next handshake fails.
    pub fn clear(&self) {
        match self.current.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

#[async_trait]
impl CredentialProvider for CredentialStore {
    async fn credentials(&self) -> Result<Credentials, RealtimeError> {
        let guard = match self.current.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .clone()
            .ok_or_else(|| RealtimeError::Credentials("no token available".to_string()))
    }
}

/// Credentials derived from an already-enforced request context, for
/// server-side sessions opened on behalf of a verified caller.
#[derive(Debug, Clone)]
pub struct ScopedCredentials {
    token: String,
    context: ScopedExecutionContext,
}

impl ScopedCredentials {
    pub fn new(token: impl Into<String>, context: ScopedExecutionContext) -> Self {
        Self { token: token.into(), context }
    }
}

#[async_trait]
impl CredentialProvider for ScopedCredentials {
    async fn credentials(&self) -> Result<Credentials, RealtimeError> {
        Ok(Credentials {
            token: self.token.clone(),
            tenant: self.context.tenant_id().map(str::to_string),
        })
    }
}
