//! Realtime session multiplexer.
//!
//! A [`RealtimeSession`] is a cheap handle onto a driver task that owns the one
//! physical connection, the subscription table and the reconnect loop. Handle
//! methods only enqueue commands, so every mutation of the subscription table
//! happens on the driver task.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use super::error::{HandlerError, RealtimeError};
use super::protocol::{ClientFrame, ControlFrame, HandshakeParams, ServerFrame};
use super::transport::{Connection, CredentialProvider, Transport};
use crate::config::RealtimeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Open,
    Reconnecting,
    /// Terminal
    Closed,
}

/// Receives inbound payloads for a channel.
///
/// Errors and panics are logged and do not stop delivery to the remaining
/// handlers of the same channel.
pub trait ChannelHandler: Send + Sync {
    fn handle(&self, channel: &str, payload: &Value) -> Result<(), HandlerError>;
}

/// Adapter letting plain closures act as handlers
pub struct FnHandler<F>(F);

impl<F> ChannelHandler for FnHandler<F>
where
    F: Fn(&str, &Value) -> Result<(), HandlerError> + Send + Sync,
{
    fn handle(&self, channel: &str, payload: &Value) -> Result<(), HandlerError> {
        (self.0)(channel, payload)
    }
}

type HandlerId = u64;
type ReadyTx = oneshot::Sender<Result<(), RealtimeError>>;

enum Command {
    Connect { ready: Option<ReadyTx> },
    Subscribe { channel: String, id: HandlerId, handler: Arc<dyn ChannelHandler> },
    Unsubscribe { channel: String, id: HandlerId },
    Close,
}

/// Handle onto a realtime session. Clones share the same connection.
///
/// The session lives until `close` is called or every handle and
/// [`Subscription`] has been dropped.
#[derive(Clone)]
pub struct RealtimeSession {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    next_handler_id: Arc<AtomicU64>,
}

impl RealtimeSession {
    /// Spawn the session driver on the current tokio runtime. Nothing is
    /// dialled until the first `subscribe`, `connect` or `open`.
    pub fn spawn(
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let driver = SessionDriver {
            config,
            transport,
            credentials,
            commands: command_rx,
            state: state_tx,
            subscriptions: SubscriptionTable::default(),
            waiters: Vec::new(),
        };
        tokio::spawn(driver.run());

        Self {
            commands: command_tx,
            state: state_rx,
            next_handler_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Start connecting without waiting for the result.
    pub fn connect(&self) {
        self.send(Command::Connect { ready: None });
    }

    /// Connect (if needed) and wait until the session is `Open`.
    ///
    /// Fails when the handshake is refused or times out, or when the session
    /// is closed while waiting. Transport failures are retried internally.
    pub async fn open(&self) -> Result<(), RealtimeError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        self.commands
            .send(Command::Connect { ready: Some(ready_tx) })
            .map_err(|_| RealtimeError::SessionClosed)?;
        ready_rx.await.unwrap_or(Err(RealtimeError::SessionClosed))
    }

    pub fn subscribe<H>(&self, channel: impl Into<String>, handler: H) -> Subscription
    where
        H: ChannelHandler + 'static,
    {
        self.subscribe_arc(channel, Arc::new(handler))
    }

    pub fn subscribe_fn<F>(&self, channel: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&str, &Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe(channel, FnHandler(handler))
    }

    pub fn subscribe_arc(&self, channel: impl Into<String>, handler: Arc<dyn ChannelHandler>) -> Subscription {
        let channel = channel.into();
        let id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Subscribe { channel: channel.clone(), id, handler });

        Subscription {
            channel,
            id,
            commands: self.commands.clone(),
        }
    }

    /// Close the session for good. Cancels any pending reconnect.
    pub fn close(&self) {
        self.send(Command::Close);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Realtime session already shut down; command dropped");
        }
    }
}

/// Capability to remove one registered handler
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    id: HandlerId,
    commands: mpsc::UnboundedSender<Command>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn unsubscribe(self) {
        let _ = self.commands.send(Command::Unsubscribe {
            channel: self.channel,
            id: self.id,
        });
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Connect { .. } => f.write_str("Connect"),
            Command::Subscribe { channel, id, .. } => write!(f, "Subscribe({channel}, {id})"),
            Command::Unsubscribe { channel, id } => write!(f, "Unsubscribe({channel}, {id})"),
            Command::Close => f.write_str("Close"),
        }
    }
}

/// Channel name to handlers in registration order
#[derive(Default)]
struct SubscriptionTable {
    channels: HashMap<String, Vec<(HandlerId, Arc<dyn ChannelHandler>)>>,
}

impl SubscriptionTable {
    /// Returns true when this is the channel's first handler.
    fn add(&mut self, channel: String, id: HandlerId, handler: Arc<dyn ChannelHandler>) -> bool {
        let handlers = self.channels.entry(channel).or_default();
        handlers.push((id, handler));
        handlers.len() == 1
    }

    /// Returns true when the channel lost its last handler and was dropped.
    fn remove(&mut self, channel: &str, id: HandlerId) -> bool {
        let Some(handlers) = self.channels.get_mut(channel) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        if handlers.len() == before || !handlers.is_empty() {
            return false;
        }
        self.channels.remove(channel);
        true
    }

    fn channels(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    fn dispatch(&self, channel: &str, payload: &Value) {
        let Some(handlers) = self.channels.get(channel) else {
            tracing::trace!("No handlers for channel '{}'; message discarded", channel);
            return;
        };

        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler.handle(channel, payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Handler {} on '{}' failed: {}", id, channel, e),
                Err(_) => tracing::error!("Handler {} on '{}' panicked", id, channel),
            }
        }
    }

    fn clear(&mut self) {
        self.channels.clear();
    }
}

enum Phase {
    Idle,
    Dial { attempt: Option<u32> },
    Backoff { attempt: u32 },
    Shutdown,
}

enum DialFailure {
    /// Credentials refused; wait for an explicit reconnect
    Rejected(RealtimeError),
    /// Worth retrying after backoff
    Transport(RealtimeError),
    Closed,
}

impl From<RealtimeError> for DialFailure {
    fn from(err: RealtimeError) -> Self {
        if err.is_retryable() {
            DialFailure::Transport(err)
        } else {
            DialFailure::Rejected(err)
        }
    }
}

fn handshake_timed_out() -> DialFailure {
    DialFailure::Rejected(RealtimeError::AuthHandshakeFailed("handshake timed out".to_string()))
}

enum PumpExit {
    Lost(RealtimeError),
    Rejected(RealtimeError),
    Closed,
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

struct SessionDriver {
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    subscriptions: SubscriptionTable,
    waiters: Vec<ReadyTx>,
}

impl SessionDriver {
    async fn run(mut self) {
        let mut phase = Phase::Idle;

        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Dial { attempt } => self.dial(attempt).await,
                Phase::Backoff { attempt } => self.backoff(attempt).await,
                Phase::Shutdown => break,
            };
        }

        self.set_state(ConnectionState::Closed);
        self.subscriptions.clear();
        self.resolve_waiters(Err(RealtimeError::SessionClosed));
        tracing::debug!("Realtime session closed");
    }

    async fn idle(&mut self) -> Phase {
        self.set_state(ConnectionState::Disconnected);

        loop {
            let command = self.commands.recv().await;
            let wants_connection = matches!(
                command,
                Some(Command::Connect { .. }) | Some(Command::Subscribe { .. })
            );
            if self.apply_offline(command) == Flow::Close {
                return Phase::Shutdown;
            }
            if wants_connection {
                return Phase::Dial { attempt: None };
            }
        }
    }

    async fn dial(&mut self, attempt: Option<u32>) -> Phase {
        if attempt.is_none() {
            self.set_state(ConnectionState::Connecting);
        }

        let conn = match self.establish().await {
            Ok(conn) => conn,
            Err(DialFailure::Rejected(err)) => {
                tracing::warn!("Realtime handshake rejected: {}", err);
                self.set_state(ConnectionState::Disconnected);
                self.resolve_waiters(Err(err));
                return Phase::Idle;
            }
            Err(DialFailure::Transport(err)) => {
                tracing::debug!("Realtime connect attempt failed: {}", err);
                return Phase::Backoff { attempt: attempt.map_or(0, |a| a.saturating_add(1)) };
            }
            Err(DialFailure::Closed) => return Phase::Shutdown,
        };

        self.set_state(ConnectionState::Open);
        self.resolve_waiters(Ok(()));
        tracing::info!("Realtime session open");

        match self.pump(conn).await {
            PumpExit::Closed => Phase::Shutdown,
            PumpExit::Rejected(err) => {
                tracing::warn!("Realtime session revoked by server: {}", err);
                self.set_state(ConnectionState::Disconnected);
                Phase::Idle
            }
            PumpExit::Lost(err) => {
                tracing::info!("Realtime transport lost, reconnecting: {}", err);
                Phase::Backoff { attempt: 0 }
            }
        }
    }

    async fn backoff(&mut self, attempt: u32) -> Phase {
        self.set_state(ConnectionState::Reconnecting);

        let delay = self.config.backoff_delay(attempt);
        tracing::debug!("Reconnect attempt {} in {:?}", attempt + 1, delay);
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Phase::Dial { attempt: Some(attempt) },
                command = self.commands.recv() => {
                    if self.apply_offline(command) == Flow::Close {
                        return Phase::Shutdown;
                    }
                }
            }
        }
    }

    /// Transport connect plus handshake acknowledgment, while still
    /// accepting commands. One deadline covers both steps: transports such
    /// as `WsTransport` authenticate inside `connect` itself.
    async fn establish(&mut self) -> Result<Box<dyn Connection>, DialFailure> {
        let transport = Arc::clone(&self.transport);
        let credentials = Arc::clone(&self.credentials);
        let namespace = self.config.channel_namespace.clone();

        // Handshake params are computed fresh for every attempt
        let connect = async move {
            let current = credentials.credentials().await?;
            let params = HandshakeParams {
                token: current.token,
                tenant: current.tenant,
                namespace,
            };
            transport.connect(&params).await
        };
        tokio::pin!(connect);
        let deadline = tokio::time::sleep(self.config.handshake_timeout());
        tokio::pin!(deadline);

        let mut conn = loop {
            tokio::select! {
                result = &mut connect => break result?,
                _ = &mut deadline => return Err(handshake_timed_out()),
                command = self.commands.recv() => {
                    if self.apply_offline(command) == Flow::Close {
                        return Err(DialFailure::Closed);
                    }
                }
            }
        };

        self.set_state(ConnectionState::Authenticating);

        loop {
            tokio::select! {
                _ = &mut deadline => {
                    conn.close().await;
                    return Err(handshake_timed_out());
                }
                frame = conn.recv() => match frame {
                    Some(Ok(ServerFrame::Control(ControlFrame::Ready))) => return Ok(conn),
                    Some(Ok(ServerFrame::Control(ControlFrame::Rejected { reason }))) => {
                        conn.close().await;
                        return Err(DialFailure::Rejected(RealtimeError::AuthHandshakeFailed(reason)));
                    }
                    Some(Ok(ServerFrame::Data(data))) => {
                        tracing::debug!("Dropping data for '{}' received before handshake ack", data.channel);
                    }
                    Some(Err(RealtimeError::Protocol(e))) => {
                        tracing::warn!("Ignoring malformed frame during handshake: {}", e);
                    }
                    Some(Err(e)) => return Err(DialFailure::Transport(e)),
                    None => {
                        return Err(DialFailure::Transport(RealtimeError::TransportDisconnected(
                            "closed during handshake".to_string(),
                        )));
                    }
                },
                command = self.commands.recv() => {
                    if self.apply_offline(command) == Flow::Close {
                        conn.close().await;
                        return Err(DialFailure::Closed);
                    }
                }
            }
        }
    }

    /// Serve an open connection until it is lost or the session closes.
    async fn pump(&mut self, mut conn: Box<dyn Connection>) -> PumpExit {
        // Replay every tracked channel; order across channels is not significant
        for channel in self.subscriptions.channels() {
            if let Err(e) = conn.send(&ClientFrame::Join { channel }).await {
                return PumpExit::Lost(e);
            }
        }

        loop {
            // Commands first, so subscriptions made before a message arrives see it
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    None | Some(Command::Close) => {
                        conn.close().await;
                        return PumpExit::Closed;
                    }
                    Some(Command::Connect { ready }) => {
                        if let Some(ready) = ready {
                            let _ = ready.send(Ok(()));
                        }
                    }
                    Some(Command::Subscribe { channel, id, handler }) => {
                        if self.subscriptions.add(channel.clone(), id, handler) {
                            if let Err(e) = conn.send(&ClientFrame::Join { channel }).await {
                                return PumpExit::Lost(e);
                            }
                        }
                    }
                    Some(Command::Unsubscribe { channel, id }) => {
                        if self.subscriptions.remove(&channel, id) {
                            if let Err(e) = conn.send(&ClientFrame::Leave { channel }).await {
                                return PumpExit::Lost(e);
                            }
                        }
                    }
                },
                frame = conn.recv() => match frame {
                    Some(Ok(ServerFrame::Data(data))) => {
                        self.subscriptions.dispatch(&data.channel, &data.payload);
                    }
                    Some(Ok(ServerFrame::Control(ControlFrame::Ready))) => {}
                    Some(Ok(ServerFrame::Control(ControlFrame::Rejected { reason }))) => {
                        conn.close().await;
                        return PumpExit::Rejected(RealtimeError::AuthHandshakeFailed(reason));
                    }
                    Some(Err(RealtimeError::Protocol(e))) => {
                        tracing::warn!("Ignoring malformed frame: {}", e);
                    }
                    Some(Err(e)) => return PumpExit::Lost(e),
                    None => {
                        return PumpExit::Lost(RealtimeError::TransportDisconnected(
                            "connection closed by peer".to_string(),
                        ));
                    }
                },
            }
        }
    }

    /// Apply a command while no connection is open. Joins are replayed from
    /// the table once the session opens.
    fn apply_offline(&mut self, command: Option<Command>) -> Flow {
        match command {
            None | Some(Command::Close) => return Flow::Close,
            Some(Command::Connect { ready }) => self.waiters.extend(ready),
            Some(Command::Subscribe { channel, id, handler }) => {
                self.subscriptions.add(channel, id, handler);
            }
            Some(Command::Unsubscribe { channel, id }) => {
                self.subscriptions.remove(&channel, id);
            }
        }
        Flow::Continue
    }

    fn resolve_waiters(&mut self, result: Result<(), RealtimeError>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(result.clone());
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            tracing::debug!("Realtime session {:?} -> {:?}", current, next);
            *current = next;
            true
        });
    }
}
