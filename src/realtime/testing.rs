//! In-memory transport for session tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::error::RealtimeError;
use super::protocol::{ClientFrame, ControlFrame, HandshakeParams, ServerFrame};
use super::session::{ConnectionState, RealtimeSession};
use super::transport::{Connection, Transport};

const WAIT: Duration = Duration::from_secs(2);

/// Transport whose connections are driven from the test via [`MockPeer`]
pub struct MockTransport {
    peers: mpsc::UnboundedSender<MockPeer>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
}

/// Server side of one mock connection
pub struct MockPeer {
    pub params: HandshakeParams,
    outbound: mpsc::UnboundedReceiver<ClientFrame>,
    inbound: mpsc::UnboundedSender<Result<ServerFrame, RealtimeError>>,
}

pub struct PeerQueue(mpsc::UnboundedReceiver<MockPeer>);

impl MockTransport {
    pub fn new() -> (Arc<Self>, PeerQueue) {
        let (peers, queue) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            peers,
            attempts: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
        });
        (transport, PeerQueue(queue))
    }

    /// Refuse the next `count` connects at the transport level.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, params: &HandshakeParams) -> Result<Box<dyn Connection>, RealtimeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if refused {
            return Err(RealtimeError::TransportDisconnected("connection refused".to_string()));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let peer = MockPeer {
            params: params.clone(),
            outbound: outbound_rx,
            inbound: inbound_tx,
        };
        self.peers
            .send(peer)
            .map_err(|_| RealtimeError::TransportDisconnected("test ended".to_string()))?;

        Ok(Box::new(MockConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        }))
    }
}

/// Transport whose `connect` never completes, like a server that accepts
/// TCP and then stalls the upgrade.
#[derive(Default)]
pub struct StalledTransport {
    attempts: AtomicUsize,
}

impl StalledTransport {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for StalledTransport {
    async fn connect(&self, _params: &HandshakeParams) -> Result<Box<dyn Connection>, RealtimeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

impl PeerQueue {
    pub async fn next(&mut self) -> MockPeer {
        tokio::time::timeout(WAIT, self.0.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("transport dropped")
    }
}

impl MockPeer {
    pub fn ready(&self) {
        let _ = self.inbound.send(Ok(ServerFrame::Control(ControlFrame::Ready)));
    }

    pub fn reject(&self, reason: &str) {
        let _ = self.inbound.send(Ok(ServerFrame::Control(ControlFrame::Rejected {
            reason: reason.to_string(),
        })));
    }

    pub fn push(&self, channel: &str, payload: Value) {
        let _ = self.inbound.send(Ok(ServerFrame::data(channel, payload)));
    }

    pub async fn next_frame(&mut self) -> Option<ClientFrame> {
        tokio::time::timeout(WAIT, self.outbound.recv()).await.ok().flatten()
    }

    pub async fn frames(&mut self, count: usize) -> Vec<ClientFrame> {
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            match self.next_frame().await {
                Some(frame) => frames.push(frame),
                None => break,
            }
        }
        frames
    }

    /// True when nothing is sent within `window`.
    pub async fn is_quiet(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.outbound.recv()).await.is_err()
    }

    /// True once the client side has dropped the connection.
    pub async fn is_closed(&mut self) -> bool {
        loop {
            match tokio::time::timeout(WAIT, self.outbound.recv()).await {
                Ok(None) => return true,
                Ok(Some(_)) => continue,
                Err(_) => return false,
            }
        }
    }
}

struct MockConnection {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    inbound: mpsc::UnboundedReceiver<Result<ServerFrame, RealtimeError>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, frame: &ClientFrame) -> Result<(), RealtimeError> {
        self.outbound
            .send(frame.clone())
            .map_err(|_| RealtimeError::TransportDisconnected("peer gone".to_string()))
    }

    async fn recv(&mut self) -> Option<Result<ServerFrame, RealtimeError>> {
        self.inbound.recv().await
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

pub async fn wait_for_state(session: &RealtimeSession, target: ConnectionState) {
    let mut changes = session.state_changes();
    tokio::time::timeout(WAIT, async {
        while *changes.borrow_and_update() != target {
            if changes.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {target:?}"));
    assert_eq!(session.state(), target);
}
