// Peer Session - One harness-to-node wire connection
// Principle: The engine task owns the socket; everyone else holds a handle

use super::engine::EngineCommand;
use super::protocol::{Hello, PeerFrame, ProtocolError};
use crate::error::{HarnessError, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Engine-local session identifier
pub type SessionId = u64;

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// TCP connect and Hello exchange in flight
    Handshaking,
    /// Frames flow both ways
    Established,
    /// Socket gone; queued inbound frames may still be drained
    Closed,
}

/// Engine-side session state
pub(crate) struct PeerSession {
    pub id: SessionId,
    pub node: usize,
    pub endpoint: SocketAddr,
    pub state: SessionState,
    pub remote: Option<Hello>,
    pub writer: Option<OwnedWriteHalf>,
    /// Per-session FIFO towards the handle
    pub inbound_tx: Option<mpsc::UnboundedSender<PeerFrame>>,
    pub reader: Option<JoinHandle<()>>,
    /// Caller of `connect`, answered once the handshake settles
    pub pending: Option<oneshot::Sender<Result<SessionHandle>>>,
}

impl PeerSession {
    pub fn handshaking(
        id: SessionId,
        node: usize,
        endpoint: SocketAddr,
        reply: oneshot::Sender<Result<SessionHandle>>,
    ) -> Self {
        Self {
            id,
            node,
            endpoint,
            state: SessionState::Handshaking,
            remote: None,
            writer: None,
            inbound_tx: None,
            reader: None,
            pending: Some(reply),
        }
    }

    /// Drop the socket and stop the reader; inbound queue is closed for the handle
    pub fn shut(&mut self) {
        self.state = SessionState::Closed;
        self.writer = None;
        self.inbound_tx = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id,
            node: self.node,
            endpoint: self.endpoint,
            state: self.state,
            remote_node_id: self.remote.as_ref().map(|h| h.node_id.clone()),
        }
    }
}

/// Snapshot of a session, for inspection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub node: usize,
    pub endpoint: SocketAddr,
    pub state: SessionState,
    pub remote_node_id: Option<String>,
}

/// Handle held by a TestNode for its harness peer session
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    node: usize,
    endpoint: SocketAddr,
    remote: Hello,
    commands: mpsc::UnboundedSender<EngineCommand>,
    inbound: mpsc::UnboundedReceiver<PeerFrame>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: SessionId,
        node: usize,
        endpoint: SocketAddr,
        remote: Hello,
        commands: mpsc::UnboundedSender<EngineCommand>,
        inbound: mpsc::UnboundedReceiver<PeerFrame>,
    ) -> Self {
        Self {
            id,
            node,
            endpoint,
            remote,
            commands,
            inbound,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Index of the node this session talks to
    pub fn node(&self) -> usize {
        self.node
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    /// Hello the node sent during the handshake
    pub fn remote(&self) -> &Hello {
        &self.remote
    }

    /// Queue a frame and wait until the engine has written it
    pub async fn send(&self, frame: PeerFrame) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Send {
                session: self.id,
                frame,
                reply,
            })
            .map_err(|_| self.engine_gone())?;
        rx.await.map_err(|_| self.engine_gone())?
    }

    /// Next inbound frame, `None` if nothing arrived within `timeout`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<PeerFrame>> {
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => Err(HarnessError::Protocol(ProtocolError::ConnectionClosed)),
            Err(_) => Ok(None),
        }
    }

    /// Next queued inbound frame without waiting
    pub fn try_recv(&mut self) -> Option<PeerFrame> {
        self.inbound.try_recv().ok()
    }

    /// Ask the engine to close this session; queued frames stay readable
    pub fn close(&self) {
        let _ = self.commands.send(EngineCommand::CloseSession { session: self.id });
    }

    fn engine_gone(&self) -> HarnessError {
        HarnessError::ConnectionFailed {
            endpoint: self.endpoint.to_string(),
            reason: "network engine stopped".to_string(),
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}
