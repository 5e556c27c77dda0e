// Network Engine - Single task multiplexing every harness peer session
// Principle: One owner for all sockets; handshakes run beside the loop, never inside it

use super::protocol::{read_frame, write_frame, Hello, PeerFrame, ProtocolError};
use super::session::{PeerSession, SessionHandle, SessionId, SessionState, SessionSummary};
use crate::error::{HarnessError, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Commands accepted by the engine task
pub enum EngineCommand {
    Connect {
        node: usize,
        addr: SocketAddr,
        reply: oneshot::Sender<Result<SessionHandle>>,
    },
    Send {
        session: SessionId,
        frame: PeerFrame,
        reply: oneshot::Sender<Result<()>>,
    },
    CloseSession {
        session: SessionId,
    },
    Sessions {
        reply: oneshot::Sender<Vec<SessionSummary>>,
    },
    Shutdown,
}

/// Events produced by handshake and reader tasks
enum EngineEvent {
    HandshakeDone {
        session: SessionId,
        result: std::result::Result<(Hello, TcpStream), ProtocolError>,
    },
    Inbound {
        session: SessionId,
        frame: PeerFrame,
    },
    ReaderClosed {
        session: SessionId,
        reason: ProtocolError,
    },
}

/// Network engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bound on TCP connect plus the Hello exchange
    pub handshake_timeout: Duration,
    /// Bound on a single outbound frame write
    pub write_timeout: Duration,
    /// Hello the harness announces
    pub local: Hello,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            local: Hello::harness("kratos"),
        }
    }
}

// =============================================================================
// ENGINE HANDLE
// =============================================================================

/// Owner of the engine task
pub struct NetworkEngine {
    config: EngineConfig,
    commands: Option<mpsc::UnboundedSender<EngineCommand>>,
    task: Option<JoinHandle<()>>,
}

impl NetworkEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            commands: None,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Spawn the engine task; a no-op when it is already running
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let engine_loop = EngineLoop::new(self.config.clone(), cmd_tx.clone());
        self.task = Some(tokio::spawn(engine_loop.run(cmd_rx)));
        self.commands = Some(cmd_tx);
        info!("🚀 Network engine started");
    }

    fn sender(&self) -> Result<&mpsc::UnboundedSender<EngineCommand>> {
        match self.commands {
            Some(ref tx) if self.is_running() => Ok(tx),
            _ => Err(HarnessError::ConnectionFailed {
                endpoint: "network engine".to_string(),
                reason: "engine not running".to_string(),
            }),
        }
    }

    /// Open a session to `addr` on behalf of node `node`
    pub async fn connect(&self, node: usize, addr: SocketAddr) -> Result<SessionHandle> {
        let (reply, rx) = oneshot::channel();
        self.sender()?
            .send(EngineCommand::Connect { node, addr, reply })
            .map_err(|_| engine_stopped(addr))?;
        rx.await.map_err(|_| engine_stopped(addr))?
    }

    /// Snapshot of every session the engine knows about
    pub async fn sessions(&self) -> Result<Vec<SessionSummary>> {
        let (reply, rx) = oneshot::channel();
        self.sender()?
            .send(EngineCommand::Sessions { reply })
            .map_err(|_| HarnessError::Assertion("network engine stopped".to_string()))?;
        rx.await
            .map_err(|_| HarnessError::Assertion("network engine stopped".to_string()))
    }

    /// Stop the engine and close every session; idempotent
    pub async fn close(&mut self) {
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(EngineCommand::Shutdown);
        }
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(self.config.write_timeout, task).await.is_err() {
                warn!("⚠️ Network engine did not stop in time");
            } else {
                info!("🛑 Network engine stopped");
            }
        }
    }
}

impl Drop for NetworkEngine {
    fn drop(&mut self) {
        if let Some(tx) = self.commands.take() {
            let _ = tx.send(EngineCommand::Shutdown);
        }
    }
}

fn engine_stopped(addr: SocketAddr) -> HarnessError {
    HarnessError::ConnectionFailed {
        endpoint: addr.to_string(),
        reason: "network engine stopped".to_string(),
    }
}

// =============================================================================
// ENGINE TASK
// =============================================================================

struct EngineLoop {
    config: EngineConfig,
    /// Cloned into every SessionHandle
    commands: mpsc::UnboundedSender<EngineCommand>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    sessions: HashMap<SessionId, PeerSession>,
    next_id: SessionId,
}

impl EngineLoop {
    fn new(config: EngineConfig, commands: mpsc::UnboundedSender<EngineCommand>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            commands,
            events_tx,
            events_rx,
            sessions: HashMap::new(),
            next_id: 1,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<EngineCommand>) {
        loop {
            tokio::select! {
                command = cmd_rx.recv() => {
                    match command {
                        Some(EngineCommand::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }
                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                }
            }
        }

        self.shutdown().await;
    }

    async fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Connect { node, addr, reply } => {
                let id = self.next_id;
                self.next_id += 1;
                debug!("Session {}: connecting to node {} at {}", id, node, addr);

                self.sessions
                    .insert(id, PeerSession::handshaking(id, node, addr, reply));
                tokio::spawn(handshake(
                    id,
                    addr,
                    self.config.local.clone(),
                    self.config.handshake_timeout,
                    self.events_tx.clone(),
                ));
            }
            EngineCommand::Send {
                session,
                frame,
                reply,
            } => {
                let result = self.write(session, &frame).await;
                let _ = reply.send(result);
            }
            EngineCommand::CloseSession { session } => {
                if let Some(mut s) = self.sessions.remove(&session) {
                    if let Some(ref mut writer) = s.writer {
                        let bye = PeerFrame::Disconnect("closed by harness".to_string());
                        let _ = tokio::time::timeout(self.config.write_timeout, write_frame(writer, &bye)).await;
                    }
                    s.shut();
                    debug!("Session {} closed", session);
                }
            }
            EngineCommand::Sessions { reply } => {
                let mut summaries: Vec<SessionSummary> =
                    self.sessions.values().map(|s| s.summary()).collect();
                summaries.sort_by_key(|s| s.id);
                let _ = reply.send(summaries);
            }
            EngineCommand::Shutdown => {}
        }
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::HandshakeDone { session, result } => self.finish_handshake(session, result),
            EngineEvent::Inbound { session, frame } => {
                if let PeerFrame::Ping(nonce) = frame {
                    if let Err(e) = self.write(session, &PeerFrame::Pong(nonce)).await {
                        warn!("Session {}: failed to answer ping: {}", session, e);
                    }
                    return;
                }
                if let Some(s) = self.sessions.get(&session) {
                    debug!("Session {}: inbound {}", session, frame.kind());
                    if let Some(ref tx) = s.inbound_tx {
                        let _ = tx.send(frame);
                    }
                }
            }
            EngineEvent::ReaderClosed { session, reason } => {
                if let Some(s) = self.sessions.get_mut(&session) {
                    debug!("Session {} closed by remote: {}", session, reason);
                    s.reader = None;
                    s.shut();
                }
            }
        }
    }

    fn finish_handshake(
        &mut self,
        id: SessionId,
        result: std::result::Result<(Hello, TcpStream), ProtocolError>,
    ) {
        let Some(session) = self.sessions.get_mut(&id) else {
            return;
        };
        let Some(reply) = session.pending.take() else {
            return;
        };

        match result {
            Ok((remote, stream)) => {
                let (read_half, write_half) = stream.into_split();
                let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

                session.state = SessionState::Established;
                session.remote = Some(remote.clone());
                session.writer = Some(write_half);
                session.inbound_tx = Some(inbound_tx);
                session.reader = Some(tokio::spawn(read_loop(id, read_half, self.events_tx.clone())));

                info!(
                    "✅ Peer session {} established with node {} ({})",
                    id, session.node, remote.node_id
                );
                let handle = SessionHandle::new(
                    id,
                    session.node,
                    session.endpoint,
                    remote,
                    self.commands.clone(),
                    inbound_rx,
                );
                if reply.send(Ok(handle)).is_err() {
                    // Caller gave up waiting; the dropped handle closes the session
                    debug!("Session {}: connect caller went away", id);
                }
            }
            Err(e) => {
                let endpoint = session.endpoint;
                warn!("⚠️ Handshake with {} failed: {}", endpoint, e);
                self.sessions.remove(&id);
                let _ = reply.send(Err(HarnessError::ConnectionFailed {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                }));
            }
        }
    }

    async fn write(&mut self, id: SessionId, frame: &PeerFrame) -> Result<()> {
        let timeout = self.config.write_timeout;
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(HarnessError::Protocol(ProtocolError::ConnectionClosed))?;
        let writer = session
            .writer
            .as_mut()
            .ok_or(HarnessError::Protocol(ProtocolError::ConnectionClosed))?;

        match tokio::time::timeout(timeout, write_frame(writer, frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                session.shut();
                Err(HarnessError::Protocol(e))
            }
            Err(_) => Err(HarnessError::TransportRetryable(format!(
                "write to {} timed out after {:?}",
                session.endpoint, timeout
            ))),
        }
    }

    async fn shutdown(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            if let Some(ref mut writer) = session.writer {
                let bye = PeerFrame::Disconnect("harness shutdown".to_string());
                let _ = tokio::time::timeout(self.config.write_timeout, write_frame(writer, &bye)).await;
            }
            if let Some(reply) = session.pending.take() {
                let _ = reply.send(Err(engine_stopped(session.endpoint)));
            }
            session.shut();
        }
    }
}

/// Connect and exchange Hello frames, bounded by `timeout`
async fn handshake(
    id: SessionId,
    addr: SocketAddr,
    local: Hello,
    timeout: Duration,
    events: mpsc::UnboundedSender<EngineEvent>,
) {
    let result = match tokio::time::timeout(timeout, exchange_hello(addr, &local)).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Handshake(format!("timed out after {:?}", timeout))),
    };
    let _ = events.send(EngineEvent::HandshakeDone { session: id, result });
}

async fn exchange_hello(addr: SocketAddr, local: &Hello) -> std::result::Result<(Hello, TcpStream), ProtocolError> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    write_frame(&mut stream, &PeerFrame::Hello(local.clone())).await?;

    match read_frame(&mut stream).await? {
        PeerFrame::Hello(remote) => {
            local.check_compatible(&remote)?;
            Ok((remote, stream))
        }
        other => Err(ProtocolError::Handshake(format!(
            "expected hello, got {}",
            other.kind()
        ))),
    }
}

/// Decode frames until the socket closes
async fn read_loop(id: SessionId, mut reader: OwnedReadHalf, events: mpsc::UnboundedSender<EngineEvent>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(frame) => {
                if events.send(EngineEvent::Inbound { session: id, frame }).is_err() {
                    return;
                }
            }
            Err(reason) => {
                let _ = events.send(EngineEvent::ReaderClosed { session: id, reason });
                return;
            }
        }
    }
}
