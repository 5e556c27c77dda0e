// Test Support - Fake nodes for exercising the controller without kratos-node
// Principle: In-memory RPC for logic, a shell script for the process, real sockets for the wire

use crate::cli::config::{HarnessConfig, Timeouts};
use crate::cluster::{ClusterConfig, ClusterController};
use crate::context::RunContext;
use crate::network::protocol::{read_frame, write_frame};
use crate::network::{Hello, PeerFrame};
use crate::rpc::{
    methods, normalize_hash, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcEndpoint, RpcError,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

// =========================================================================
// MOCK RPC
// =========================================================================

/// When a submitted transaction becomes visible to `tx_getReceipt`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inclusion {
    /// Receipt available as soon as the tx is submitted
    Immediate,
    /// Receipt available once the tx was submitted this many times in total
    AfterSubmissions(u32),
    Never,
}

#[derive(Debug)]
struct MockState {
    node_id: String,
    phase: String,
    height: u64,
    best_hash: String,
    pool: Vec<String>,
    peers: Vec<String>,
    submissions: HashMap<String, u32>,
    receipts: HashMap<String, Value>,
    inclusion: Inclusion,
    outcome_status: u64,
    /// Upcoming calls that fail at the transport level
    transport_failures: u32,
    calls: Vec<String>,
    datadir: Option<PathBuf>,
}

/// In-memory node RPC surface
#[derive(Debug)]
pub struct MockRpc {
    state: Mutex<MockState>,
}

impl MockRpc {
    pub fn new(node_id: &str) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                node_id: node_id.to_string(),
                phase: methods::NORMAL_SYNC_PHASE.to_string(),
                height: 0,
                best_hash: "0xgenesis".to_string(),
                pool: vec![],
                peers: vec![],
                submissions: HashMap::new(),
                receipts: HashMap::new(),
                inclusion: Inclusion::Immediate,
                outcome_status: 0,
                transport_failures: 0,
                calls: vec![],
                datadir: None,
            }),
        })
    }

    fn with<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn set_tip(&self, height: u64, hash: &str) {
        self.with(|s| {
            s.height = height;
            s.best_hash = hash.to_string();
        })
    }

    pub fn set_pool(&self, hashes: &[&str]) {
        self.with(|s| s.pool = hashes.iter().map(|h| normalize_hash(h)).collect())
    }

    pub fn set_phase(&self, phase: &str) {
        self.with(|s| s.phase = phase.to_string())
    }

    pub fn set_inclusion(&self, inclusion: Inclusion) {
        self.with(|s| s.inclusion = inclusion)
    }

    pub fn set_outcome_status(&self, status: u64) {
        self.with(|s| s.outcome_status = status)
    }

    pub fn fail_next_calls(&self, count: u32) {
        self.with(|s| s.transport_failures = count)
    }

    /// Directory where `system_stop` drops the file the fake node waits for
    pub fn set_datadir(&self, dir: &Path) {
        self.with(|s| s.datadir = Some(dir.to_path_buf()))
    }

    pub fn peers(&self) -> Vec<String> {
        self.with(|s| s.peers.clone())
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.with(|s| s.calls.iter().filter(|m| *m == method).count())
    }

    pub fn height(&self) -> u64 {
        self.with(|s| s.height)
    }

    fn include(state: &mut MockState, hash: &str) {
        let receipt = json!({
            "transactionHash": hash,
            "blockHash": format!("0xblock{}", state.height + 1),
            "blockNumber": state.height + 1,
            "outcomeStatus": state.outcome_status,
        });
        state.receipts.insert(hash.to_string(), receipt);
    }

    fn handle(state: &mut MockState, method: &str, params: &Value) -> Result<Value, RpcError> {
        match method {
            methods::SYSTEM_HEALTH => Ok(json!({ "healthy": true, "peerCount": state.peers.len() })),
            methods::SYSTEM_NODE_ID => Ok(json!(state.node_id)),
            methods::SYSTEM_PEERS => Ok(json!(state.peers)),
            methods::SYSTEM_STOP => {
                if let Some(ref dir) = state.datadir {
                    let _ = std::fs::write(dir.join("stop"), b"");
                }
                Ok(Value::Null)
            }
            methods::CHAIN_GET_INFO => Ok(json!({
                "chainName": "kratos",
                "height": state.height,
                "bestHash": state.best_hash,
            })),
            methods::SYNC_GET_PHASE => Ok(json!(state.phase)),
            methods::MEMPOOL_PENDING_HASHES => Ok(json!(state.pool)),
            methods::AUTHOR_SUBMIT_TRANSACTION => {
                let raw = params[0]
                    .as_str()
                    .ok_or_else(|| JsonRpcError::bad_params("expected hex payload"))?
                    .trim_start_matches("0x");
                let hash = normalize_hash(&raw[..raw.len().min(32)]);
                let count = {
                    let entry = state.submissions.entry(hash.clone()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                if !state.pool.contains(&hash) && !state.receipts.contains_key(&hash) {
                    state.pool.push(hash.clone());
                }
                let visible = match state.inclusion {
                    Inclusion::Immediate => true,
                    Inclusion::AfterSubmissions(n) => count >= n,
                    Inclusion::Never => false,
                };
                if visible && !state.receipts.contains_key(&hash) {
                    Self::include(state, &hash);
                }
                Ok(json!({ "hash": hash }))
            }
            methods::TX_GET_RECEIPT => {
                let hash = normalize_hash(params[0].as_str().unwrap_or_default());
                Ok(state.receipts.get(&hash).cloned().unwrap_or(Value::Null))
            }
            methods::TEST_GENERATE_BLOCKS => {
                let count = params[0].as_u64().unwrap_or(1);
                let mut hashes = vec![];
                for _ in 0..count {
                    state.height += 1;
                    state.best_hash = format!("0x{}{:04}", &state.node_id, state.height);
                    hashes.push(state.best_hash.clone());
                }
                let receipts = &state.receipts;
                state.pool.retain(|h| !receipts.contains_key(h));
                Ok(json!(hashes))
            }
            methods::ADMIN_ADD_PEER => {
                let id = params[0].as_str().unwrap_or_default().to_string();
                if !state.peers.contains(&id) {
                    state.peers.push(id);
                }
                Ok(Value::Bool(true))
            }
            methods::ADMIN_REMOVE_PEER => {
                let id = params[0].as_str().unwrap_or_default();
                state.peers.retain(|p| p != id);
                Ok(Value::Bool(true))
            }
            other => Err(JsonRpcError::unknown_method(other).into()),
        }
    }
}

#[async_trait]
impl RpcEndpoint for MockRpc {
    fn url(&self) -> String {
        let id = self.with(|s| s.node_id.clone());
        format!("mock://{}", id)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.with(|s| {
            s.calls.push(method.to_string());
            if s.transport_failures > 0 {
                s.transport_failures -= 1;
                return Err(RpcError::Transport("connection refused".to_string()));
            }
            Self::handle(s, method, &params)
        })
    }
}

// =========================================================================
// FAKE NODE PROCESS
// =========================================================================

/// Shell script standing in for kratos-node: runs in its datadir until a `stop`
/// file appears, then prints `stderr` (if any) and exits 0
pub fn fake_node_binary(dir: &Path, stderr: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-kratos-node");
    let mut script = String::from("#!/bin/sh\nrm -f stop\nwhile [ ! -f stop ]; do sleep 0.05; done\n");
    if !stderr.is_empty() {
        script.push_str(&format!("echo '{}' >&2\n", stderr));
    }
    script.push_str("exit 0\n");

    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Timeouts small enough for unit tests
pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        rpc: Duration::from_secs(1),
        start: Duration::from_secs(5),
        phase: Duration::from_secs(2),
        sync: Duration::from_secs(2),
        stop: Duration::from_secs(5),
        restart: Duration::from_secs(5),
        handshake: Duration::from_secs(2),
        peering: Duration::from_secs(2),
        poll_interval: Duration::from_millis(10),
    }
}

/// Harness config rooted in `dir`, with a port range unlikely to collide
pub fn test_harness_config(dir: &Path, binary: &Path) -> HarnessConfig {
    HarnessConfig {
        node_binary: binary.to_path_buf(),
        tmpdir: Some(dir.join("run")),
        cachedir: dir.join("cache"),
        port_seed: rand::random::<u32>() % 1000,
        random_seed: 7,
        timeouts: fast_timeouts(),
        ..HarnessConfig::default()
    }
}

/// Cluster of `mocks.len()` fake nodes, not started
pub fn mock_cluster(dir: &Path, mocks: &[Arc<MockRpc>]) -> ClusterController {
    let binary = fake_node_binary(dir, "");
    let config = test_harness_config(dir, &binary);
    let ctx = RunContext::new(&config).unwrap();
    let mut cluster = ClusterController::new(ctx, ClusterConfig::from_harness(&config));
    for mock in mocks {
        let i = cluster.add_node_with(mock.clone(), &[]).unwrap();
        mock.set_datadir(&cluster.ctx().node_dir(i));
    }
    cluster
}

/// `count` mocks named node0, node1, ...
pub fn mocks(count: usize) -> Vec<Arc<MockRpc>> {
    (0..count).map(|i| MockRpc::new(&format!("node{}", i))).collect()
}

// =========================================================================
// HTTP FAKE NODE
// =========================================================================

/// Serve `mock` as JSON-RPC over HTTP on `addr`; `system_stop` drops the stop
/// file into `datadir` so several servers can share one mock. `None` if the
/// address is taken.
pub fn serve_http(mock: Arc<MockRpc>, addr: SocketAddr, datadir: PathBuf) -> Option<SocketAddr> {
    use warp::Filter;

    let route = warp::post().and(warp::body::json()).then(move |request: JsonRpcRequest| {
        let mock = mock.clone();
        let datadir = datadir.clone();
        async move {
            let outcome = if request.method == methods::SYSTEM_STOP {
                let _ = std::fs::write(datadir.join("stop"), b"");
                Ok(Value::Null)
            } else {
                mock.call(&request.method, request.params).await
            };
            let response = match outcome {
                Ok(result) => JsonRpcResponse::success(request.id, result),
                Err(RpcError::Remote { code, message }) => {
                    JsonRpcResponse::failure(request.id, JsonRpcError::new(code, message))
                }
                Err(e) => JsonRpcResponse::failure(request.id, JsonRpcError::new(-32000, e.to_string())),
            };
            warp::reply::json(&response)
        }
    });

    let (bound, server) = warp::serve(route).try_bind_ephemeral(addr).ok()?;
    tokio::spawn(server);
    Some(bound)
}

// =========================================================================
// FAKE PEER
// =========================================================================

/// How the fake peer answers the harness
#[derive(Debug, Clone)]
pub enum PeerBehavior {
    /// Handshake with `hello`, answer pings, record everything else
    Honest(Hello),
    /// Accept the connection and never speak
    Silent,
}

/// Accept one connection; frames received after the handshake are sent to the returned channel
pub async fn fake_peer(behavior: PeerBehavior) -> (SocketAddr, tokio::sync::mpsc::UnboundedReceiver<PeerFrame>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (mut stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => return,
        };
        let hello = match behavior {
            PeerBehavior::Silent => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                return;
            }
            PeerBehavior::Honest(hello) => hello,
        };

        if read_frame(&mut stream).await.is_err() {
            return;
        }
        if write_frame(&mut stream, &PeerFrame::Hello(hello)).await.is_err() {
            return;
        }
        loop {
            match read_frame(&mut stream).await {
                Ok(PeerFrame::Ping(n)) => {
                    let _ = tx.send(PeerFrame::Ping(n));
                    if write_frame(&mut stream, &PeerFrame::Pong(n)).await.is_err() {
                        return;
                    }
                }
                Ok(frame) => {
                    let _ = tx.send(frame);
                }
                Err(_) => return,
            }
        }
    });

    (addr, rx)
}
