// Cluster - Nodes, their topology, and the barriers tests wait on
// Principle: Control flows down to nodes; every wait is a bounded poll that fails fast on a crash

pub mod agreement;
pub mod topology;

pub use agreement::{mempools_agree, tips_agree};
pub use topology::{ClusterTopology, Edge};

use crate::cli::config::{HarnessConfig, Timeouts};
use crate::confirm::{ConfirmationPolicy, PendingTx, RpcResubmit, TxConfirmationService, TxRelay};
use crate::context::RunContext;
use crate::error::{HarnessError, Result};
use crate::network::{EngineConfig, Hello, NetworkEngine};
use crate::node::options::NodeOptions;
use crate::node::test_node::{NodeTiming, TestNode};
use crate::node::NodeState;
use crate::retry::{poll_until, PollError, Probe};
use crate::rpc::methods::NORMAL_SYNC_PHASE;
use crate::rpc::{ChainTip, HttpRpcClient, NodeRpc, RpcEndpoint, TxReceipt};
use agreement::{collect_ok, describe, PoolView};
use futures::future::join_all;
use rand::Rng;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Cluster-wide settings
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub binary: PathBuf,
    /// Chain announced in the harness Hello
    pub chain: String,
    pub timeouts: Timeouts,
    /// Applied to every node, in order
    pub node_overrides: Vec<(String, String)>,
    pub confirmation: ConfirmationPolicy,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("kratos-node"),
            chain: "kratos".to_string(),
            timeouts: Timeouts::default(),
            node_overrides: vec![],
            confirmation: ConfirmationPolicy::default(),
        }
    }
}

impl ClusterConfig {
    pub fn from_harness(config: &HarnessConfig) -> Self {
        let chain = config
            .node_overrides
            .iter()
            .rev()
            .find(|(k, _)| k == "chain")
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| "kratos".to_string());

        Self {
            binary: config.node_binary.clone(),
            chain,
            timeouts: config.timeouts.clone(),
            node_overrides: config.node_overrides.clone(),
            confirmation: ConfirmationPolicy {
                poll_interval: config.timeouts.poll_interval,
                ..ConfirmationPolicy::default()
            },
        }
    }
}

/// Owns the nodes of one run
pub struct ClusterController {
    ctx: RunContext,
    config: ClusterConfig,
    nodes: Vec<TestNode>,
    topology: ClusterTopology,
    engine: NetworkEngine,
    confirmations: TxConfirmationService,
}

impl ClusterController {
    pub fn new(ctx: RunContext, config: ClusterConfig) -> Self {
        let engine = NetworkEngine::new(EngineConfig {
            handshake_timeout: config.timeouts.handshake,
            write_timeout: config.timeouts.handshake,
            local: Hello::harness(&config.chain),
        });
        let confirmations = TxConfirmationService::new(config.confirmation.clone());

        Self {
            ctx,
            config,
            nodes: Vec::new(),
            topology: ClusterTopology::empty(),
            engine,
            confirmations,
        }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn ctx(&self) -> &RunContext {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut RunContext {
        &mut self.ctx
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[TestNode] {
        &self.nodes
    }

    pub fn node(&self, i: usize) -> Result<&TestNode> {
        let count = self.nodes.len();
        self.nodes.get(i).ok_or_else(|| out_of_range(i, count))
    }

    pub fn node_mut(&mut self, i: usize) -> Result<&mut TestNode> {
        let count = self.nodes.len();
        self.nodes.get_mut(i).ok_or_else(|| out_of_range(i, count))
    }

    /// Indices of every node
    pub fn all(&self) -> Vec<usize> {
        (0..self.nodes.len()).collect()
    }

    pub fn topology(&self) -> &ClusterTopology {
        &self.topology
    }

    pub fn established_links(&self) -> Vec<Edge> {
        self.topology.links()
    }

    pub fn engine(&self) -> &NetworkEngine {
        &self.engine
    }

    pub fn confirmations(&self) -> &TxConfirmationService {
        &self.confirmations
    }

    /// Nodes behind `indices`; a barrier over no nodes is a test bug
    fn select(&self, indices: &[usize]) -> Result<Vec<&TestNode>> {
        if indices.is_empty() {
            return Err(HarnessError::Assertion("sync barrier over an empty node set".to_string()));
        }
        indices.iter().map(|&i| self.node(i)).collect()
    }

    // =========================================================================
    // NODES
    // =========================================================================

    fn node_options(&self, i: usize, overrides: &[(String, String)]) -> Result<NodeOptions> {
        let mut options = NodeOptions::for_node(
            i,
            &self.ctx.node_dir(i),
            self.ctx.ports.p2p_port(i)?,
            self.ctx.ports.rpc_port(i)?,
        );
        options.apply_overrides(&self.config.node_overrides)?;
        options.apply_overrides(overrides)?;
        Ok(options)
    }

    fn timing(&self) -> NodeTiming {
        NodeTiming {
            poll_interval: self.config.timeouts.poll_interval,
            phase_timeout: self.config.timeouts.phase,
            stop_timeout: self.config.timeouts.stop,
        }
    }

    /// Add `count` nodes talking JSON-RPC over HTTP
    pub fn add_nodes(&mut self, count: usize, overrides: &[(String, String)]) -> Result<()> {
        for _ in 0..count {
            let i = self.nodes.len();
            let url = self.node_options(i, overrides)?.rpc_url();
            let client = HttpRpcClient::new(&url, self.config.timeouts.rpc)?;
            self.add_node_with(Arc::new(client), overrides)?;
        }
        Ok(())
    }

    /// Add one node reached through `endpoint`
    pub fn add_node_with(&mut self, endpoint: Arc<dyn RpcEndpoint>, overrides: &[(String, String)]) -> Result<usize> {
        let i = self.nodes.len();
        let options = self.node_options(i, overrides)?;
        let node = TestNode::new(i, &self.config.binary, options, NodeRpc::new(endpoint), self.timing());
        self.nodes.push(node);
        Ok(i)
    }

    /// Create node datadirs, seeding them from the cache unless `clean`
    pub fn initialize_chain(&self, clean: bool) -> Result<()> {
        for i in 0..self.nodes.len() {
            let dir = self.ctx.node_dir(i);
            std::fs::create_dir_all(&dir)?;
            if clean {
                continue;
            }
            let cache = self.ctx.cache_node_dir(i);
            if cache.is_dir() {
                copy_dir(&cache, &dir)?;
                info!("📁 Node {} seeded from {}", i, cache.display());
            } else {
                warn!("⚠️ No cached chain for node {} at {}, starting empty", i, cache.display());
            }
        }
        Ok(())
    }

    /// Start node `i` and wait for the normal sync phase
    pub async fn start_node(&mut self, i: usize, extra_args: &[String]) -> Result<()> {
        let timeout = self.config.timeouts.start;
        self.node_mut(i)?.start(extra_args, &[NORMAL_SYNC_PHASE], timeout).await
    }

    /// Start every node and the network engine; if one node fails the others are stopped
    pub async fn start_all(&mut self) -> Result<()> {
        let timeout = self.config.timeouts.start;
        self.engine.start();
        let mut result = Ok(());

        for node in self.nodes.iter_mut() {
            if let Err(e) = node.spawn(&[]) {
                result = Err(e);
                break;
            }
        }
        if result.is_ok() {
            for node in self.nodes.iter_mut() {
                if let Err(e) = node.wait_ready(&[NORMAL_SYNC_PHASE], timeout).await {
                    result = Err(e);
                    break;
                }
            }
        }

        if let Err(e) = result {
            error!("Cluster startup failed: {}", e);
            if let Err(stop_err) = self.stop_all().await {
                warn!("Stopping the remaining nodes failed too: {}", stop_err);
            }
            return Err(e);
        }
        info!("✅ {} nodes running", self.nodes.len());
        Ok(())
    }

    /// Stop node `i`; with `clean` its datadir is wiped afterwards
    pub async fn stop_node(&mut self, i: usize, expected_stderr: &str, kill: bool, wait: bool, clean: bool) -> Result<()> {
        self.node_mut(i)?.stop(expected_stderr, kill, wait).await?;
        self.topology.mark_node_down(i);
        if clean {
            self.node_mut(i)?.clean_data()?;
        }
        Ok(())
    }

    /// Stop every node, reporting the first failure after trying them all
    pub async fn stop_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for node in self.nodes.iter_mut() {
            if let Err(e) = node.stop("", false, true).await {
                error!("Node {} did not stop cleanly: {}", node.index(), e);
                first_error.get_or_insert(e);
            }
        }
        for i in 0..self.nodes.len() {
            self.topology.mark_node_down(i);
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Wait for a node stopped with `wait = false`
    pub async fn wait_for_node_exit(&mut self, i: usize, timeout: Duration) -> Result<()> {
        self.node_mut(i)?.wait_for_exit("", timeout).await?;
        self.topology.mark_node_down(i);
        Ok(())
    }

    /// With probability `stop_p` restart node `i`, wiping its data with probability
    /// `clean_p`; declared links are re-established. Returns whether it restarted.
    pub async fn maybe_restart(&mut self, i: usize, stop_p: f64, clean_p: f64) -> Result<bool> {
        self.node(i)?;
        if !self.ctx.rng.gen_bool(stop_p.clamp(0.0, 1.0)) {
            return Ok(false);
        }
        let clean = self.ctx.rng.gen_bool(clean_p.clamp(0.0, 1.0));
        let had_session = self.node(i)?.session().is_some();

        info!("🔄 Restarting node {} (clean: {})", i, clean);
        self.stop_node(i, "", false, true, clean).await?;

        let timeout = self.config.timeouts.restart;
        self.node_mut(i)?.start(&[], &[NORMAL_SYNC_PHASE], timeout).await?;

        for (a, b) in self.topology.edges_of(i) {
            self.connect(a, b).await?;
        }
        if had_session {
            self.attach_p2p(i).await?;
        }
        Ok(true)
    }

    /// Let the nodes outlive the harness
    pub fn keep_nodes_running(&mut self) {
        for node in self.nodes.iter_mut() {
            node.set_cleanup_on_exit(false);
        }
    }

    /// Re-derive every node state; crashed nodes lose their links
    pub fn refresh_states(&mut self) {
        for node in self.nodes.iter_mut() {
            if node.refresh_state() == NodeState::Crashed {
                self.topology.mark_node_down(node.index());
            }
        }
    }

    // =========================================================================
    // TOPOLOGY
    // =========================================================================

    /// Declare and establish every edge of `topology`
    pub async fn wire(&mut self, topology: &ClusterTopology) -> Result<()> {
        for &(a, b) in topology.edges() {
            self.node(a)?;
            self.node(b)?;
            self.topology.add_edge(a, b);
        }
        for (a, b) in topology.edges().to_vec() {
            self.connect(a, b).await?;
        }
        info!("🔗 Topology wired: {} links", self.topology.links().len());
        Ok(())
    }

    fn peer_info(&self, i: usize) -> Result<(String, String, NodeRpc)> {
        let node = self.node(i)?;
        node.ensure_alive()?;
        let id = node
            .node_id()
            .ok_or(HarnessError::NodeNotRunning(i))?
            .to_string();
        Ok((id, node.options().p2p_multiaddr(), node.rpc().clone()))
    }

    /// Peer `a` and `b` and wait until both list each other; idempotent
    pub async fn connect(&mut self, a: usize, b: usize) -> Result<()> {
        if a == b {
            return Err(HarnessError::Assertion(format!("cannot connect node {} to itself", a)));
        }
        self.node(a)?;
        self.node(b)?;
        self.topology.add_edge(a, b);
        if self.topology.is_linked(a, b) {
            return Ok(());
        }

        let (id_a, addr_a, rpc_a) = self.peer_info(a)?;
        let (id_b, addr_b, rpc_b) = self.peer_info(b)?;
        rpc_a.add_peer(&id_b, &addr_b).await?;
        rpc_b.add_peer(&id_a, &addr_a).await?;

        let timeout = self.config.timeouts.peering;
        let outcome = {
            let nodes = self.select(&[a, b])?;
            poll_until(
                &format!("peering {} <-> {}", a, b),
                self.config.timeouts.poll_interval,
                timeout,
                || {
                    let nodes = &nodes;
                    let (rpc_a, rpc_b, id_a, id_b) = (&rpc_a, &rpc_b, &id_a, &id_b);
                    async move {
                        for node in nodes.iter() {
                            node.ensure_alive()?;
                        }
                        let (peers_a, peers_b) = futures::join!(rpc_a.peers(), rpc_b.peers());
                        Ok::<_, HarnessError>(match (peers_a, peers_b) {
                            (Ok(pa), Ok(pb)) if pa.contains(id_b) && pb.contains(id_a) => Probe::Ready(()),
                            (Ok(pa), Ok(pb)) => Probe::Pending(format!(
                                "node{} lists {} peers, node{} lists {}",
                                a,
                                pa.len(),
                                b,
                                pb.len()
                            )),
                            (Err(e), _) | (_, Err(e)) => Probe::Pending(e.to_string()),
                        })
                    }
                },
            )
            .await
        };
        self.settle_sync(outcome, "peering", timeout)?;

        self.topology.mark_established(a, b);
        self.nodes[a].add_peer(b);
        self.nodes[b].add_peer(a);
        info!("🔗 Nodes {} and {} connected", a, b);
        Ok(())
    }

    /// Partition `a` from `b`: drop the edge and wait until neither lists the other
    pub async fn disconnect(&mut self, a: usize, b: usize) -> Result<()> {
        let (id_a, _, rpc_a) = self.peer_info(a)?;
        let (id_b, _, rpc_b) = self.peer_info(b)?;
        rpc_a.remove_peer(&id_b).await?;
        rpc_b.remove_peer(&id_a).await?;

        let timeout = self.config.timeouts.peering;
        let outcome = {
            let nodes = self.select(&[a, b])?;
            poll_until(
                &format!("partition {} | {}", a, b),
                self.config.timeouts.poll_interval,
                timeout,
                || {
                    let nodes = &nodes;
                    let (rpc_a, rpc_b, id_a, id_b) = (&rpc_a, &rpc_b, &id_a, &id_b);
                    async move {
                        for node in nodes.iter() {
                            node.ensure_alive()?;
                        }
                        let (peers_a, peers_b) = futures::join!(rpc_a.peers(), rpc_b.peers());
                        Ok::<_, HarnessError>(match (peers_a, peers_b) {
                            (Ok(pa), Ok(pb)) if !pa.contains(id_b) && !pb.contains(id_a) => Probe::Ready(()),
                            (Ok(_), Ok(_)) => Probe::Pending("still peered".to_string()),
                            (Err(e), _) | (_, Err(e)) => Probe::Pending(e.to_string()),
                        })
                    }
                },
            )
            .await
        };
        self.settle_sync(outcome, "partition", timeout)?;

        self.topology.remove_edge(a, b);
        self.nodes[a].remove_peer(b);
        self.nodes[b].remove_peer(a);
        info!("✂️ Nodes {} and {} partitioned", a, b);
        Ok(())
    }

    /// Open a harness peer session to node `i`
    pub async fn attach_p2p(&mut self, i: usize) -> Result<()> {
        let addr = self.node(i)?.options().p2p_socket();
        // Nodes started one by one never went through start_all
        self.engine.start();
        let session = self.engine.connect(i, addr).await?;
        self.node_mut(i)?.attach_session(session);
        Ok(())
    }

    // =========================================================================
    // SYNC BARRIERS
    // =========================================================================

    /// Wait until every node in `indices` reports the same tip
    pub async fn sync_blocks(&mut self, indices: &[usize], timeout: Duration) -> Result<ChainTip> {
        let interval = self.config.timeouts.poll_interval;
        let outcome = {
            let nodes = self.select(indices)?;
            poll_until("block sync", interval, timeout, || {
                let nodes = &nodes;
                async move {
                    for node in nodes.iter() {
                        node.ensure_alive()?;
                    }
                    let observations = join_all(nodes.iter().map(|n| n.rpc().chain_tip())).await;
                    Ok::<_, HarnessError>(match collect_ok(&observations) {
                        Some(tips) if tips_agree(&tips) => Probe::Ready(tips[0].clone()),
                        _ => Probe::Pending(describe(indices, &observations)),
                    })
                }
            })
            .await
        };
        let tip = self.settle_sync(outcome, "block", timeout)?;
        info!("✅ {} nodes agree on tip {}", indices.len(), tip);
        Ok(tip)
    }

    /// Wait until every node in `indices` holds the same pending hashes
    pub async fn sync_mempools(&mut self, indices: &[usize], timeout: Duration) -> Result<()> {
        let interval = self.config.timeouts.poll_interval;
        let outcome = {
            let nodes = self.select(indices)?;
            poll_until("mempool sync", interval, timeout, || {
                let nodes = &nodes;
                async move {
                    for node in nodes.iter() {
                        node.ensure_alive()?;
                    }
                    let observations: Vec<_> = join_all(nodes.iter().map(|n| n.rpc().pending_hashes()))
                        .await
                        .into_iter()
                        .map(|o| o.map(|hashes| hashes.into_iter().collect::<BTreeSet<String>>()))
                        .collect();
                    Ok::<_, HarnessError>(match collect_ok(&observations) {
                        Some(pools) if mempools_agree(&pools) => Probe::Ready(()),
                        _ => {
                            let shown: Vec<_> = observations
                                .iter()
                                .map(|o| o.as_ref().map(|p| PoolView(p).to_string()).map_err(Clone::clone))
                                .collect();
                            Probe::Pending(describe(indices, &shown))
                        }
                    })
                }
            })
            .await
        };
        self.settle_sync(outcome, "mempool", timeout)?;
        info!("✅ {} mempools in sync", indices.len());
        Ok(())
    }

    /// Block sync over every node with the configured timeout
    pub async fn sync_all(&mut self) -> Result<ChainTip> {
        let all = self.all();
        let timeout = self.config.timeouts.sync;
        self.sync_blocks(&all, timeout).await
    }

    fn settle_sync<T>(&mut self, outcome: std::result::Result<T, PollError>, what: &'static str, timeout: Duration) -> Result<T> {
        match outcome {
            Ok(value) => Ok(value),
            Err(PollError::Timeout { last_observed, .. }) => {
                error!("{} sync timed out after {:?}: {}", what, timeout, last_observed);
                Err(HarnessError::SyncTimeout {
                    what,
                    timeout,
                    observed: last_observed,
                })
            }
            Err(PollError::Fatal(e)) => {
                self.refresh_states();
                Err(e)
            }
        }
    }

    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    /// Submit a raw transaction to node `origin`
    pub async fn submit_tx(&self, origin: usize, raw: Vec<u8>) -> Result<PendingTx> {
        let node = self.node(origin)?;
        node.ensure_alive()?;
        self.confirmations.submit(node.rpc(), origin, raw).await
    }

    /// Generate `count` blocks on node `i`
    pub async fn generate_blocks(&self, i: usize, count: u32) -> Result<Vec<String>> {
        Ok(self.node(i)?.rpc().generate_blocks(count).await?)
    }

    /// Confirm transactions accepted by node `origin`, rebroadcasting through its
    /// peer session when it has one and over RPC otherwise
    pub async fn confirm_transactions(&mut self, origin: usize, txs: &mut [PendingTx], check_status: bool) -> Result<Vec<TxReceipt>> {
        if let Some(tx) = txs.iter().find(|tx| tx.origin != origin) {
            return Err(HarnessError::Assertion(format!(
                "tx {} was accepted by node {}, not node {}",
                tx.hash, tx.origin, origin
            )));
        }

        let count = self.nodes.len();
        let node = self.nodes.get(origin).ok_or_else(|| out_of_range(origin, count))?;
        let fallback;
        let relay: &dyn TxRelay = match node.session() {
            Some(session) => session,
            None => {
                fallback = RpcResubmit::new(node.rpc().clone());
                &fallback
            }
        };
        self.confirmations.confirm(node.rpc(), relay, txs, check_status).await
    }

    /// Stop the network engine; nodes are left to the caller
    pub async fn close(&mut self) {
        for node in self.nodes.iter_mut() {
            node.take_session();
        }
        self.engine.close().await;
    }
}

fn out_of_range(i: usize, count: usize) -> HarnessError {
    HarnessError::Assertion(format!("node index {} out of range ({} nodes)", i, count))
}

fn copy_dir(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_config_picks_chain_override() {
        let harness = HarnessConfig {
            node_overrides: vec![
                ("chain".to_string(), "devnet".to_string()),
                ("max_peers".to_string(), "4".to_string()),
            ],
            ..HarnessConfig::default()
        };
        let config = ClusterConfig::from_harness(&harness);
        assert_eq!(config.chain, "devnet");
        assert_eq!(config.confirmation.poll_interval, harness.timeouts.poll_interval);
    }

    #[test]
    fn test_copy_dir_recursive() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("db/blocks")).unwrap();
        std::fs::write(src.path().join("db/blocks/000001"), b"block").unwrap();
        std::fs::write(src.path().join("config.toml"), b"x = 1").unwrap();

        copy_dir(src.path(), &dst.path().join("node0")).unwrap();
        assert_eq!(std::fs::read(dst.path().join("node0/db/blocks/000001")).unwrap(), b"block");
        assert!(dst.path().join("node0/config.toml").is_file());
    }
}
