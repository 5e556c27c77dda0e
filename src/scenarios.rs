// Scenarios - Built-in test bodies runnable from the command line
// Principle: Each scenario exercises one controller capability end to end

use crate::cluster::{ClusterController, ClusterTopology};
use crate::error::{assert_equal, HarnessError, Result};
use crate::network::PeerFrame;
use crate::runner::{TestCase, TestParams};
use async_trait::async_trait;
use rand::Rng;
use tracing::info;

/// Names accepted by `scenario_by_name`
pub const SCENARIOS: &[&str] = &["smoke", "partition", "chaos", "p2p"];

pub fn scenario_by_name(name: &str) -> Option<Box<dyn TestCase>> {
    match name {
        "smoke" => Some(Box::new(Smoke)),
        "partition" => Some(Box::new(Partition)),
        "chaos" => Some(Box::new(ChaosRestart::default())),
        "p2p" => Some(Box::new(PeerRelay)),
        _ => None,
    }
}

/// Opaque transaction payload; the node decides whether it is valid
fn test_payload(cluster: &mut ClusterController, tag: &str) -> Vec<u8> {
    let mut payload = tag.as_bytes().to_vec();
    let nonce: [u8; 16] = cluster.ctx_mut().rng.gen();
    payload.extend_from_slice(&nonce);
    payload
}

// =============================================================================
// SMOKE
// =============================================================================

/// Blocks propagate, mempools converge, transactions confirm
pub struct Smoke;

#[async_trait]
impl TestCase for Smoke {
    fn name(&self) -> &str {
        "smoke"
    }

    fn params(&self) -> TestParams {
        TestParams {
            num_nodes: 3,
            ..TestParams::default()
        }
    }

    async fn run(&mut self, cluster: &mut ClusterController) -> Result<()> {
        let before = cluster.sync_all().await?;
        cluster.generate_blocks(0, 2).await?;
        let after = cluster.sync_all().await?;
        assert_equal(after.height, before.height + 2)?;

        let mut txs = Vec::new();
        for tag in ["smoke-a", "smoke-b"] {
            let raw = test_payload(cluster, tag);
            txs.push(cluster.submit_tx(0, raw).await?);
        }

        let all = cluster.all();
        let timeout = cluster.config().timeouts.sync;
        cluster.sync_mempools(&all, timeout).await?;

        let receipts = cluster.confirm_transactions(0, &mut txs, true).await?;
        assert_equal(receipts.len(), 2)?;
        cluster.sync_all().await?;

        // A second pass is served from the cache
        let again = cluster.confirm_transactions(0, &mut txs, true).await?;
        assert_equal(again, receipts)?;
        info!("✅ {} transactions confirmed on every node", txs.len());
        Ok(())
    }
}

// =============================================================================
// PARTITION
// =============================================================================

/// Split the chain in two, let the halves diverge, then heal
pub struct Partition;

#[async_trait]
impl TestCase for Partition {
    fn name(&self) -> &str {
        "partition"
    }

    async fn run(&mut self, cluster: &mut ClusterController) -> Result<()> {
        let n = cluster.len();
        if n < 2 {
            return Err(HarnessError::Skip(format!("partition needs at least 2 nodes, have {}", n)));
        }
        let split = n / 2;
        let left: Vec<usize> = (0..split).collect();
        let right: Vec<usize> = (split..n).collect();
        let timeout = cluster.config().timeouts.sync;

        cluster.disconnect(split - 1, split).await?;
        info!("✂️ Partitioned {:?} | {:?}", left, right);

        cluster.generate_blocks(0, 2).await?;
        cluster.generate_blocks(n - 1, 3).await?;
        let left_tip = cluster.sync_blocks(&left, timeout).await?;
        let right_tip = cluster.sync_blocks(&right, timeout).await?;
        if left_tip == right_tip {
            return Err(HarnessError::Assertion(format!(
                "partitioned halves share tip {}",
                left_tip
            )));
        }

        cluster.connect(split - 1, split).await?;
        let healed = cluster.sync_all().await?;
        info!("🔗 Partition healed at {}", healed);
        Ok(())
    }
}

// =============================================================================
// CHAOS
// =============================================================================

/// Random restarts, some with wiped datadirs, between block rounds
pub struct ChaosRestart {
    pub rounds: usize,
    pub stop_p: f64,
    pub clean_p: f64,
}

impl Default for ChaosRestart {
    fn default() -> Self {
        Self {
            rounds: 3,
            stop_p: 0.5,
            clean_p: 0.3,
        }
    }
}

#[async_trait]
impl TestCase for ChaosRestart {
    fn name(&self) -> &str {
        "chaos"
    }

    async fn setup_network(&mut self, cluster: &mut ClusterController) -> Result<()> {
        cluster.start_all().await?;
        let topology = ClusterTopology::random(cluster.len(), 2, &mut cluster.ctx_mut().rng);
        cluster.wire(&topology).await?;
        cluster.sync_all().await?;
        Ok(())
    }

    async fn run(&mut self, cluster: &mut ClusterController) -> Result<()> {
        for round in 0..self.rounds {
            let mut restarted = 0;
            // Node 0 keeps producing blocks
            for i in 1..cluster.len() {
                if cluster.maybe_restart(i, self.stop_p, self.clean_p).await? {
                    restarted += 1;
                }
            }
            cluster.generate_blocks(0, 1).await?;
            let tip = cluster.sync_all().await?;
            info!("Round {}: {} restarts, cluster at {}", round, restarted, tip);
        }
        Ok(())
    }
}

// =============================================================================
// P2P
// =============================================================================

/// Harness peer session: ping, then confirm a transaction rebroadcast over the wire
pub struct PeerRelay;

#[async_trait]
impl TestCase for PeerRelay {
    fn name(&self) -> &str {
        "p2p"
    }

    fn params(&self) -> TestParams {
        TestParams {
            num_nodes: 2,
            ..TestParams::default()
        }
    }

    async fn run(&mut self, cluster: &mut ClusterController) -> Result<()> {
        cluster.attach_p2p(0).await?;
        let timeout = cluster.config().timeouts.handshake;
        let nonce: u64 = cluster.ctx_mut().rng.gen();

        let session = cluster
            .node_mut(0)?
            .session_mut()
            .ok_or(HarnessError::NodeNotRunning(0))?;
        session.send(PeerFrame::Ping(nonce)).await?;
        loop {
            match session.recv_timeout(timeout).await? {
                Some(PeerFrame::Pong(n)) if n == nonce => break,
                Some(other) => info!("Ignoring {} while waiting for pong", other.kind()),
                None => {
                    return Err(HarnessError::Assertion(format!(
                        "no pong for nonce {} within {:?}",
                        nonce, timeout
                    )))
                }
            }
        }

        let raw = test_payload(cluster, "p2p");
        let mut txs = vec![cluster.submit_tx(0, raw).await?];
        cluster.confirm_transactions(0, &mut txs, true).await?;
        cluster.sync_all().await?;
        Ok(())
    }
}
