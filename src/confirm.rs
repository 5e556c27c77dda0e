// Tx Confirmation - Wait for submitted transactions to be located, executed and reported
// Principle: Bounded attempts, rebroadcast between attempts, one flush per batch

use crate::error::{HarnessError, Result};
use crate::network::{PeerFrame, RawTransaction, SessionHandle};
use crate::retry::{poll_until, retry_transport, PollError, Probe};
use crate::rpc::{NodeRpc, RpcError, TxReceipt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Every bound the confirmation protocol waits on
#[derive(Debug, Clone)]
pub struct ConfirmationPolicy {
    /// How long one lookup attempt polls for the receipt
    pub lookup_timeout: Duration,
    pub poll_interval: Duration,
    /// Lookup attempts per transaction, rebroadcasting in between
    pub max_attempts: u32,
    /// Sleep before retrying a call that failed at the transport level
    pub transport_backoff: Duration,
    /// Transport retries per call; exhausting them counts as "not found yet"
    pub max_transport_retries: u32,
    /// Blocks generated once every transaction of a batch is located
    pub flush_blocks: u32,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(20),
            poll_interval: Duration::from_millis(250),
            max_attempts: 3,
            transport_backoff: Duration::from_millis(10),
            max_transport_retries: 100,
            flush_blocks: 5,
        }
    }
}

/// Where a pending transaction stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Unconfirmed,
    Confirmed(TxReceipt),
    Failed(String),
}

/// A transaction the test submitted and wants confirmed
#[derive(Debug, Clone)]
pub struct PendingTx {
    /// Normalized `0x` hash
    pub hash: String,
    /// Node that accepted the submission; lookups go there
    pub origin: usize,
    /// Encoded transaction, kept for rebroadcast
    pub raw: Vec<u8>,
    pub submitted_at: DateTime<Utc>,
    /// Lookup attempts spent so far
    pub attempts: u32,
    pub outcome: TxOutcome,
}

impl PendingTx {
    pub fn new(hash: &str, origin: usize, raw: Vec<u8>) -> Self {
        Self {
            hash: crate::rpc::normalize_hash(hash),
            origin,
            raw,
            submitted_at: Utc::now(),
            attempts: 0,
            outcome: TxOutcome::Unconfirmed,
        }
    }

    pub fn receipt(&self) -> Option<&TxReceipt> {
        match self.outcome {
            TxOutcome::Confirmed(ref receipt) => Some(receipt),
            _ => None,
        }
    }

    fn as_raw(&self) -> RawTransaction {
        RawTransaction {
            hash: self.hash.clone(),
            data: self.raw.clone(),
        }
    }
}

// =============================================================================
// RELAY
// =============================================================================

/// Path used to push transactions to a node again
#[async_trait]
pub trait TxRelay: Send + Sync {
    fn name(&self) -> String;

    async fn relay(&self, txs: &[RawTransaction]) -> Result<()>;
}

/// Rebroadcast through the harness peer session, as a `Transactions` frame
#[async_trait]
impl TxRelay for SessionHandle {
    fn name(&self) -> String {
        format!("peer session {} to node {}", self.id(), self.node())
    }

    async fn relay(&self, txs: &[RawTransaction]) -> Result<()> {
        self.send(PeerFrame::Transactions(txs.to_vec())).await
    }
}

/// Rebroadcast by submitting again over RPC, for nodes without a peer session
pub struct RpcResubmit {
    rpc: NodeRpc,
}

impl RpcResubmit {
    pub fn new(rpc: NodeRpc) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl TxRelay for RpcResubmit {
    fn name(&self) -> String {
        format!("rpc resubmit to {}", self.rpc.url())
    }

    async fn relay(&self, txs: &[RawTransaction]) -> Result<()> {
        for tx in txs {
            match self.rpc.submit_raw(&tx.data).await {
                Ok(_) => {}
                // Already in the pool is what we want
                Err(RpcError::Remote { message, .. }) => {
                    debug!("Resubmit of {} rejected: {}", tx.hash, message)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// Drives the locate, rebroadcast, flush and receipt-check protocol
#[derive(Debug, Default)]
pub struct TxConfirmationService {
    policy: ConfirmationPolicy,
    /// Receipts of every transaction already confirmed in this run
    confirmed: HashMap<String, TxReceipt>,
}

impl TxConfirmationService {
    pub fn new(policy: ConfirmationPolicy) -> Self {
        Self {
            policy,
            confirmed: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &ConfirmationPolicy {
        &self.policy
    }

    pub fn is_confirmed(&self, hash: &str) -> bool {
        self.confirmed.contains_key(&crate::rpc::normalize_hash(hash))
    }

    /// Submit a raw transaction to `origin`
    pub async fn submit(&self, rpc: &NodeRpc, origin: usize, raw: Vec<u8>) -> Result<PendingTx> {
        let hash = retry_transport(self.policy.max_transport_retries, self.policy.transport_backoff, || async {
            rpc.submit_raw(&raw).await.map_err(HarnessError::from)
        })
        .await?;
        debug!("Submitted {} to node {}", hash, origin);
        Ok(PendingTx::new(&hash, origin, raw))
    }

    /// Confirm `txs`, all accepted by the node behind `rpc`.
    ///
    /// Already confirmed hashes are answered from the cache without polling,
    /// rebroadcast or block generation. Transactions that failed an earlier call
    /// start over with `max_attempts`. Receipts come back in input order.
    pub async fn confirm(
        &mut self,
        rpc: &NodeRpc,
        relay: &dyn TxRelay,
        txs: &mut [PendingTx],
        check_status: bool,
    ) -> Result<Vec<TxReceipt>> {
        let mut fresh = Vec::new();
        for (i, tx) in txs.iter_mut().enumerate() {
            match self.confirmed.get(&tx.hash) {
                Some(receipt) => tx.outcome = TxOutcome::Confirmed(receipt.clone()),
                None => {
                    // A failed tx gets a full attempt budget again
                    if let TxOutcome::Failed(_) = tx.outcome {
                        tx.attempts = 0;
                        tx.outcome = TxOutcome::Unconfirmed;
                    }
                    fresh.push(i);
                }
            }
        }

        if !fresh.is_empty() {
            for &i in &fresh {
                self.locate(rpc, relay, &mut txs[i]).await?;
            }

            // Extra blocks so receipts reflect executed state
            let count = self.policy.flush_blocks;
            if count > 0 {
                self.with_transport_retry(|| rpc.generate_blocks(count)).await?;
                debug!("Generated {} blocks after locating {} txs", count, fresh.len());
            }

            for &i in &fresh {
                let tx = &mut txs[i];
                let hash = tx.hash.clone();
                let receipt = self
                    .with_transport_retry(|| rpc.receipt(&hash))
                    .await?
                    .ok_or_else(|| HarnessError::ConfirmationExhausted {
                        tx: hash.clone(),
                        attempts: tx.attempts,
                    })?;

                if check_status && !receipt.succeeded() {
                    tx.outcome = TxOutcome::Failed(format!("outcome status {}", receipt.outcome_status));
                    return Err(HarnessError::OutcomeMismatch {
                        tx: hash,
                        status: receipt.outcome_status,
                    });
                }
                tx.outcome = TxOutcome::Confirmed(receipt.clone());
                self.confirmed.insert(hash, receipt);
            }
            info!("✅ {} transactions confirmed", fresh.len());
        }

        txs.iter()
            .map(|tx| {
                tx.receipt().cloned().ok_or_else(|| {
                    HarnessError::Assertion(format!("tx {} has no receipt after confirmation", tx.hash))
                })
            })
            .collect()
    }

    /// Poll for the receipt, rebroadcasting between attempts
    async fn locate(&self, rpc: &NodeRpc, relay: &dyn TxRelay, tx: &mut PendingTx) -> Result<()> {
        debug!("Wait for tx to confirm {}", tx.hash);

        while tx.attempts < self.policy.max_attempts {
            tx.attempts += 1;
            let hash = tx.hash.clone();
            let outcome = poll_until(
                &format!("receipt of {}", hash),
                self.policy.poll_interval,
                self.policy.lookup_timeout,
                || {
                    let hash = hash.clone();
                    async move {
                        match self.with_transport_retry(|| rpc.receipt(&hash)).await {
                            Ok(Some(_)) => Ok(Probe::Ready(())),
                            Ok(None) => Ok(Probe::Pending("receipt not available".to_string())),
                            Err(e) if e.is_retryable() => Ok(Probe::Pending(e.to_string())),
                            Err(e) => Err(e),
                        }
                    }
                },
            )
            .await;

            match outcome {
                Ok(()) => return Ok(()),
                Err(PollError::Fatal(e)) => {
                    tx.outcome = TxOutcome::Failed(e.to_string());
                    return Err(e);
                }
                Err(PollError::Timeout { .. }) if tx.attempts < self.policy.max_attempts => {
                    warn!(
                        "⚠️ Tx {} not found after attempt {}/{}, rebroadcasting via {}",
                        tx.hash,
                        tx.attempts,
                        self.policy.max_attempts,
                        relay.name()
                    );
                    if let Err(e) = relay.relay(&[tx.as_raw()]).await {
                        warn!("Rebroadcast of {} failed: {}", tx.hash, e);
                    }
                }
                Err(PollError::Timeout { .. }) => {}
            }
        }

        tx.outcome = TxOutcome::Failed("not located".to_string());
        Err(HarnessError::ConfirmationExhausted {
            tx: tx.hash.clone(),
            attempts: tx.attempts,
        })
    }

    async fn with_transport_retry<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, RpcError>>,
    {
        retry_transport(self.policy.max_transport_retries, self.policy.transport_backoff, || {
            let fut = call();
            async move { fut.await.map_err(HarnessError::from) }
        })
        .await
    }
}
