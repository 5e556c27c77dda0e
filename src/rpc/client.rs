// RPC client - Request/response channel to a node's JSON-RPC surface
// Principle: The node is opaque; every call is bounded and classified

use super::methods;
use super::types::{
    normalize_hash, ChainInfo, ChainTip, HealthStatus, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, TransactionSubmitResult, TxReceipt,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default per-call timeout
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(60);

/// RPC failure, classified so callers can tell transient from fatal
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// Connection refused/reset, timeout, endpoint busy
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(u16),

    /// Node answered with a JSON-RPC error
    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl RpcError {
    /// Transport failures are safe to retry after a short backoff
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            RpcError::Transport(e.to_string())
        } else if let Some(status) = e.status() {
            RpcError::Http(status.as_u16())
        } else if e.is_decode() {
            RpcError::Decode(e.to_string())
        } else {
            RpcError::Transport(e.to_string())
        }
    }
}

impl From<JsonRpcError> for RpcError {
    fn from(e: JsonRpcError) -> Self {
        RpcError::Remote {
            code: e.code,
            message: e.message,
        }
    }
}

/// Opaque request/response channel to one node
#[async_trait]
pub trait RpcEndpoint: Send + Sync {
    /// Where the endpoint points to, for logs
    fn url(&self) -> String;

    /// Perform one call and return the raw `result` value
    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError>;
}

// =============================================================================
// HTTP IMPLEMENTATION
// =============================================================================

/// JSON-RPC over HTTP
pub struct HttpRpcClient {
    url: String,
    client: reqwest::Client,
    request_id: AtomicU64,
}

impl HttpRpcClient {
    /// Create new RPC client with a per-call timeout
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            url: url.to_string(),
            client,
            request_id: AtomicU64::new(1),
        })
    }

    /// Get next request ID
    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcEndpoint for HttpRpcClient {
    fn url(&self) -> String {
        self.url.clone()
    }

    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RpcError> {
        let request = JsonRpcRequest::new(method, params, self.next_id());
        debug!("-> {} {} {}", self.url, method, request.params);

        let response = self.client.post(&self.url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(RpcError::Http(response.status().as_u16()));
        }

        let json_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))?;

        if let Some(error) = json_response.error {
            debug!("<- {} {} error {}", self.url, method, error.message);
            return Err(error.into());
        }

        let result = json_response.result.unwrap_or(serde_json::Value::Null);
        debug!("<- {} {} {}", self.url, method, result);
        Ok(result)
    }
}

// =============================================================================
// TYPED NODE CALLS
// =============================================================================

/// Typed wrapper over an endpoint; cheap to clone
#[derive(Clone)]
pub struct NodeRpc {
    endpoint: Arc<dyn RpcEndpoint>,
}

impl fmt::Debug for NodeRpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRpc")
            .field("url", &self.endpoint.url())
            .finish()
    }
}

impl NodeRpc {
    pub fn new(endpoint: Arc<dyn RpcEndpoint>) -> Self {
        Self { endpoint }
    }

    pub fn url(&self) -> String {
        self.endpoint.url()
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, RpcError> {
        let value = self.endpoint.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| RpcError::Decode(format!("{}: {}", method, e)))
    }

    pub async fn health(&self) -> Result<HealthStatus, RpcError> {
        self.call(methods::SYSTEM_HEALTH, serde_json::Value::Null).await
    }

    pub async fn node_id(&self) -> Result<String, RpcError> {
        self.call(methods::SYSTEM_NODE_ID, serde_json::Value::Null).await
    }

    pub async fn peers(&self) -> Result<Vec<String>, RpcError> {
        self.call(methods::SYSTEM_PEERS, serde_json::Value::Null).await
    }

    /// Request a graceful shutdown
    pub async fn stop(&self) -> Result<(), RpcError> {
        let _: serde_json::Value = self.call(methods::SYSTEM_STOP, serde_json::Value::Null).await?;
        Ok(())
    }

    pub async fn chain_info(&self) -> Result<ChainInfo, RpcError> {
        self.call(methods::CHAIN_GET_INFO, serde_json::Value::Null).await
    }

    pub async fn chain_tip(&self) -> Result<ChainTip, RpcError> {
        Ok(ChainTip::from(self.chain_info().await?))
    }

    pub async fn sync_phase(&self) -> Result<String, RpcError> {
        self.call(methods::SYNC_GET_PHASE, serde_json::Value::Null).await
    }

    /// Pending transaction hashes, normalized
    pub async fn pending_hashes(&self) -> Result<Vec<String>, RpcError> {
        let hashes: Vec<String> = self
            .call(methods::MEMPOOL_PENDING_HASHES, serde_json::Value::Null)
            .await?;
        Ok(hashes.iter().map(|h| normalize_hash(h)).collect())
    }

    /// Submit a raw encoded transaction, returning the hash the node assigned
    pub async fn submit_raw(&self, raw: &[u8]) -> Result<String, RpcError> {
        let result: TransactionSubmitResult = self
            .call(
                methods::AUTHOR_SUBMIT_TRANSACTION,
                serde_json::json!([format!("0x{}", hex::encode(raw))]),
            )
            .await?;
        Ok(normalize_hash(&result.hash))
    }

    /// Receipt for a transaction, `None` while the node does not know it
    pub async fn receipt(&self, hash: &str) -> Result<Option<TxReceipt>, RpcError> {
        self.call(methods::TX_GET_RECEIPT, serde_json::json!([hash])).await
    }

    /// Produce `count` blocks, returning their hashes
    pub async fn generate_blocks(&self, count: u32) -> Result<Vec<String>, RpcError> {
        self.call(methods::TEST_GENERATE_BLOCKS, serde_json::json!([count])).await
    }

    pub async fn add_peer(&self, node_id: &str, address: &str) -> Result<(), RpcError> {
        let _: serde_json::Value = self
            .call(methods::ADMIN_ADD_PEER, serde_json::json!([node_id, address]))
            .await?;
        Ok(())
    }

    pub async fn remove_peer(&self, node_id: &str) -> Result<(), RpcError> {
        let _: serde_json::Value = self
            .call(methods::ADMIN_REMOVE_PEER, serde_json::json!([node_id]))
            .await?;
        Ok(())
    }
}
