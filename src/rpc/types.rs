// Types RPC - JSON-RPC 2.0 envelopes and the node views the harness reads
use serde::{Deserialize, Serialize};

// =============================================================================
// ENVELOPES
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    pub id: JsonRpcId,
}

impl JsonRpcRequest {
    pub fn new(method: &str, params: serde_json::Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: JsonRpcId::Number(id as i64),
        }
    }
}

/// Exactly one of `result` and `error` is set by a well-behaved node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: JsonRpcId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum JsonRpcId {
    Number(i64),
    String(String),
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

// Node side of the envelope, only needed by the fake nodes in tests
#[cfg(test)]
impl JsonRpcResponse {
    pub fn success(id: JsonRpcId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: JsonRpcId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

#[cfg(test)]
impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn unknown_method(method: &str) -> Self {
        Self::new(-32601, format!("Method not found: {}", method))
    }

    pub fn bad_params(message: &str) -> Self {
        Self::new(-32602, format!("Invalid params: {}", message))
    }
}

// =============================================================================
// NODE VIEWS
// =============================================================================

/// Chain information as reported by `chain_getInfo`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    /// Chain name
    #[serde(default)]
    pub chain_name: String,
    /// Current height
    pub height: u64,
    /// Best block hash
    pub best_hash: String,
    /// Genesis hash
    #[serde(default)]
    pub genesis_hash: String,
    /// Is synced
    #[serde(default)]
    pub is_synced: bool,
}

/// A node's latest confirmed chain position
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainTip {
    pub height: u64,
    pub hash: String,
}

impl From<ChainInfo> for ChainTip {
    fn from(info: ChainInfo) -> Self {
        Self {
            height: info.height,
            hash: info.best_hash,
        }
    }
}

impl std::fmt::Display for ChainTip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.height, self.hash)
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    /// Is healthy
    pub healthy: bool,
    /// Is synced
    #[serde(default)]
    pub is_synced: bool,
    /// Peer count
    #[serde(default)]
    pub peer_count: usize,
}

/// Transaction receipt as reported by `tx_getReceipt`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    /// Transaction hash
    pub transaction_hash: String,
    /// Block that included the transaction
    pub block_hash: String,
    /// Height of that block
    #[serde(default)]
    pub block_number: u64,
    /// Execution outcome, 0 on success
    pub outcome_status: u64,
}

impl TxReceipt {
    /// Success sentinel for `outcome_status`
    pub const OUTCOME_SUCCESS: u64 = 0;

    pub fn succeeded(&self) -> bool {
        self.outcome_status == Self::OUTCOME_SUCCESS
    }
}

/// Result of a transaction submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSubmitResult {
    pub hash: String,
}

/// Normalize a hex hash to lowercase with a 0x prefix
pub fn normalize_hash(hash: &str) -> String {
    let stripped = hash.strip_prefix("0x").unwrap_or(hash);
    format!("0x{}", stripped.to_ascii_lowercase())
}
