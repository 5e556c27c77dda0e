// RPC - JSON-RPC client side of the node surface

pub mod client;
pub mod methods;
pub mod types;

// Re-export commonly used types
pub use client::{HttpRpcClient, NodeRpc, RpcEndpoint, RpcError, DEFAULT_RPC_TIMEOUT};
pub use types::{
    normalize_hash, ChainInfo, ChainTip, HealthStatus, JsonRpcError, JsonRpcId, JsonRpcRequest,
    JsonRpcResponse, TransactionSubmitResult, TxReceipt,
};
