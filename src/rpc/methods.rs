// Methods - RPC method names the harness calls on a node
// The node owns their semantics; the harness only depends on these names and shapes.

/// Health check, answers once the RPC server is up
pub const SYSTEM_HEALTH: &str = "system_health";
/// Node identity (peer id)
pub const SYSTEM_NODE_ID: &str = "system_nodeId";
/// Connected peer ids
pub const SYSTEM_PEERS: &str = "system_peers";
/// Graceful shutdown
pub const SYSTEM_STOP: &str = "system_stop";

/// Chain tip and metadata
pub const CHAIN_GET_INFO: &str = "chain_getInfo";
/// Current recovery / sync phase name
pub const SYNC_GET_PHASE: &str = "sync_getPhase";

/// Hashes of pending transactions
pub const MEMPOOL_PENDING_HASHES: &str = "mempool_pendingHashes";

/// Submit a raw encoded transaction
pub const AUTHOR_SUBMIT_TRANSACTION: &str = "author_submitTransaction";
/// Receipt lookup by hash, null while unknown
pub const TX_GET_RECEIPT: &str = "tx_getReceipt";

/// Produce blocks on demand (requires unsafe RPC methods)
pub const TEST_GENERATE_BLOCKS: &str = "test_generateBlocks";

/// Ask the node to dial a peer
pub const ADMIN_ADD_PEER: &str = "admin_addPeer";
/// Ask the node to drop a peer
pub const ADMIN_REMOVE_PEER: &str = "admin_removePeer";

/// Phase a node reports once it follows the chain normally
pub const NORMAL_SYNC_PHASE: &str = "NormalSyncPhase";
