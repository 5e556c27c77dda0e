// Errors - Failure taxonomy for test orchestration
// Principle: Anything that crosses a timeout boundary surfaces as a typed, named failure

use crate::network::protocol::ProtocolError;
use crate::node::state::NodeState;
use crate::rpc::client::RpcError;
use std::time::Duration;

/// Result type for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Every failure a test run can end with
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Node never became reachable or never reached the required phase
    #[error("Node {node} startup timed out after {timeout:?} while waiting for {stage}")]
    StartupTimeout {
        node: usize,
        stage: String,
        timeout: Duration,
    },

    /// Cluster never agreed on tips or mempools
    #[error("{what} sync timed out after {timeout:?}; observed: {observed}")]
    SyncTimeout {
        what: &'static str,
        timeout: Duration,
        observed: String,
    },

    /// Transient send failure, recovered locally when possible
    #[error("Transport error (retryable): {0}")]
    TransportRetryable(String),

    /// Transaction never located after poll/rebroadcast attempts
    #[error("Tx {tx} not confirmed after {attempts} attempts")]
    ConfirmationExhausted { tx: String, attempts: u32 },

    /// Receipt outcome was not the success sentinel
    #[error("Receipt states the execution failed: tx {tx}, outcome status {status}")]
    OutcomeMismatch { tx: String, status: u64 },

    /// Node process exited unexpectedly
    #[error("Node {node} process exited unexpectedly (exit code {code:?})")]
    ProcessCrash { node: usize, code: Option<i32> },

    /// Operation needs a live process but the node has none
    #[error("Node {0} is not running")]
    NodeNotRunning(usize),

    /// Node stderr did not match what the test expected
    #[error("Node {node} unexpected stderr: expected {expected:?}, got {actual:?}")]
    UnexpectedStderr {
        node: usize,
        expected: String,
        actual: String,
    },

    /// Node process did not exit in time after a stop request
    #[error("Node {node} did not exit within {timeout:?}")]
    ShutdownTimeout { node: usize, timeout: Duration },

    /// Lifecycle transition not allowed by the state machine
    #[error("Node {node}: invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        node: usize,
        from: NodeState,
        to: NodeState,
    },

    /// Peer session could not be established
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Test body assertion
    #[error("Assertion failed: {0}")]
    Assertion(String),

    /// Explicit skip request from a test
    #[error("Test skipped: {0}")]
    Skip(String),
}

impl HarnessError {
    /// Whether a caller may retry the failed call after a short backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            HarnessError::TransportRetryable(_) => true,
            HarnessError::Rpc(e) => e.is_transport(),
            _ => false,
        }
    }
}

/// Fail the test with an assertion error unless `left == right`
pub fn assert_equal<T: PartialEq + std::fmt::Debug>(left: T, right: T) -> Result<()> {
    if left == right {
        Ok(())
    } else {
        Err(HarnessError::Assertion(format!("{:?} != {:?}", left, right)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(HarnessError::TransportRetryable("busy".into()).is_retryable());
        assert!(HarnessError::Rpc(RpcError::Transport("refused".into())).is_retryable());
        assert!(!HarnessError::Rpc(RpcError::Remote {
            code: -32601,
            message: "nope".into()
        })
        .is_retryable());
        assert!(!HarnessError::Skip("later".into()).is_retryable());
    }

    #[test]
    fn test_assert_equal() {
        assert!(assert_equal(3, 3).is_ok());
        let err = assert_equal("a", "b").unwrap_err();
        assert!(err.to_string().contains("\"a\" != \"b\""));
    }
}
