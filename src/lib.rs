// KratOs Testnet - End-to-end test orchestration for kratos-node clusters
// Principle: Nodes are opaque processes; every wait is bounded and every failure is typed

pub mod cli;
pub mod cluster;
pub mod confirm;
pub mod context;
pub mod error;
pub mod network;
pub mod node;
pub mod process;
pub mod retry;
pub mod rpc;
pub mod runner;
pub mod scenarios;

#[cfg(test)]
mod tests;

pub use cluster::{ClusterConfig, ClusterController, ClusterTopology};
pub use confirm::{ConfirmationPolicy, PendingTx, TxConfirmationService, TxOutcome};
pub use context::RunContext;
pub use error::{HarnessError, Result};
pub use node::{NodeState, TestNode};
pub use runner::{RunOutcome, TestCase, TestParams, TestRunner};
