// Node - One kratos-node process under test
pub mod options;
pub mod state;
pub mod test_node;

pub use options::{NodeOptionKey, NodeOptions, PruningMode, SyncMode};
pub use state::{Lifecycle, NodeState};
pub use test_node::TestNode;
