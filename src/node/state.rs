// Node State - Lifecycle state machine of a test node
// Principle: Monotonic within an epoch; a new start opens a new epoch

use std::fmt;

/// Lifecycle state of a test node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No process
    Stopped,
    /// Process spawned, RPC not answering yet
    Starting,
    /// RPC up, waiting for a declared recovery phase
    Recovering,
    /// Ready for test traffic
    Running,
    /// Stop requested, process not reaped yet
    Stopping,
    /// Process exited or stopped answering unexpectedly
    Crashed,
}

impl NodeState {
    /// Whether `self -> to` is allowed
    pub fn can_transition(self, to: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, to),
            (Stopped, Starting)
                | (Crashed, Starting)
                | (Starting, Recovering)
                | (Starting, Running)
                | (Starting, Crashed)
                | (Recovering, Running)
                | (Recovering, Crashed)
                | (Running, Stopping)
                | (Running, Crashed)
                | (Stopping, Stopped)
                | (Crashed, Stopped)
        )
    }

    /// States in which the process is expected to be alive
    pub fn expects_process(self) -> bool {
        matches!(
            self,
            NodeState::Starting | NodeState::Recovering | NodeState::Running
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Stopped => "stopped",
            NodeState::Starting => "starting",
            NodeState::Recovering => "recovering",
            NodeState::Running => "running",
            NodeState::Stopping => "stopping",
            NodeState::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// State plus epoch counter
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: NodeState,
    /// Incremented on every entry into `Starting`; 0 = never started
    epoch: u64,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: NodeState::Stopped,
            epoch: 0,
        }
    }
}

impl Lifecycle {
    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Move to `to`, or report the rejected pair
    pub fn transition(&mut self, to: NodeState) -> Result<(), (NodeState, NodeState)> {
        if !self.state.can_transition(to) {
            return Err((self.state, to));
        }
        if to == NodeState::Starting {
            self.epoch += 1;
        }
        self.state = to;
        Ok(())
    }
}
