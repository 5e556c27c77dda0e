// Network - Harness-owned peer sessions over the node wire protocol
// Principle: One engine task, many sessions, reached only through channels

pub mod engine;
pub mod protocol;
pub mod session;

pub use engine::{EngineConfig, NetworkEngine};
pub use protocol::{Capability, Hello, PeerFrame, ProtocolError, RawTransaction, MAX_FRAME_SIZE, PROTOCOL_VERSION};
pub use session::{SessionHandle, SessionId, SessionState, SessionSummary};
