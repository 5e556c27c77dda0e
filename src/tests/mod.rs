// Tests module
// Controller scenarios against fake nodes: a shell-script process, in-memory or
// HTTP JSON-RPC, and a TCP peer speaking the wire protocol

pub mod support;

pub mod lifecycle;
pub mod runner_outcome;
pub mod topology;
