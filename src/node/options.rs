// Node Options - Typed command line for one kratos-node process
// Principle: Recognized options are enumerated and validated when set, not when the node parses them

use crate::cli::config::ConfigError;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Sync modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Full sync - download and verify all blocks
    Full,
    /// Light client - only headers and proofs
    Light,
    /// Warp sync - download finalized state then sync recent blocks
    Warp,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Light => "light",
            SyncMode::Warp => "warp",
        }
    }
}

impl FromStr for SyncMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(SyncMode::Full),
            "light" => Ok(SyncMode::Light),
            "warp" => Ok(SyncMode::Warp),
            _ => Err(ConfigError::InvalidSyncMode(s.to_string())),
        }
    }
}

/// Pruning modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruningMode {
    /// Keep all historical state
    Archive,
    /// Keep last N blocks of state
    Blocks(u32),
}

impl PruningMode {
    pub fn to_arg(&self) -> String {
        match self {
            PruningMode::Archive => "archive".to_string(),
            PruningMode::Blocks(n) => n.to_string(),
        }
    }
}

impl FromStr for PruningMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "archive" => Ok(PruningMode::Archive),
            n => n
                .parse::<u32>()
                .map(PruningMode::Blocks)
                .map_err(|_| ConfigError::InvalidPruningMode(s.to_string())),
        }
    }
}

/// Option keys a test may override; anything else is rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOptionKey {
    Chain,
    Name,
    MaxPeers,
    Validator,
    ValidatorKey,
    Genesis,
    Sync,
    Pruning,
    DbCache,
    LogLevel,
    PrometheusPort,
    RpcMethodsUnsafe,
}

impl NodeOptionKey {
    pub const ALL: [NodeOptionKey; 12] = [
        NodeOptionKey::Chain,
        NodeOptionKey::Name,
        NodeOptionKey::MaxPeers,
        NodeOptionKey::Validator,
        NodeOptionKey::ValidatorKey,
        NodeOptionKey::Genesis,
        NodeOptionKey::Sync,
        NodeOptionKey::Pruning,
        NodeOptionKey::DbCache,
        NodeOptionKey::LogLevel,
        NodeOptionKey::PrometheusPort,
        NodeOptionKey::RpcMethodsUnsafe,
    ];

    /// Name as written in config files (snake_case)
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeOptionKey::Chain => "chain",
            NodeOptionKey::Name => "name",
            NodeOptionKey::MaxPeers => "max_peers",
            NodeOptionKey::Validator => "validator",
            NodeOptionKey::ValidatorKey => "validator_key",
            NodeOptionKey::Genesis => "genesis",
            NodeOptionKey::Sync => "sync",
            NodeOptionKey::Pruning => "pruning",
            NodeOptionKey::DbCache => "db_cache",
            NodeOptionKey::LogLevel => "log_level",
            NodeOptionKey::PrometheusPort => "prometheus_port",
            NodeOptionKey::RpcMethodsUnsafe => "rpc_methods_unsafe",
        }
    }
}

impl FromStr for NodeOptionKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim_start_matches("--").replace('-', "_");
        NodeOptionKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| ConfigError::UnknownNodeOption(s.to_string()))
    }
}

/// Everything needed to build the `kratos-node run` command line
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Base path for chain data
    pub base_path: PathBuf,
    /// Chain specification
    pub chain: String,
    /// Node name for telemetry
    pub name: String,
    /// P2P listen port
    pub port: u16,
    /// RPC listen port
    pub rpc_port: u16,
    /// Bootstrap nodes
    pub bootnodes: Vec<String>,
    /// Maximum number of peers
    pub max_peers: u32,
    /// Enable block production
    pub validator: bool,
    /// Validator key file
    pub validator_key: Option<PathBuf>,
    /// Create a new network
    pub genesis: bool,
    pub sync: SyncMode,
    pub pruning: PruningMode,
    /// Database cache size in MB
    pub db_cache: u32,
    pub log_level: String,
    /// Prometheus metrics port (0 to disable)
    pub prometheus_port: u16,
    /// Block generation on demand needs unsafe methods
    pub rpc_methods_unsafe: bool,
}

impl NodeOptions {
    /// Defaults for node `index` of a test cluster
    pub fn for_node(index: usize, base_path: &Path, port: u16, rpc_port: u16) -> Self {
        Self {
            base_path: base_path.to_path_buf(),
            chain: "kratos".to_string(),
            name: format!("test-node-{}", index),
            port,
            rpc_port,
            bootnodes: vec![],
            max_peers: 50,
            validator: false,
            validator_key: None,
            genesis: index == 0,
            sync: SyncMode::Full,
            pruning: PruningMode::Archive,
            db_cache: 32,
            log_level: "info".to_string(),
            prometheus_port: 0,
            rpc_methods_unsafe: true,
        }
    }

    /// Apply one override, validating key and value
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let key = NodeOptionKey::from_str(key)?;
        let invalid = || ConfigError::InvalidNodeOptionValue {
            key: key.as_str().to_string(),
            value: value.to_string(),
        };

        match key {
            NodeOptionKey::Chain => self.chain = value.to_string(),
            NodeOptionKey::Name => self.name = value.to_string(),
            NodeOptionKey::MaxPeers => self.max_peers = value.parse().map_err(|_| invalid())?,
            NodeOptionKey::Validator => self.validator = parse_bool(value).ok_or_else(invalid)?,
            NodeOptionKey::ValidatorKey => self.validator_key = Some(PathBuf::from(value)),
            NodeOptionKey::Genesis => self.genesis = parse_bool(value).ok_or_else(invalid)?,
            NodeOptionKey::Sync => self.sync = value.parse()?,
            NodeOptionKey::Pruning => self.pruning = value.parse()?,
            NodeOptionKey::DbCache => self.db_cache = value.parse().map_err(|_| invalid())?,
            NodeOptionKey::LogLevel => self.log_level = value.to_string(),
            NodeOptionKey::PrometheusPort => {
                self.prometheus_port = value.parse().map_err(|_| invalid())?
            }
            NodeOptionKey::RpcMethodsUnsafe => {
                self.rpc_methods_unsafe = parse_bool(value).ok_or_else(invalid)?
            }
        }

        if self.validator_key.is_some() && !self.validator {
            // --validator-key requires --validator on the node side
            self.validator = true;
        }

        Ok(())
    }

    /// Apply a list of overrides in order
    pub fn apply_overrides(&mut self, overrides: &[(String, String)]) -> Result<(), ConfigError> {
        for (key, value) in overrides {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// JSON-RPC URL of this node
    pub fn rpc_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.rpc_port)
    }

    /// Socket the harness dials for peer sessions
    pub fn p2p_socket(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.port))
    }

    /// Multiaddr other nodes dial
    pub fn p2p_multiaddr(&self) -> String {
        format!("/ip4/127.0.0.1/tcp/{}", self.port)
    }

    /// Command line: valued options as `--name value`, booleans as bare flags when set
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string()];

        let mut push = |name: &str, value: String| {
            args.push(format!("--{}", name));
            args.push(value);
        };

        push("base-path", self.base_path.display().to_string());
        push("chain", self.chain.clone());
        push("name", self.name.clone());
        push("port", self.port.to_string());
        push("rpc-port", self.rpc_port.to_string());
        push("rpc-addr", "127.0.0.1".to_string());
        push("max-peers", self.max_peers.to_string());
        push("sync", self.sync.as_str().to_string());
        push("pruning", self.pruning.to_arg());
        push("db-cache", self.db_cache.to_string());
        push("log-level", self.log_level.clone());
        push("prometheus-port", self.prometheus_port.to_string());
        for bootnode in &self.bootnodes {
            push("bootnode", bootnode.clone());
        }
        if let Some(ref key) = self.validator_key {
            push("validator-key", key.display().to_string());
        }

        if self.validator {
            args.push("--validator".to_string());
        }
        if self.genesis {
            args.push("--genesis".to_string());
        }
        if self.rpc_methods_unsafe {
            args.push("--rpc-methods-unsafe".to_string());
        }

        args
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
