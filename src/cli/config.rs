// CLI Configuration - Convert CLI args to harness config
// Principle: Clear mapping between user input and internal configuration

use crate::cli::{default_cache_dir, RunCmd};
use crate::node::options::NodeOptionKey;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Complete harness configuration derived from CLI arguments and the optional config file
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Scenario name
    pub scenario: String,
    /// Node count override
    pub num_nodes: Option<usize>,
    /// kratos-node binary
    pub node_binary: PathBuf,
    /// Run root; a fresh directory is created when not set
    pub tmpdir: Option<PathBuf>,
    /// Pregenerated chain cache
    pub cachedir: PathBuf,
    pub no_cleanup: bool,
    pub no_shutdown: bool,
    pub trace_rpc: bool,
    pub pause_on_failure: bool,
    pub port_seed: u32,
    pub port_min: u16,
    pub random_seed: u64,
    /// Node option overrides applied to every node, in order
    pub node_overrides: Vec<(String, String)>,
    pub timeouts: Timeouts,
}

/// Every timeout the harness waits on
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Per-call RPC timeout
    pub rpc: Duration,
    /// Node readiness (RPC up, identity known)
    pub start: Duration,
    /// Recovery phase after readiness
    pub phase: Duration,
    /// Block and mempool sync barriers
    pub sync: Duration,
    /// Process exit after a stop request
    pub stop: Duration,
    /// Readiness after a chaos restart, which may replay a lot of chain
    pub restart: Duration,
    /// Peer handshake over the wire protocol
    pub handshake: Duration,
    /// Waiting for two nodes to list each other as peers
    pub peering: Duration,
    /// Sleep between polls
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            rpc: Duration::from_secs(60),
            start: Duration::from_secs(60),
            phase: Duration::from_secs(10),
            sync: Duration::from_secs(60),
            stop: Duration::from_secs(60),
            restart: Duration::from_secs(300),
            handshake: Duration::from_secs(10),
            peering: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            scenario: "smoke".to_string(),
            num_nodes: None,
            node_binary: PathBuf::from("kratos-node"),
            tmpdir: None,
            cachedir: default_cache_dir(),
            no_cleanup: false,
            no_shutdown: false,
            trace_rpc: false,
            pause_on_failure: false,
            port_seed: std::process::id(),
            port_min: 11000,
            random_seed: 0,
            node_overrides: vec![],
            timeouts: Timeouts::default(),
        }
    }
}

/// Harness config file format
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HarnessFile {
    pub node_binary: Option<PathBuf>,
    pub cachedir: Option<PathBuf>,
    pub start_timeout_secs: Option<u64>,
    pub sync_timeout_secs: Option<u64>,
    pub rpc_timeout_secs: Option<u64>,
    pub stop_timeout_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    /// Overrides applied before the ones from the command line
    pub node_options: BTreeMap<String, toml::Value>,
}

impl HarnessFile {
    /// Load configuration from TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ConfigFileRead(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content).map_err(|e| ConfigError::ConfigFileParse(e.to_string()))
    }
}

impl HarnessConfig {
    /// Create configuration from CLI run command
    pub fn from_run_cmd(cmd: &RunCmd) -> Result<Self, ConfigError> {
        let file = match cmd.config {
            Some(ref path) => HarnessFile::load(path)?,
            None => HarnessFile::default(),
        };

        let mut config = Self {
            scenario: cmd.scenario.clone(),
            num_nodes: cmd.nodes,
            tmpdir: cmd.tmpdir.clone(),
            no_cleanup: cmd.nocleanup,
            no_shutdown: cmd.noshutdown,
            trace_rpc: cmd.trace_rpc,
            pause_on_failure: cmd.pause_on_failure,
            port_seed: cmd.port_seed.unwrap_or_else(std::process::id),
            port_min: cmd.port_min,
            random_seed: cmd.random_seed.unwrap_or_else(rand::random),
            ..Self::default()
        };

        // Command line wins over the file
        if let Some(binary) = cmd.node_binary.clone().or(file.node_binary) {
            config.node_binary = binary;
        }
        config.cachedir = cmd
            .cachedir
            .clone()
            .or(file.cachedir)
            .unwrap_or_else(default_cache_dir);

        let t = &mut config.timeouts;
        if let Some(secs) = cmd.start_timeout.or(file.start_timeout_secs) {
            t.start = Duration::from_secs(secs);
        }
        if let Some(secs) = cmd.sync_timeout.or(file.sync_timeout_secs) {
            t.sync = Duration::from_secs(secs);
        }
        if let Some(secs) = cmd.rpc_timeout.or(file.rpc_timeout_secs) {
            t.rpc = Duration::from_secs(secs);
        }
        if let Some(secs) = file.stop_timeout_secs {
            t.stop = Duration::from_secs(secs);
        }
        if let Some(ms) = file.poll_interval_ms {
            t.poll_interval = Duration::from_millis(ms);
        }

        for (key, value) in file.node_options {
            let value = match value {
                toml::Value::String(s) => s,
                other => other.to_string(),
            };
            config.node_overrides.push((key, value));
        }
        for raw in &cmd.node_options {
            config.node_overrides.push(parse_override(raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_nodes == Some(0) {
            return Err(ConfigError::InvalidValue("--nodes must be at least 1".to_string()));
        }
        if self.timeouts.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue("poll interval must be non-zero".to_string()));
        }
        if self.timeouts.rpc.is_zero() || self.timeouts.start.is_zero() {
            return Err(ConfigError::InvalidValue("timeouts must be non-zero".to_string()));
        }
        for (key, _) in &self.node_overrides {
            NodeOptionKey::from_str(key)?;
        }
        Ok(())
    }
}

/// Parse a `KEY=VALUE` node option override
fn parse_override(raw: &str) -> Result<(String, String), ConfigError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::InvalidValue(format!("expected KEY=VALUE, got {:?}", raw)))?;
    let key = key.trim();
    NodeOptionKey::from_str(key)?;
    Ok((key.to_string(), value.trim().to_string()))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ConfigFileRead(String),

    #[error("Failed to parse config file: {0}")]
    ConfigFileParse(String),

    #[error("Unknown node option: {0}")]
    UnknownNodeOption(String),

    #[error("Invalid value {value:?} for node option {key}")]
    InvalidNodeOptionValue { key: String, value: String },

    #[error("Invalid sync mode: {0}")]
    InvalidSyncMode(String),

    #[error("Invalid pruning mode: {0}")]
    InvalidPruningMode(String),

    #[error("Invalid port allocation: {0}")]
    InvalidPortRange(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl From<ConfigError> for crate::error::HarnessError {
    fn from(e: ConfigError) -> Self {
        crate::error::HarnessError::Config(e.to_string())
    }
}
