// CLI - Command Line Interface for the KratOs test harness
// Principle: Simple, clear, composable commands

pub mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// KratOs Testnet - End-to-end test orchestration for kratos-node clusters
#[derive(Parser, Debug)]
#[command(name = "kratos-testnet")]
#[command(author = "KratOs Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Drive end-to-end tests against a local cluster of kratos-node processes")]
#[command(long_about = r#"
kratos-testnet spawns a small local cluster of kratos-node processes, wires
their peer topology, and runs a test scenario against them.

Exit codes:
  0   test passed
  1   test failed
  77  test skipped

Run the smoke scenario on 3 nodes:
  kratos-testnet run smoke --nodes 3 --node-binary ./target/release/kratos-node

Keep the nodes alive after a run for inspection:
  kratos-testnet run partition --noshutdown
"#)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true, default_value = "false")]
    pub verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", env = "KRATOS_TESTNET_LOG")]
    pub log_level: String,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a test scenario against a fresh cluster
    Run(RunCmd),

    /// Show information about a running node
    Info(InfoCmd),

    /// Purge the pregenerated chain cache
    Purge(PurgeCmd),
}

/// Run a test scenario
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Scenario to run (smoke, partition, chaos, p2p)
    #[arg(default_value = "smoke")]
    pub scenario: String,

    /// Number of nodes (overrides the scenario default)
    #[arg(long)]
    pub nodes: Option<usize>,

    /// Path to the kratos-node binary (default: kratos-node from PATH)
    #[arg(long, env = "KRATOS_NODE_BINARY")]
    pub node_binary: Option<PathBuf>,

    /// Root directory for node datadirs and logs (fresh temp dir if not set)
    #[arg(long)]
    pub tmpdir: Option<PathBuf>,

    /// Directory holding pregenerated node<i> datadirs
    #[arg(long, env = "KRATOS_TESTNET_CACHE")]
    pub cachedir: Option<PathBuf>,

    /// Leave the tmpdir in place when the run ends
    #[arg(long)]
    pub nocleanup: bool,

    /// Leave the nodes running when the run ends (implies nocleanup)
    #[arg(long)]
    pub noshutdown: bool,

    /// Log every JSON-RPC request and response
    #[arg(long)]
    pub trace_rpc: bool,

    /// Seed for port allocation, to run several tests in parallel (default: pid)
    #[arg(long)]
    pub port_seed: Option<u32>,

    /// Lowest port handed out to nodes
    #[arg(long, default_value = "11000")]
    pub port_min: u16,

    /// Seed for random choices made by scenarios
    #[arg(long)]
    pub random_seed: Option<u64>,

    /// Wait for a keypress before teardown when the test failed
    #[arg(long)]
    pub pause_on_failure: bool,

    /// TOML file with harness settings and node option overrides
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Node option override, KEY=VALUE (can be specified multiple times)
    #[arg(long = "node-option", value_name = "KEY=VALUE")]
    pub node_options: Vec<String>,

    /// Startup timeout per node (seconds)
    #[arg(long)]
    pub start_timeout: Option<u64>,

    /// Timeout for block/mempool sync barriers (seconds)
    #[arg(long)]
    pub sync_timeout: Option<u64>,

    /// Per-call RPC timeout (seconds)
    #[arg(long)]
    pub rpc_timeout: Option<u64>,
}

/// Show node info
#[derive(Parser, Debug)]
pub struct InfoCmd {
    /// RPC endpoint to query
    #[arg(long, default_value = "http://127.0.0.1:16000")]
    pub rpc: String,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Purge the chain cache
#[derive(Parser, Debug)]
pub struct PurgeCmd {
    /// Cache directory to purge
    #[arg(long)]
    pub cachedir: Option<PathBuf>,

    /// Skip confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

/// Default location of the pregenerated chain cache
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("kratos-testnet")
        .join("cache")
}

impl PurgeCmd {
    /// Get the cache directory to purge
    pub fn get_cache_dir(&self) -> PathBuf {
        self.cachedir.clone().unwrap_or_else(default_cache_dir)
    }
}
