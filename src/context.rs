// Run Context - Process-scoped state for one test run
// Principle: Ports, randomness and log sinks are owned by the run, never global

use crate::cli::config::{ConfigError, HarnessConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Highest number of nodes a single run may allocate ports for
pub const MAX_NODES: usize = 64;
/// Width of the port window; RPC ports sit one window above P2P ports
pub const PORT_RANGE: u32 = 5000;
/// Harness log file inside the run tmpdir
pub const LOG_FILE_NAME: &str = "test_framework.log";

/// Deterministic port allocation so parallel runs with different seeds do not collide
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    port_min: u16,
    port_seed: u32,
}

impl PortAllocator {
    pub fn new(port_min: u16, port_seed: u32) -> Result<Self, ConfigError> {
        let allocator = Self { port_min, port_seed };
        // The highest port handed out must still fit
        allocator.rpc_port(MAX_NODES - 1)?;
        Ok(allocator)
    }

    fn offset(&self) -> u32 {
        let window = PORT_RANGE - 1 - MAX_NODES as u32;
        ((MAX_NODES as u64 * self.port_seed as u64) % window as u64) as u32
    }

    fn port(&self, base: u32, n: usize) -> Result<u16, ConfigError> {
        if n >= MAX_NODES {
            return Err(ConfigError::InvalidPortRange(format!(
                "node index {} exceeds the maximum of {} nodes",
                n, MAX_NODES
            )));
        }
        let port = base + n as u32 + self.offset();
        u16::try_from(port).map_err(|_| {
            ConfigError::InvalidPortRange(format!(
                "port {} out of range (port_min {}, seed {})",
                port, self.port_min, self.port_seed
            ))
        })
    }

    /// P2P port of node `n`
    pub fn p2p_port(&self, n: usize) -> Result<u16, ConfigError> {
        self.port(self.port_min as u32, n)
    }

    /// RPC port of node `n`
    pub fn rpc_port(&self, n: usize) -> Result<u16, ConfigError> {
        self.port(self.port_min as u32 + PORT_RANGE, n)
    }
}

/// Everything the run shares between components
#[derive(Debug)]
pub struct RunContext {
    pub tmpdir: PathBuf,
    pub cachedir: PathBuf,
    pub ports: PortAllocator,
    /// Seeded once per run so chaos decisions are reproducible
    pub rng: StdRng,
    pub random_seed: u64,
    pub trace_rpc: bool,
}

impl RunContext {
    /// Build the context, creating the tmpdir if needed
    pub fn new(config: &HarnessConfig) -> Result<Self, ConfigError> {
        let tmpdir = match config.tmpdir {
            Some(ref dir) => dir.clone(),
            None => fresh_tmpdir(),
        };
        std::fs::create_dir_all(&tmpdir)
            .map_err(|e| ConfigError::InvalidValue(format!("cannot create {}: {}", tmpdir.display(), e)))?;

        Ok(Self {
            tmpdir,
            cachedir: config.cachedir.clone(),
            ports: PortAllocator::new(config.port_min, config.port_seed)?,
            rng: StdRng::seed_from_u64(config.random_seed),
            random_seed: config.random_seed,
            trace_rpc: config.trace_rpc,
        })
    }

    /// Data directory of node `n`
    pub fn node_dir(&self, n: usize) -> PathBuf {
        self.tmpdir.join(format!("node{}", n))
    }

    /// Cached snapshot of node `n`
    pub fn cache_node_dir(&self, n: usize) -> PathBuf {
        self.cachedir.join(format!("node{}", n))
    }

    pub fn log_file(&self) -> PathBuf {
        self.tmpdir.join(LOG_FILE_NAME)
    }
}

/// Unique run directory under the system temp dir
pub fn fresh_tmpdir() -> PathBuf {
    let suffix: u32 = rand::random();
    std::env::temp_dir().join(format!("kratos_testnet_{}_{:08x}", std::process::id(), suffix))
}

// =============================================================================
// LOGGING
// =============================================================================

/// Install the global subscriber: stdout plus an optional log file.
///
/// `--trace-rpc` adds a debug directive for the RPC client regardless of level.
/// Returns false when a subscriber was already installed.
pub fn init_logging(level: &str, verbose: bool, trace_rpc: bool, log_file: Option<&Path>) -> bool {
    let level = if verbose { "debug" } else { level };
    let build_filter = || {
        let mut filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        if trace_rpc {
            if let Ok(directive) = "kratos_testnet::rpc=debug".parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    };

    let stdout_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_filter(build_filter());

    let file_layer = log_file.and_then(|path| File::create(path).ok()).map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .with_filter(build_filter())
    });

    let installed = tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        if let Some(path) = log_file {
            info!("📁 Harness log: {}", path.display());
        }
    }
    installed
}
