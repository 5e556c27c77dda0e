// KratOs Testnet - Entry point
// Principle: Parse, configure, run one scenario, exit with its code

use clap::Parser;
use kratos_testnet::cli::config::HarnessConfig;
use kratos_testnet::cli::{Cli, Commands, InfoCmd};
use kratos_testnet::context::{fresh_tmpdir, init_logging, LOG_FILE_NAME};
use kratos_testnet::rpc::{HttpRpcClient, NodeRpc, DEFAULT_RPC_TIMEOUT};
use kratos_testnet::runner::{TestRunner, EXIT_FAILED};
use kratos_testnet::scenarios::{scenario_by_name, SCENARIOS};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(cmd) => {
            let mut config = match HarnessConfig::from_run_cmd(&cmd) {
                Ok(config) => config,
                Err(e) => {
                    init_logging(&cli.log_level, cli.verbose, false, None);
                    error!("Configuration error: {}", e);
                    std::process::exit(EXIT_FAILED);
                }
            };

            let tmpdir = config.tmpdir.get_or_insert_with(fresh_tmpdir).clone();
            std::fs::create_dir_all(&tmpdir)?;
            init_logging(
                &cli.log_level,
                cli.verbose,
                config.trace_rpc,
                Some(&tmpdir.join(LOG_FILE_NAME)),
            );
            print_banner();

            let Some(mut test) = scenario_by_name(&config.scenario) else {
                error!(
                    "Unknown scenario {:?}, expected one of {}",
                    config.scenario,
                    SCENARIOS.join(", ")
                );
                std::process::exit(EXIT_FAILED);
            };

            let outcome = TestRunner::new(config).run(&mut *test).await;
            std::process::exit(outcome.exit_code());
        }

        Commands::Info(cmd) => {
            init_logging(&cli.log_level, cli.verbose, false, None);
            show_info(&cmd).await?;
        }

        Commands::Purge(cmd) => {
            init_logging(&cli.log_level, cli.verbose, false, None);
            let path = cmd.get_cache_dir();

            if !cmd.yes {
                println!("This will delete the chain cache at: {}", path.display());
                println!("Are you sure? [y/N]");

                let mut input = String::new();
                std::io::stdin().read_line(&mut input)?;

                if !input.trim().eq_ignore_ascii_case("y") {
                    println!("Aborted.");
                    return Ok(());
                }
            }

            if path.exists() {
                std::fs::remove_dir_all(&path)?;
                info!("🧹 Purged chain cache at: {}", path.display());
            } else {
                info!("No cache to purge at: {}", path.display());
            }
        }
    }

    Ok(())
}

/// Query a running node and print what it reports
async fn show_info(cmd: &InfoCmd) -> anyhow::Result<()> {
    info!("Querying node at {}", cmd.rpc);
    let rpc = NodeRpc::new(Arc::new(HttpRpcClient::new(&cmd.rpc, DEFAULT_RPC_TIMEOUT)?));

    let health = rpc.health().await?;
    let node_id = rpc.node_id().await?;
    let chain = rpc.chain_info().await?;
    let phase = rpc.sync_phase().await?;
    let peers = rpc.peers().await?;

    match cmd.format.as_str() {
        "json" => {
            let json = serde_json::json!({
                "nodeId": node_id,
                "health": health,
                "chain": chain,
                "syncPhase": phase,
                "peers": peers,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        "text" => {
            println!("Node ID:    {}", node_id);
            println!("Healthy:    {}", health.healthy);
            println!("Chain:      {}", chain.chain_name);
            println!("Best block: #{} ({})", chain.height, chain.best_hash);
            println!("Sync phase: {}", phase);
            println!("Peers:      {}", peers.len());
            for peer in &peers {
                println!("  {}", peer);
            }
        }
        other => return Err(anyhow::anyhow!("Unknown format: {}", other)),
    }
    Ok(())
}

/// Print the KratOs Testnet banner
fn print_banner() {
    println!(r#"
    ╔═══════════════════════════════════════════════════════════╗
    ║                                                           ║
    ║   ██╗  ██╗██████╗  █████╗ ████████╗ ██████╗ ███████╗     ║
    ║   ██║ ██╔╝██╔══██╗██╔══██╗╚══██╔══╝██╔═══██╗██╔════╝     ║
    ║   █████╔╝ ██████╔╝███████║   ██║   ██║   ██║███████╗     ║
    ║   ██╔═██╗ ██╔══██╗██╔══██║   ██║   ██║   ██║╚════██║     ║
    ║   ██║  ██╗██║  ██║██║  ██║   ██║   ╚██████╔╝███████║     ║
    ║   ╚═╝  ╚═╝╚═╝  ╚═╝╚═╝  ╚═╝   ╚═╝    ╚═════╝ ╚══════╝     ║
    ║                                                           ║
    ║                  Testnet Orchestrator                     ║
    ║                                                           ║
    ╚═══════════════════════════════════════════════════════════╝
    "#);
    println!("    Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
}
