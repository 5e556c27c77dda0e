// Runner - Setup, topology, body and teardown of one test run
// Principle: One evaluation point for the outcome; teardown always runs

use crate::cli::config::HarnessConfig;
use crate::cluster::{ClusterConfig, ClusterController, ClusterTopology};
use crate::context::RunContext;
use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::io::AsyncBufReadExt;
use tracing::{error, info, warn};

pub const EXIT_PASSED: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
/// Conventional "skipped" code for test drivers
pub const EXIT_SKIPPED: i32 = 77;

/// Final state of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Passed,
    Failed(String),
    Skipped(String),
}

impl RunOutcome {
    /// Map the combined setup/body result to an outcome
    pub fn evaluate(result: &Result<()>) -> Self {
        match result {
            Ok(()) => RunOutcome::Passed,
            Err(HarnessError::Skip(reason)) => RunOutcome::Skipped(reason.clone()),
            Err(e) => RunOutcome::Failed(e.to_string()),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Passed => EXIT_PASSED,
            RunOutcome::Failed(_) => EXIT_FAILED,
            RunOutcome::Skipped(_) => EXIT_SKIPPED,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed(_))
    }
}

/// Per-test knobs
#[derive(Debug, Clone)]
pub struct TestParams {
    pub num_nodes: usize,
    /// Start from empty datadirs instead of the cached chain
    pub setup_clean_chain: bool,
    /// Node option overrides for this test only
    pub node_overrides: Vec<(String, String)>,
}

impl Default for TestParams {
    fn default() -> Self {
        Self {
            num_nodes: 4,
            setup_clean_chain: false,
            node_overrides: vec![],
        }
    }
}

/// A test body plus its setup hooks
#[async_trait]
pub trait TestCase: Send {
    fn name(&self) -> &str;

    fn params(&self) -> TestParams {
        TestParams::default()
    }

    async fn setup_chain(&mut self, cluster: &mut ClusterController, params: &TestParams) -> Result<()> {
        cluster.initialize_chain(params.setup_clean_chain)
    }

    /// Start every node, wire the chain topology and wait for block sync
    async fn setup_network(&mut self, cluster: &mut ClusterController) -> Result<()> {
        cluster.start_all().await?;
        let topology = ClusterTopology::chain(cluster.len());
        cluster.wire(&topology).await?;
        cluster.sync_all().await?;
        Ok(())
    }

    async fn run(&mut self, cluster: &mut ClusterController) -> Result<()>;
}

type PauseHook = Box<dyn FnMut(&ClusterController) + Send>;

/// Drives one `TestCase` from setup to exit code
pub struct TestRunner {
    config: HarnessConfig,
    pause_hook: Option<PauseHook>,
}

impl TestRunner {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            pause_hook: None,
        }
    }

    /// Replace the interactive pause used with `pause_on_failure`
    pub fn with_pause_hook<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&ClusterController) + Send + 'static,
    {
        self.pause_hook = Some(Box::new(hook));
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub async fn run(&mut self, test: &mut dyn TestCase) -> RunOutcome {
        let ctx = match RunContext::new(&self.config) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("Cannot set up the run: {}", e);
                return RunOutcome::Failed(e.to_string());
            }
        };
        info!("📁 Run directory: {}", ctx.tmpdir.display());
        info!("🎲 Random seed: {}", ctx.random_seed);

        let mut cluster = ClusterController::new(ctx, ClusterConfig::from_harness(&self.config));
        let result = match AssertUnwindSafe(self.execute(test, &mut cluster)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(HarnessError::Assertion(format!("test panicked: {}", panic_message(&*payload)))),
        };
        let outcome = RunOutcome::evaluate(&result);

        match result {
            Ok(()) => info!("✅ Test {} passed", test.name()),
            Err(HarnessError::Skip(ref reason)) => warn!("⚠️ Test {} skipped: {}", test.name(), reason),
            Err(ref e) => error!("Test {} failed: {:?}", test.name(), e),
        }

        if outcome.is_failed() && self.config.pause_on_failure {
            match self.pause_hook.as_mut() {
                Some(hook) => hook(&cluster),
                None => wait_for_enter(&cluster).await,
            }
        }

        self.teardown(cluster, outcome).await
    }

    async fn execute(&self, test: &mut dyn TestCase, cluster: &mut ClusterController) -> Result<()> {
        let mut params = test.params();
        if let Some(n) = self.config.num_nodes {
            params.num_nodes = n;
        }

        cluster.add_nodes(params.num_nodes, &params.node_overrides)?;
        test.setup_chain(cluster, &params).await?;
        test.setup_network(cluster).await?;

        info!("🚀 Running {} on {} nodes", test.name(), params.num_nodes);
        test.run(cluster).await
    }

    async fn teardown(&self, mut cluster: ClusterController, mut outcome: RunOutcome) -> RunOutcome {
        cluster.close().await;

        if self.config.no_shutdown {
            cluster.keep_nodes_running();
            info!("Nodes left running (no shutdown)");
        } else if let Err(e) = cluster.stop_all().await {
            error!("🛑 Stopping nodes failed: {}", e);
            if outcome == RunOutcome::Passed {
                outcome = RunOutcome::Failed(e.to_string());
            }
        }

        let tmpdir = cluster.ctx().tmpdir.clone();
        drop(cluster);

        let cleanup = !self.config.no_cleanup && !self.config.no_shutdown && !outcome.is_failed();
        if cleanup {
            info!("🧹 Cleaning up {}", tmpdir.display());
            if let Err(e) = std::fs::remove_dir_all(&tmpdir) {
                warn!("⚠️ Could not remove {}: {}", tmpdir.display(), e);
            }
        } else {
            warn!("Not cleaning up dir {}", tmpdir.display());
        }

        if outcome.is_failed() {
            error!(
                "Test failed. Logs and node datadirs kept in {}",
                tmpdir.display()
            );
        }
        info!("👋 Exit code {}", outcome.exit_code());
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn wait_for_enter(cluster: &ClusterController) {
    println!(
        "Test failed; {} nodes are still up under {}. Press Enter to tear down.",
        cluster.len(),
        cluster.ctx().tmpdir.display()
    );
    let mut line = String::new();
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
    if let Err(e) = stdin.read_line(&mut line).await {
        warn!("Reading stdin failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Passed.exit_code(), 0);
        assert_eq!(RunOutcome::Failed("x".into()).exit_code(), 1);
        assert_eq!(RunOutcome::Skipped("x".into()).exit_code(), 77);
    }

    #[test]
    fn test_evaluate() {
        assert_eq!(RunOutcome::evaluate(&Ok(())), RunOutcome::Passed);
        assert_eq!(
            RunOutcome::evaluate(&Err(HarnessError::Skip("no wallet".into()))),
            RunOutcome::Skipped("no wallet".into())
        );
        let failed = RunOutcome::evaluate(&Err(HarnessError::Assertion("3 != 4".into())));
        assert!(failed.is_failed());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static text");
        assert_eq!(panic_message(&*boxed), "static text");
        let boxed: Box<dyn Any + Send> = Box::new(format!("node {} diverged", 2));
        assert_eq!(panic_message(&*boxed), "node 2 diverged");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&*boxed), "non-string panic payload");
    }
}
