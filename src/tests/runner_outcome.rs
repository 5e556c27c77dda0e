// Runner Outcome Tests
// Exit codes, teardown cleanup rules and a full run over HTTP fake nodes

#[cfg(test)]
mod tests {
    use crate::cli::config::HarnessConfig;
    use crate::cluster::ClusterController;
    use crate::context::PortAllocator;
    use crate::error::{HarnessError, Result};
    use crate::runner::{RunOutcome, TestCase, TestParams, TestRunner};
    use crate::scenarios::scenario_by_name;
    use crate::tests::support::{fake_node_binary, serve_http, test_harness_config, MockRpc};
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    // =========================================================================
    // HELPER FUNCTIONS
    // =========================================================================

    /// Node-less test whose body returns a fixed result
    struct Scripted {
        body: fn() -> Result<()>,
        fail_setup: bool,
    }

    #[async_trait]
    impl TestCase for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn params(&self) -> TestParams {
            TestParams {
                num_nodes: 0,
                setup_clean_chain: true,
                ..TestParams::default()
            }
        }

        async fn setup_network(&mut self, _cluster: &mut ClusterController) -> Result<()> {
            if self.fail_setup {
                return Err(HarnessError::Config("no binary".into()));
            }
            Ok(())
        }

        async fn run(&mut self, _cluster: &mut ClusterController) -> Result<()> {
            (self.body)()
        }
    }

    fn scripted(body: fn() -> Result<()>) -> Scripted {
        Scripted { body, fail_setup: false }
    }

    fn config(dir: &Path) -> HarnessConfig {
        let binary = fake_node_binary(dir, "");
        test_harness_config(dir, &binary)
    }

    // =========================================================================
    // OUTCOMES
    // =========================================================================

    #[tokio::test]
    async fn test_passed_run_cleans_tmpdir() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let tmpdir = config.tmpdir.clone().unwrap();

        let outcome = TestRunner::new(config).run(&mut scripted(|| Ok(()))).await;
        assert_eq!(outcome, RunOutcome::Passed);
        assert_eq!(outcome.exit_code(), 0);
        assert!(!tmpdir.exists());
    }

    #[tokio::test]
    async fn test_failed_run_keeps_tmpdir() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let tmpdir = config.tmpdir.clone().unwrap();

        let mut test = scripted(|| Err(HarnessError::Assertion("2 != 3".into())));
        let outcome = TestRunner::new(config).run(&mut test).await;
        assert!(outcome.is_failed());
        assert_eq!(outcome.exit_code(), 1);
        assert!(tmpdir.exists());
    }

    #[tokio::test]
    async fn test_panicking_body_fails_and_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.pause_on_failure = true;
        let tmpdir = config.tmpdir.clone().unwrap();
        let pauses = Arc::new(AtomicUsize::new(0));

        let counter = pauses.clone();
        let mut runner = TestRunner::new(config).with_pause_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut test = scripted(|| panic!("assertion in test body"));
        let outcome = runner.run(&mut test).await;

        match outcome {
            RunOutcome::Failed(ref reason) => assert!(reason.contains("assertion in test body")),
            ref other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(pauses.load(Ordering::SeqCst), 1);
        assert!(tmpdir.exists());
    }

    #[tokio::test]
    async fn test_skipped_run_exits_77() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let tmpdir = config.tmpdir.clone().unwrap();

        let mut test = scripted(|| Err(HarnessError::Skip("needs wallet".into())));
        let outcome = TestRunner::new(config).run(&mut test).await;
        assert_eq!(outcome, RunOutcome::Skipped("needs wallet".into()));
        assert_eq!(outcome.exit_code(), 77);
        assert!(!tmpdir.exists());
    }

    #[tokio::test]
    async fn test_setup_failure_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let mut test = Scripted {
            body: || Ok(()),
            fail_setup: true,
        };
        let outcome = TestRunner::new(config).run(&mut test).await;
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_nocleanup_keeps_tmpdir_on_pass() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.no_cleanup = true;
        let tmpdir = config.tmpdir.clone().unwrap();

        let outcome = TestRunner::new(config).run(&mut scripted(|| Ok(()))).await;
        assert_eq!(outcome, RunOutcome::Passed);
        assert!(tmpdir.exists());
    }

    #[tokio::test]
    async fn test_pause_hook_runs_only_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.pause_on_failure = true;
        let pauses = Arc::new(AtomicUsize::new(0));

        let counter = pauses.clone();
        let mut runner = TestRunner::new(config.clone()).with_pause_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        runner.run(&mut scripted(|| Ok(()))).await;
        assert_eq!(pauses.load(Ordering::SeqCst), 0);

        config.tmpdir = Some(dir.path().join("second"));
        let counter = pauses.clone();
        let mut runner = TestRunner::new(config).with_pause_hook(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        runner
            .run(&mut scripted(|| Err(HarnessError::Assertion("boom".into()))))
            .await;
        assert_eq!(pauses.load(Ordering::SeqCst), 1);
    }

    // =========================================================================
    // END TO END
    // =========================================================================

    /// Smoke scenario over HTTP: three fake node processes whose RPC servers share
    /// one in-memory chain, so the cluster is always in agreement
    #[tokio::test]
    async fn test_smoke_scenario_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.port_min = 20000 + (rand::random::<u16>() % 20000);
        config.num_nodes = Some(3);
        let tmpdir = config.tmpdir.clone().unwrap();

        let ports = PortAllocator::new(config.port_min, config.port_seed).unwrap();
        let chain = MockRpc::new("shared");
        for i in 0..3 {
            let addr: SocketAddr = ([127, 0, 0, 1], ports.rpc_port(i).unwrap()).into();
            if serve_http(chain.clone(), addr, tmpdir.join(format!("node{}", i))).is_none() {
                // Port taken on this machine; nothing meaningful to check
                return;
            }
        }

        let mut test = scenario_by_name("smoke").unwrap();
        let outcome = TestRunner::new(config).run(&mut *test).await;
        assert_eq!(outcome, RunOutcome::Passed);
        assert!(chain.height() >= 7);
        assert!(!tmpdir.exists());
    }
}
