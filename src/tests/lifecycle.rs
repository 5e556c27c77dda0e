// Lifecycle Tests
// TestNode start, stop, crash detection and restart against the fake node process

#[cfg(test)]
mod tests {
    use crate::error::HarnessError;
    use crate::node::options::NodeOptions;
    use crate::node::test_node::{NodeTiming, TestNode};
    use crate::node::NodeState;
    use crate::rpc::methods::NORMAL_SYNC_PHASE;
    use crate::rpc::NodeRpc;
    use crate::tests::support::{fake_node_binary, MockRpc};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    // =========================================================================
    // HELPER FUNCTIONS
    // =========================================================================

    fn timing() -> NodeTiming {
        NodeTiming {
            poll_interval: Duration::from_millis(10),
            phase_timeout: Duration::from_millis(300),
            stop_timeout: Duration::from_secs(5),
        }
    }

    fn create_node(dir: &Path, binary: &Path, mock: &Arc<MockRpc>) -> TestNode {
        let datadir = dir.join("node0");
        mock.set_datadir(&datadir);
        let options = NodeOptions::for_node(0, &datadir, 30333, 9933);
        TestNode::new(0, binary, options, NodeRpc::new(mock.clone()), timing())
    }

    fn kill_hard(pid: u32) {
        std::process::Command::new("kill")
            .args(["-9", &pid.to_string()])
            .status()
            .unwrap();
    }

    async fn wait_for_crash(node: &mut TestNode) {
        for _ in 0..200 {
            if node.refresh_state() == NodeState::Crashed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("node never observed as crashed");
    }

    // =========================================================================
    // START / STOP
    // =========================================================================

    #[tokio::test]
    async fn test_start_and_graceful_stop() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_node_binary(dir.path(), "");
        let mock = MockRpc::new("alpha");
        let mut node = create_node(dir.path(), &binary, &mock);

        node.start(&[], &[NORMAL_SYNC_PHASE], Duration::from_secs(5)).await.unwrap();
        assert_eq!(node.state(), NodeState::Running);
        assert_eq!(node.epoch(), 1);
        assert_eq!(node.node_id(), Some("alpha"));
        assert_eq!(node.phase_watermark(), Some(NORMAL_SYNC_PHASE));
        assert!(node.pid().is_some());
        node.ensure_alive().unwrap();

        node.stop("", false, true).await.unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
        assert!(node.pid().is_none());
        assert_eq!(mock.calls_to("system_stop"), 1);
        assert!(matches!(node.ensure_alive(), Err(HarnessError::NodeNotRunning(0))));
    }

    #[tokio::test]
    async fn test_start_without_phase_skips_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_node_binary(dir.path(), "");
        let mock = MockRpc::new("alpha");
        mock.set_phase("WarpSyncPhase");
        let mut node = create_node(dir.path(), &binary, &mock);

        node.start(&[], &[], Duration::from_secs(5)).await.unwrap();
        assert_eq!(node.state(), NodeState::Running);
        assert_eq!(node.phase_watermark(), None);
        assert_eq!(mock.calls_to("sync_getPhase"), 0);

        node.stop("", true, true).await.unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_unexpected_stderr_fails_stop() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_node_binary(dir.path(), "Error: database corrupted");
        let mock = MockRpc::new("alpha");
        let mut node = create_node(dir.path(), &binary, &mock);

        node.start(&[], &[], Duration::from_secs(5)).await.unwrap();
        match node.stop("", false, true).await {
            Err(HarnessError::UnexpectedStderr { node: 0, expected, actual }) => {
                assert!(expected.is_empty());
                assert_eq!(actual, "Error: database corrupted");
            }
            other => panic!("expected UnexpectedStderr, got {:?}", other),
        }
        // The process is gone either way
        assert_eq!(node.state(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_expected_stderr_matches_after_trim() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_node_binary(dir.path(), "Error: database corrupted");
        let mock = MockRpc::new("alpha");
        let mut node = create_node(dir.path(), &binary, &mock);

        node.start(&[], &[], Duration::from_secs(5)).await.unwrap();
        node.stop("  Error: database corrupted\n", false, true).await.unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_without_wait_then_wait_for_exit() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_node_binary(dir.path(), "");
        let mock = MockRpc::new("alpha");
        let mut node = create_node(dir.path(), &binary, &mock);

        node.start(&[], &[], Duration::from_secs(5)).await.unwrap();
        node.stop("", false, false).await.unwrap();
        assert_eq!(node.state(), NodeState::Stopping);

        node.wait_for_exit("", Duration::from_secs(5)).await.unwrap();
        assert_eq!(node.state(), NodeState::Stopped);

        // Nothing left to wait for
        assert!(matches!(
            node.wait_for_exit("", Duration::from_secs(1)).await,
            Err(HarnessError::NodeNotRunning(0))
        ));
    }

    // =========================================================================
    // FAILURES
    // =========================================================================

    #[tokio::test]
    async fn test_phase_timeout_marks_crashed_then_restart_opens_new_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_node_binary(dir.path(), "");
        let mock = MockRpc::new("alpha");
        mock.set_phase("WarpSyncPhase");
        let mut node = create_node(dir.path(), &binary, &mock);

        match node.start(&[], &[NORMAL_SYNC_PHASE], Duration::from_secs(5)).await {
            Err(HarnessError::StartupTimeout { node: 0, stage, .. }) => assert!(stage.contains("phase")),
            other => panic!("expected StartupTimeout, got {:?}", other),
        }
        assert_eq!(node.state(), NodeState::Crashed);
        assert!(node.pid().is_none());

        mock.set_phase(NORMAL_SYNC_PHASE);
        node.start(&[], &[NORMAL_SYNC_PHASE], Duration::from_secs(5)).await.unwrap();
        assert_eq!(node.state(), NodeState::Running);
        assert_eq!(node.epoch(), 2);

        node.stop("", false, true).await.unwrap();
    }

    #[tokio::test]
    async fn test_killed_process_is_detected_as_crash() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_node_binary(dir.path(), "");
        let mock = MockRpc::new("alpha");
        let mut node = create_node(dir.path(), &binary, &mock);

        node.start(&[], &[], Duration::from_secs(5)).await.unwrap();
        kill_hard(node.pid().unwrap());
        wait_for_crash(&mut node).await;

        assert!(matches!(node.ensure_alive(), Err(HarnessError::ProcessCrash { node: 0, .. })));

        // A crashed node can still be stopped
        node.stop("", false, true).await.unwrap();
        assert_eq!(node.state(), NodeState::Stopped);
    }

    #[tokio::test]
    async fn test_missing_binary_fails_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockRpc::new("alpha");
        let mut node = create_node(dir.path(), &dir.path().join("does-not-exist"), &mock);

        let result = node.start(&[], &[], Duration::from_secs(1)).await;
        assert!(matches!(result, Err(HarnessError::Io(_))));
        assert_eq!(node.state(), NodeState::Crashed);
    }

    #[tokio::test]
    async fn test_clean_data_requires_stopped_node() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_node_binary(dir.path(), "");
        let mock = MockRpc::new("alpha");
        let mut node = create_node(dir.path(), &binary, &mock);

        node.start(&[], &[], Duration::from_secs(5)).await.unwrap();
        std::fs::write(node.datadir().join("chain.db"), b"blocks").unwrap();
        assert!(node.clean_data().is_err());

        node.stop("", false, true).await.unwrap();
        node.clean_data().unwrap();
        assert!(node.datadir().is_dir());
        assert!(!node.datadir().join("chain.db").exists());
    }

    #[tokio::test]
    async fn test_check_health_on_running_node() {
        let dir = tempfile::tempdir().unwrap();
        let binary = fake_node_binary(dir.path(), "");
        let mock = MockRpc::new("alpha");
        let mut node = create_node(dir.path(), &binary, &mock);

        node.start(&[], &[], Duration::from_secs(5)).await.unwrap();
        assert!(node.check_health(Duration::from_millis(500)).await.unwrap());

        // Unresponsive for the whole window
        mock.fail_next_calls(10_000);
        assert!(!node.check_health(Duration::from_millis(100)).await.unwrap());
        assert_eq!(node.state(), NodeState::Crashed);

        node.stop("", false, true).await.unwrap();
    }
}
