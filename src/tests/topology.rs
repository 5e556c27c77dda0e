// Topology Tests
// Wiring, partition and reconnect through the cluster controller

#[cfg(test)]
mod tests {
    use crate::cluster::ClusterTopology;
    use crate::error::HarnessError;
    use crate::node::NodeState;
    use crate::tests::support::{mock_cluster, mocks};

    #[tokio::test]
    async fn test_chain_of_three_has_two_links() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = mocks(3);
        let mut cluster = mock_cluster(dir.path(), &mocks);

        cluster.start_all().await.unwrap();
        cluster.wire(&ClusterTopology::chain(3)).await.unwrap();

        assert_eq!(cluster.established_links(), vec![(0, 1), (1, 2)]);
        assert_eq!(mocks[0].peers(), vec!["node1".to_string()]);
        assert_eq!(mocks[1].peers(), vec!["node0".to_string(), "node2".to_string()]);
        assert_eq!(mocks[2].peers(), vec!["node1".to_string()]);
        assert!(!cluster.topology().is_linked(0, 2));
        assert!(cluster.node(0).unwrap().peers().contains(&1));
        assert!(!cluster.node(0).unwrap().peers().contains(&2));

        cluster.stop_all().await.unwrap();
        assert!(cluster.established_links().is_empty());
    }

    #[tokio::test]
    async fn test_wire_is_idempotent_per_edge() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = mocks(2);
        let mut cluster = mock_cluster(dir.path(), &mocks);

        cluster.start_all().await.unwrap();
        cluster.wire(&ClusterTopology::chain(2)).await.unwrap();
        let calls = mocks[0].calls_to("admin_addPeer");

        cluster.wire(&ClusterTopology::chain(2)).await.unwrap();
        cluster.connect(1, 0).await.unwrap();
        assert_eq!(mocks[0].calls_to("admin_addPeer"), calls);
        assert_eq!(cluster.topology().edges().len(), 1);

        cluster.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_partition_and_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = mocks(4);
        let mut cluster = mock_cluster(dir.path(), &mocks);

        cluster.start_all().await.unwrap();
        cluster.wire(&ClusterTopology::chain(4)).await.unwrap();

        cluster.disconnect(1, 2).await.unwrap();
        assert_eq!(cluster.established_links(), vec![(0, 1), (2, 3)]);
        assert!(!cluster.topology().is_declared(1, 2));
        assert_eq!(mocks[1].peers(), vec!["node0".to_string()]);
        assert_eq!(mocks[2].peers(), vec!["node3".to_string()]);

        cluster.connect(1, 2).await.unwrap();
        assert!(cluster.topology().is_linked(1, 2));
        assert_eq!(cluster.established_links().len(), 3);

        cluster.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refuses_self_and_stopped_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = mocks(2);
        let mut cluster = mock_cluster(dir.path(), &mocks);

        assert!(matches!(cluster.connect(0, 0).await, Err(HarnessError::Assertion(_))));
        // Not started yet
        assert!(matches!(cluster.connect(0, 1).await, Err(HarnessError::NodeNotRunning(0))));
        assert!(matches!(cluster.connect(0, 5).await, Err(HarnessError::Assertion(_))));
    }

    #[tokio::test]
    async fn test_restart_rewires_declared_edges() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = mocks(3);
        let mut cluster = mock_cluster(dir.path(), &mocks);

        cluster.start_all().await.unwrap();
        cluster.wire(&ClusterTopology::chain(3)).await.unwrap();

        // stop_p = 1 always restarts, clean_p = 0 never wipes
        assert!(cluster.maybe_restart(1, 1.0, 0.0).await.unwrap());
        let node = cluster.node(1).unwrap();
        assert_eq!(node.state(), NodeState::Running);
        assert_eq!(node.epoch(), 2);
        assert_eq!(cluster.established_links(), vec![(0, 1), (1, 2)]);

        assert!(!cluster.maybe_restart(2, 0.0, 0.0).await.unwrap());
        assert_eq!(cluster.node(2).unwrap().epoch(), 1);

        cluster.stop_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_engine_runs_from_start_all_until_close() {
        let dir = tempfile::tempdir().unwrap();
        let mocks = mocks(2);
        let mut cluster = mock_cluster(dir.path(), &mocks);
        assert!(!cluster.engine().is_running());

        cluster.start_all().await.unwrap();
        assert!(cluster.engine().is_running());

        cluster.close().await;
        assert!(!cluster.engine().is_running());
        cluster.stop_all().await.unwrap();
    }
}
