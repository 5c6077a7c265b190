//! Integration tests against real daemons.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::harness::TestNetwork;
use regnet_harness::config::HarnessConfig;
use regnet_harness::error::Error;
use regnet_harness::rpc::NodeRpc;
use regnet_harness::runner::{drive, Report, ScenarioStatus, TestRunner};
use regnet_harness::scenarios::BuiltinScenario;
use regnet_harness::supervisor::NodeSet;
use tempfile::TempDir;

#[tokio::test]
#[ignore = "Requires a regtest daemon binary in REGNET_DAEMON - run with --ignored"]
async fn test_nodes_start_on_baseline_chain() {
    let network = TestNetwork::setup(2).await.expect("Failed to setup network");
    let blocks = network.harness_config().baseline.block_count;

    for rpc in network.supervisor().rpcs(&[0, 1]).unwrap() {
        assert_eq!(rpc.get_block_count().await.unwrap(), u64::from(blocks));
    }
    assert!(network.root().join("cache").join("node1").is_dir());

    network.teardown().await.expect("Failed to teardown");
}

#[tokio::test]
#[ignore = "Requires a regtest daemon binary in REGNET_DAEMON - run with --ignored"]
async fn test_partition_rejoin_on_real_nodes() {
    let network = TestNetwork::setup(4).await.expect("Failed to setup network");
    let mut report = Report::new(false);

    let status = drive(
        network.supervisor(),
        network.harness_config(),
        &BuiltinScenario::PartitionRejoin,
        &mut report,
    )
    .await;

    assert_eq!(status, ScenarioStatus::Successful, "{:?}", report.lines());
    network.teardown().await.expect("Failed to teardown");
}

#[tokio::test]
#[ignore = "Requires a regtest daemon binary in REGNET_DAEMON - run with --ignored"]
async fn test_stopped_node_is_reported_exited() {
    let mut network = TestNetwork::setup(2).await.expect("Failed to setup network");

    let rpc = network.supervisor().rpc(1).unwrap();
    rpc.stop().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;

    let err = network.supervisor().endpoint(1).unwrap_err();
    assert!(matches!(err, Error::NodeExited { index: 1, .. }));

    network.supervisor_mut().stop(1).await.unwrap();
    network.teardown().await.expect("Failed to teardown");
}

#[tokio::test]
#[ignore = "Requires a regtest daemon binary in REGNET_DAEMON - run with --ignored"]
async fn test_builtin_batch_succeeds() {
    let root = TempDir::new().unwrap();
    let config: HarnessConfig = TestNetwork::config(&root, 4);
    let runner = TestRunner::new(config).unwrap();
    let mut report = Report::new(false);

    let batch = runner.run_batch(&BuiltinScenario::ALL, &mut report).await;

    assert!(batch.all_successful(), "{:#?}", report.lines());
    assert_eq!(batch.exit_code(), 0);
    // Successful runs clean up after themselves.
    let leftovers = std::fs::read_dir(root.path().join("runs"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}
