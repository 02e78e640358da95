//! Liveness sweeps over a real side channel.

use std::time::Duration;

use encore_protocol::{NodeMessage, NodeOk, NodeShutdown};

use crate::harness::{quick_play_request, test_config, wait_until, FakeNode, TestMaster};

/// Place one player so the node hosts a server.
async fn host_one_server(master: &TestMaster, node: &mut FakeNode) -> String {
    let matchmaker = master.master.matchmaker.clone();
    let connect =
        tokio::spawn(async move { matchmaker.connect(&quick_play_request("host", 7000)).await });
    let create = node.accept_create(Duration::from_secs(2)).await.unwrap();
    node.confirm_relay(Duration::from_secs(2)).await.unwrap();
    connect.await.unwrap().unwrap();
    create.secret
}

#[tokio::test]
async fn test_answering_node_survives_sweep() {
    let master = TestMaster::start(test_config(2000, 300)).await.unwrap();
    let mut node = master.attach_node("1.4.0").await.unwrap();

    let sweep = master
        .master
        .coordinator
        .start_wait_for_all_nodes_task()
        .unwrap();
    let check = node.recv(Duration::from_secs(2)).await.unwrap();
    assert!(matches!(check, NodeMessage::CheckNodes(_)));
    node.send(&NodeOk).await.unwrap();

    let report = sweep.await.unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.acknowledged, 1);
    assert!(report.went_offline.is_empty());
    assert_eq!(master.master.coordinator.online_nodes().len(), 1);

    master.shutdown().await;
}

#[tokio::test]
async fn test_silent_node_goes_offline_and_loses_servers() {
    let master = TestMaster::start(test_config(2000, 150)).await.unwrap();
    let mut node = master.attach_node("1.4.0").await.unwrap();
    let secret = host_one_server(&master, &mut node).await;
    assert!(master.master.registry.get_server(&secret).is_some());

    let report = master
        .master
        .coordinator
        .start_wait_for_all_nodes_task()
        .unwrap()
        .await
        .unwrap();
    assert_eq!(report.went_offline.len(), 1);

    let registry = master.master.registry.clone();
    wait_until(Duration::from_secs(2), || registry.get_server_count() == 0)
        .await
        .unwrap();

    // Offline nodes stay known and come back with a fresh announcement
    let ip = node.local_addr().unwrap().ip();
    assert!(master.master.coordinator.endpoint_exists(ip));
    let again = master.attach_node("1.4.1").await.unwrap();
    assert_eq!(again.local_addr().unwrap().ip(), ip);
    assert_eq!(
        master.master.coordinator.get_node(ip).unwrap().version,
        "1.4.1"
    );

    master.shutdown().await;
}

#[tokio::test]
async fn test_node_shutdown_purges_its_servers() {
    let master = TestMaster::start(test_config(2000, 200)).await.unwrap();
    let mut node = master.attach_node("1.4.0").await.unwrap();
    host_one_server(&master, &mut node).await;

    node.send(&NodeShutdown).await.unwrap();

    let registry = master.master.registry.clone();
    wait_until(Duration::from_secs(2), || registry.get_server_count() == 0)
        .await
        .unwrap();
    let ip = node.local_addr().unwrap().ip();
    assert!(!master.master.coordinator.get_node(ip).unwrap().is_online());

    master.shutdown().await;
}
