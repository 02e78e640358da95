//! Matchmaking through a real side channel: instance creation, relay
//! confirmation, timeouts, and server lifecycle reports from the node.

use std::time::Duration;

use encore_master::matchmaking::ConnectToServerResult;
use encore_protocol::{
    NodeMessage, PlayerCountChanged, PlayerEncryptionReceived, PlayerJoined, ServerClosed,
};

use crate::harness::{quick_play_request, test_config, wait_until, TestMaster};

#[tokio::test]
async fn test_quick_play_relay_confirmed_by_node() {
    let master = TestMaster::start(test_config(2000, 200)).await.unwrap();
    let mut node = master.attach_node("1.4.0").await.unwrap();

    let matchmaker = master.master.matchmaker.clone();
    let connect =
        tokio::spawn(async move { matchmaker.connect(&quick_play_request("host", 6000)).await });

    // The node learns the secret from the creation request, before any relay
    let create = node.accept_create(Duration::from_secs(2)).await.unwrap();
    assert_eq!(create.host_user_id, "host");
    assert_eq!(create.max_player_count, 5);
    assert_eq!(create.instance_endpoint.ip(), node.local_addr().unwrap().ip());
    assert_eq!(create.song_packs_top, 1);
    assert_eq!(create.song_packs_bottom, 2);

    let relay = node.confirm_relay(Duration::from_secs(2)).await.unwrap();
    assert_eq!(relay.user_id, "host");
    assert_eq!(relay.public_key, vec![0x22; 91]);
    assert_eq!(relay.node_endpoint, create.instance_endpoint);

    let response = connect.await.unwrap().unwrap();
    assert_eq!(response.manager_id, "host");
    assert_eq!(response.secret, create.secret);
    assert_eq!(response.code, create.code);
    assert_eq!(response.remote_endpoint, create.instance_endpoint);
    assert_eq!(master.master.coordinator.pending_relays(), 0);
    assert_eq!(master.master.coordinator.pending_creations(), 0);

    // Node reports the player joined, keyed by the secret it was created with
    node.send(&PlayerJoined {
        secret: create.secret.clone(),
    })
    .await
    .unwrap();
    let registry = master.master.registry.clone();
    let secret = create.secret.clone();
    wait_until(Duration::from_secs(2), || {
        registry
            .get_server(&secret)
            .map(|s| s.current_player_count == 1)
            .unwrap_or(false)
    })
    .await
    .unwrap();
    assert_eq!(registry.total_player_joins(), 1);

    master.shutdown().await;
}

#[tokio::test]
async fn test_node_that_never_starts_instance_gets_no_relay() {
    let master = TestMaster::start(test_config(150, 200)).await.unwrap();
    let mut node = master.attach_node("1.4.0").await.unwrap();

    let result = master
        .master
        .matchmaker
        .connect(&quick_play_request("host", 6000))
        .await;
    assert_eq!(
        result.unwrap_err(),
        ConnectToServerResult::NoAvailableDedicatedServers
    );
    assert_eq!(master.master.registry.get_server_count(), 0);
    assert_eq!(master.master.coordinator.pending_creations(), 0);

    let first = node.recv(Duration::from_secs(1)).await.unwrap();
    assert!(matches!(first, NodeMessage::CreateServer(_)));
    assert!(node.recv(Duration::from_millis(200)).await.is_err());

    master.shutdown().await;
}

#[tokio::test]
async fn test_silent_relay_times_out_and_server_is_dropped() {
    let master = TestMaster::start(test_config(150, 200)).await.unwrap();
    let mut node = master.attach_node("1.4.0").await.unwrap();

    let matchmaker = master.master.matchmaker.clone();
    let connect =
        tokio::spawn(async move { matchmaker.connect(&quick_play_request("host", 6000)).await });
    let create = node.accept_create(Duration::from_secs(1)).await.unwrap();

    assert_eq!(
        connect.await.unwrap().unwrap_err(),
        ConnectToServerResult::RelayTimedOut
    );
    assert!(master.master.registry.get_server(&create.secret).is_none());

    // The relay did reach the node; answering now is a late no-op
    let NodeMessage::RelayPlayerEncryption(request) =
        node.recv(Duration::from_secs(1)).await.unwrap()
    else {
        panic!("expected relay request");
    };
    node.send(&request.reply(
        1,
        PlayerEncryptionReceived {
            node_endpoint: request.body.node_endpoint,
            player_endpoint: request.body.player_endpoint,
        },
    ))
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(master.master.coordinator.pending_relays(), 0);

    master.shutdown().await;
}

#[tokio::test]
async fn test_node_lifecycle_reports_update_registry() {
    let master = TestMaster::start(test_config(500, 200)).await.unwrap();
    let mut node = master.attach_node("1.4.0").await.unwrap();

    let matchmaker = master.master.matchmaker.clone();
    let connect =
        tokio::spawn(async move { matchmaker.connect(&quick_play_request("host", 6000)).await });
    let create = node.accept_create(Duration::from_secs(2)).await.unwrap();
    node.confirm_relay(Duration::from_secs(2)).await.unwrap();
    let response = connect.await.unwrap().unwrap();

    let registry = master.master.registry.clone();
    node.send(&PlayerCountChanged {
        secret: create.secret.clone(),
        count: 5,
    })
    .await
    .unwrap();
    let secret = create.secret.clone();
    wait_until(Duration::from_secs(2), || {
        registry.get_server(&secret).map(|s| s.is_full()).unwrap_or(false)
    })
    .await
    .unwrap();

    // A full lobby is not offered to the next quick-play player; with the
    // node silent this time the fresh server is never confirmed
    let result = master
        .master
        .matchmaker
        .connect(&quick_play_request("guest", 6001))
        .await;
    assert_eq!(
        result.unwrap_err(),
        ConnectToServerResult::NoAvailableDedicatedServers
    );
    assert_eq!(registry.get_server_count(), 1);

    node.send(&ServerClosed {
        secret: create.secret.clone(),
    })
    .await
    .unwrap();
    wait_until(Duration::from_secs(2), || registry.get_server_count() == 0)
        .await
        .unwrap();
    assert!(registry.get_server_by_code(&response.code).is_none());

    master.shutdown().await;
}
