// tests/integration/client_test.rs

use super::test_helpers::{FakeCluster, fake_client, metadata};
use bytes::Bytes;
use rediscope::core::RediscopeError;
use rediscope::core::client::{ClientTopology, RedisClient};
use rediscope::core::database::ConnectionType;
use rediscope::core::errors::ReplyErrorKind;
use rediscope::core::metadata::ClientContext;
use rediscope::core::native::NodeRole;
use rediscope::core::protocol::{CommandOptions, Reply, RespFrame};
use std::collections::HashSet;
use std::sync::Arc;

fn cluster_client(primaries: usize, replicas: usize) -> (Arc<RedisClient>, Arc<FakeCluster>) {
    let cluster = FakeCluster::new(primaries, replicas);
    let client = RedisClient::new(
        metadata(ClientContext::Browser),
        ClientTopology::Cluster(cluster.clone()),
        None,
    );
    (client, cluster)
}

#[tokio::test]
async fn test_reply_encodings() {
    let (client, connection) = fake_client(metadata(ClientContext::Browser));
    let raw = Bytes::from_static(b"\xff\x00binary");
    connection.reply_to("GET", RespFrame::BulkString(raw.clone()));

    let buffer = client
        .send_command(["GET", "k"], CommandOptions::buffer())
        .await
        .unwrap();
    assert_eq!(buffer, Reply::Data(raw));

    connection.reply_to("GET", RespFrame::BulkString(Bytes::from_static(b"value")));
    let text = client
        .send_command(["GET", "k"], CommandOptions::default())
        .await
        .unwrap();
    assert_eq!(text, Reply::Text("value".into()));
    assert_eq!(text.as_str().as_deref(), Some("value"));
}

#[tokio::test]
async fn test_error_reply_becomes_typed_error() {
    let (client, connection) = fake_client(metadata(ClientContext::Browser));
    connection.reply_to(
        "SET",
        RespFrame::Error("WRONGTYPE Operation against a key holding the wrong kind of value".into()),
    );

    let err = client
        .send_command(["SET", "k", "v"], CommandOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.reply_kind(), Some(ReplyErrorKind::WrongType));
    assert!(!err.is_connection_error());
}

#[tokio::test]
async fn test_standalone_nodes_is_self() {
    let (client, _) = fake_client(metadata(ClientContext::Browser));
    let nodes = client.nodes(NodeRole::Primary);
    assert_eq!(nodes.len(), 1);
    assert!(Arc::ptr_eq(&nodes[0], &client));
    assert_eq!(client.connection_type(), ConnectionType::Standalone);
}

#[tokio::test]
async fn test_cluster_nodes_by_role() {
    let (client, _) = cluster_client(2, 1);
    assert_eq!(client.connection_type(), ConnectionType::Cluster);

    let primaries = client.nodes(NodeRole::Primary);
    assert_eq!(primaries.len(), 2);
    assert!(!Arc::ptr_eq(&primaries[0], &primaries[1]));
    let addresses: HashSet<_> = primaries.iter().filter_map(|n| n.address()).collect();
    assert_eq!(addresses.len(), 2);
    assert_ne!(primaries[0].id(), primaries[1].id());

    assert_eq!(client.nodes(NodeRole::All).len(), 3);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (client, connection) = fake_client(metadata(ClientContext::Browser));
    assert!(client.is_connected());

    client.disconnect().await.unwrap();
    client.disconnect().await.unwrap();
    assert_eq!(connection.disconnects(), 1);
    assert!(!client.is_connected());

    let err = client
        .send_command(["PING"], CommandOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, RediscopeError::NoConnection);
}

#[tokio::test]
async fn test_cluster_disconnect_once() {
    let (client, cluster) = cluster_client(2, 0);
    client.disconnect().await.unwrap();
    client.disconnect().await.unwrap();
    assert_eq!(cluster.disconnects(), 1);
}

#[tokio::test]
async fn test_client_address_from_client_info() {
    let (client, connection) = fake_client(metadata(ClientContext::Profiler));
    connection.reply_to(
        "CLIENT",
        RespFrame::BulkString(Bytes::from_static(
            b"id=7 addr=127.0.0.1:52144 laddr=127.0.0.1:6379 fd=8 name=rediscope-profiler-db-1",
        )),
    );
    assert_eq!(
        client.client_address().await.unwrap().as_deref(),
        Some("127.0.0.1:52144")
    );
    assert_eq!(connection.commands().last().unwrap(), &vec!["CLIENT", "INFO"]);
}

#[tokio::test]
async fn test_monitor_streams_cover_every_node() {
    let (client, cluster) = cluster_client(2, 1);
    let streams = client.monitor_streams().await.unwrap();
    assert_eq!(streams.len(), 3);
    for node in cluster.primaries.iter().chain(cluster.replicas.iter()) {
        assert_eq!(node.monitor_count(), 1);
    }
}
