// tests/integration/fanout_test.rs

use super::test_helpers::{FakeCluster, metadata};
use rediscope::core::RediscopeError;
use rediscope::core::client::{ClientTopology, RedisClient, SwallowPolicy, fan_out};
use rediscope::core::errors::ReplyErrorKind;
use rediscope::core::metadata::ClientContext;
use rediscope::core::native::NodeRole;
use rediscope::core::protocol::{CommandOptions, Reply, RespFrame};
use std::sync::Arc;

fn two_primaries() -> (Arc<RedisClient>, Arc<FakeCluster>) {
    let cluster = FakeCluster::new(2, 0);
    let client = RedisClient::new(
        metadata(ClientContext::Workbench),
        ClientTopology::Cluster(cluster.clone()),
        None,
    );
    (client, cluster)
}

async fn create_index(node: Arc<RedisClient>) -> Result<Reply, RediscopeError> {
    node.send_command(["FT.CREATE", "idx", "SCHEMA", "title", "TEXT"], CommandOptions::default())
        .await
}

#[tokio::test]
async fn test_tolerated_error_is_swallowed() {
    let (client, cluster) = two_primaries();
    cluster.primaries[0].reply_to("FT.CREATE", RespFrame::SimpleString("OK".into()));
    cluster.primaries[1].reply_to("FT.CREATE", RespFrame::Error("Index already exists".into()));

    let nodes = client.nodes(NodeRole::Primary);
    let policy = SwallowPolicy::none().message_contains("already exists");
    let replies = fan_out(&nodes, create_index, &policy).await.unwrap();
    assert_eq!(replies, vec![Reply::Status("OK".into())]);
}

#[tokio::test]
async fn test_untolerated_error_propagates() {
    let (client, cluster) = two_primaries();
    cluster.primaries[0].reply_to("FT.CREATE", RespFrame::SimpleString("OK".into()));
    cluster.primaries[1].reply_to("FT.CREATE", RespFrame::Error("Index already exists".into()));

    let nodes = client.nodes(NodeRole::Primary);
    let err = fan_out(&nodes, create_index, &SwallowPolicy::none())
        .await
        .unwrap_err();
    assert_eq!(err, RediscopeError::reply("Index already exists"));
}

#[tokio::test]
async fn test_first_failing_node_wins() {
    let (client, cluster) = two_primaries();
    cluster.primaries[0].reply_to("FT.CREATE", RespFrame::Error("ERR first".into()));
    cluster.primaries[1].reply_to("FT.CREATE", RespFrame::Error("ERR second".into()));

    let nodes = client.nodes(NodeRole::Primary);
    let err = fan_out(&nodes, create_index, &SwallowPolicy::none())
        .await
        .unwrap_err();
    assert_eq!(err, RediscopeError::reply("ERR first"));
}

#[tokio::test]
async fn test_structured_kind_is_tolerated() {
    let (client, cluster) = two_primaries();
    cluster.primaries[0].reply_to("DEL", RespFrame::Error("MOVED 3999 10.0.0.2:6379".into()));
    cluster.primaries[1].reply_to("DEL", RespFrame::Integer(1));

    let nodes = client.nodes(NodeRole::Primary);
    let policy = SwallowPolicy::none().kind(ReplyErrorKind::Moved);
    let deleted = fan_out(
        &nodes,
        |node| async move {
            node.send_command(["DEL", "k"], CommandOptions::default())
                .await
                .map(|reply| reply.as_integer().unwrap_or_default())
        },
        &policy,
    )
    .await
    .unwrap();
    assert_eq!(deleted, vec![1]);
}

#[tokio::test]
async fn test_connection_errors_are_never_tolerated() {
    let (client, cluster) = two_primaries();
    cluster.primaries[1].set_ready(false);

    let nodes = client.nodes(NodeRole::Primary);
    let policy = SwallowPolicy::none()
        .message_contains("already exists")
        .kind(ReplyErrorKind::Other);
    let err = fan_out(
        &nodes,
        |node| async move { node.send_command(["PING"], CommandOptions::default()).await },
        &policy,
    )
    .await
    .unwrap_err();
    assert_eq!(err, RediscopeError::NoConnection);
}

#[test]
fn test_message_match_is_case_insensitive() {
    let policy = SwallowPolicy::none().message_contains("Unknown Index name");
    assert!(policy.tolerates(&RediscopeError::reply("unknown index name")));
    assert!(!policy.tolerates(&RediscopeError::reply("ERR syntax error")));
    assert!(!SwallowPolicy::none().tolerates(&RediscopeError::reply("Index already exists")));
}
