// tests/integration/registry_test.rs

use super::test_helpers::{DB_ID, fake_client, init_tracing, metadata};
use rediscope::core::RediscopeError;
use rediscope::core::metadata::{ClientContext, ClientMetadata, ClientQuery, SessionMetadata};
use rediscope::core::registry::ClientRegistry;
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(60 * 60);

#[tokio::test]
async fn test_equal_metadata_resolves_to_same_client() {
    init_tracing();
    let registry = ClientRegistry::new(HOUR);
    let (client, _) = fake_client(metadata(ClientContext::Browser));
    registry.set_client(client.clone()).await.unwrap();

    let m1 = metadata(ClientContext::Browser);
    let m2 = metadata(ClientContext::Browser);
    let a = registry.get_client(&m1.id()).await.unwrap();
    let b = registry.get_client_by_metadata(&m2).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &client));
}

#[tokio::test]
async fn test_set_client_keeps_connected_incumbent() {
    let registry = ClientRegistry::new(HOUR);
    let (h1, c1) = fake_client(metadata(ClientContext::Browser));
    let (h2, c2) = fake_client(metadata(ClientContext::Browser));

    let stored = registry.set_client(h1.clone()).await.unwrap();
    assert!(Arc::ptr_eq(&stored, &h1));

    let stored = registry.set_client(h2.clone()).await.unwrap();
    assert!(Arc::ptr_eq(&stored, &h1));
    assert_eq!(c2.disconnects(), 1);
    assert_eq!(c1.disconnects(), 0);
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_set_client_replaces_disconnected_incumbent() {
    let registry = ClientRegistry::new(HOUR);
    let (h1, c1) = fake_client(metadata(ClientContext::Browser));
    let (h2, c2) = fake_client(metadata(ClientContext::Browser));

    registry.set_client(h1.clone()).await.unwrap();
    c1.set_ready(false);

    let stored = registry.set_client(h2.clone()).await.unwrap();
    assert!(Arc::ptr_eq(&stored, &h2));
    assert_eq!(c1.disconnects(), 1);
    assert_eq!(c2.disconnects(), 0);
    let found = registry.get_client(h2.id()).await.unwrap();
    assert!(Arc::ptr_eq(&found, &h2));
}

#[tokio::test]
async fn test_set_client_same_handle_twice_is_noop() {
    let registry = ClientRegistry::new(HOUR);
    let (h1, c1) = fake_client(metadata(ClientContext::Browser));
    registry.set_client(h1.clone()).await.unwrap();
    let stored = registry.set_client(h1.clone()).await.unwrap();
    assert!(Arc::ptr_eq(&stored, &h1));
    assert_eq!(c1.disconnects(), 0);
}

#[tokio::test]
async fn test_set_client_rejects_incomplete_metadata() {
    let registry = ClientRegistry::new(HOUR);
    let incomplete = ClientMetadata::new(
        SessionMetadata::new("", "session-1"),
        DB_ID,
        ClientContext::Browser,
    );
    let (client, _) = fake_client(incomplete);
    let err = registry.set_client(client).await.unwrap_err();
    assert!(matches!(err, RediscopeError::InvalidClientMetadata(_)));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_get_client_drops_disconnected_entry() {
    let registry = ClientRegistry::new(HOUR);
    let (client, connection) = fake_client(metadata(ClientContext::Workbench));
    registry.set_client(client.clone()).await.unwrap();

    connection.set_ready(false);
    assert!(registry.get_client(client.id()).await.is_none());
    assert!(registry.is_empty());
    assert_eq!(connection.disconnects(), 1);
}

#[tokio::test]
async fn test_remove_missing_client_returns_zero() {
    let registry = ClientRegistry::new(HOUR);
    assert_eq!(registry.remove_client("nope").await, 0);
    assert_eq!(
        registry
            .remove_client_by_metadata(&metadata(ClientContext::Cli))
            .await,
        0
    );
}

#[tokio::test]
async fn test_remove_client_tolerates_disconnect_failure() {
    let registry = ClientRegistry::new(HOUR);
    let (client, connection) = fake_client(metadata(ClientContext::Browser));
    connection.fail_disconnects();
    registry.set_client(client.clone()).await.unwrap();

    assert_eq!(registry.remove_client(client.id()).await, 1);
    assert_eq!(connection.disconnects(), 1);
    assert!(registry.is_empty());
    assert_eq!(registry.remove_client(client.id()).await, 0);
}

fn client_for(database_id: &str, context: ClientContext) -> ClientMetadata {
    ClientMetadata::new(SessionMetadata::new("user-1", "s"), database_id, context)
}

#[tokio::test]
async fn test_partial_queries_match_and_narrow() {
    let registry = ClientRegistry::new(HOUR);
    for (db, context) in [
        ("a", ClientContext::Browser),
        ("a", ClientContext::Workbench),
        ("a", ClientContext::Cli),
        ("b", ClientContext::Browser),
    ] {
        let (client, _) = fake_client(client_for(db, context));
        registry.set_client(client).await.unwrap();
    }

    assert_eq!(registry.find_clients(&ClientQuery::for_database("a")).len(), 3);
    assert_eq!(
        registry
            .find_clients(&ClientQuery::for_database("a").context(ClientContext::Browser))
            .len(),
        1
    );

    assert_eq!(
        registry
            .remove_clients_by_metadata(&ClientQuery::for_database("missing"))
            .await,
        0
    );
    assert_eq!(registry.len(), 4);

    let removed = registry
        .remove_clients_by_metadata(&ClientQuery::for_database("a"))
        .await;
    assert_eq!(removed, 3);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.find_clients(&ClientQuery::for_database("b")).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sync_clients_evicts_only_idle_entries() {
    let registry = ClientRegistry::new(HOUR);
    let (stale, stale_conn) = fake_client(client_for("a", ClientContext::Browser));
    let (fresh, fresh_conn) = fake_client(client_for("b", ClientContext::Browser));
    registry.set_client(stale.clone()).await.unwrap();
    registry.set_client(fresh.clone()).await.unwrap();

    tokio::time::advance(Duration::from_secs(30 * 60)).await;
    registry.get_client(fresh.id()).await.unwrap();
    tokio::time::advance(Duration::from_secs(31 * 60)).await;

    assert_eq!(registry.sync_clients().await, 1);
    assert_eq!(stale_conn.disconnects(), 1);
    assert_eq!(fresh_conn.disconnects(), 0);
    assert_eq!(registry.len(), 1);
    let kept = registry.get_client(fresh.id()).await.unwrap();
    assert!(Arc::ptr_eq(&kept, &fresh));
}

#[tokio::test(start_paused = true)]
async fn test_sync_clients_keeps_entries_at_threshold() {
    let registry = ClientRegistry::new(HOUR);
    let (client, _) = fake_client(metadata(ClientContext::Browser));
    registry.set_client(client).await.unwrap();

    tokio::time::advance(HOUR).await;
    assert_eq!(registry.sync_clients().await, 0);
    assert_eq!(registry.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_idle_sweeper_runs_until_shutdown() {
    let registry = ClientRegistry::new(Duration::from_secs(60));
    let (client, connection) = fake_client(metadata(ClientContext::Browser));
    registry.set_client(client).await.unwrap();

    let sweeper = registry
        .start_idle_sweeper(Duration::from_secs(10))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(75)).await;
    assert!(registry.is_empty());
    assert_eq!(connection.disconnects(), 1);

    registry.shutdown().await;
    sweeper.await.unwrap();
    assert!(registry.start_idle_sweeper(Duration::from_secs(10)).is_none());
}

#[tokio::test]
async fn test_shutdown_disconnects_everything() {
    let registry = ClientRegistry::new(HOUR);
    let (a, conn_a) = fake_client(client_for("a", ClientContext::Browser));
    let (b, conn_b) = fake_client(client_for("b", ClientContext::Browser));
    registry.set_client(a).await.unwrap();
    registry.set_client(b).await.unwrap();

    assert_eq!(registry.shutdown().await, 2);
    assert!(registry.is_empty());
    assert_eq!(conn_a.disconnects(), 1);
    assert_eq!(conn_b.disconnects(), 1);
}
