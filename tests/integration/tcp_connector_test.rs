// tests/integration/tcp_connector_test.rs

use super::test_helpers::init_tracing;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rediscope::core::RediscopeError;
use rediscope::core::database::Endpoint;
use rediscope::core::errors::ReplyErrorKind;
use rediscope::core::native::{
    ConnectParams, LifecycleEvent, LifecycleEvents, NativeConnection, NativeConnector,
    TcpConnector,
};
use rediscope::core::protocol::{RespFrame, RespFrameCodec};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

const MONITOR_LINE: &str = r#"1700000000.000001 [0 127.0.0.1:50000] "get" "k""#;

/// A tiny RESP server that records every command it receives.
struct FakeServer {
    port: u16,
    commands: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FakeServer {
    async fn start(password: Option<&'static str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let recorded = commands.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let mut framed = Framed::new(socket, RespFrameCodec);
                    while let Some(Ok(RespFrame::Array(items))) = framed.next().await {
                        let args: Vec<String> = items
                            .iter()
                            .filter_map(|item| item.as_text())
                            .collect();
                        recorded.lock().push(args.clone());
                        let name = args.first().cloned().unwrap_or_default().to_ascii_uppercase();
                        let reply = match name.as_str() {
                            "AUTH" if args.last().map(String::as_str) != password => {
                                RespFrame::Error("WRONGPASS invalid username-password pair".into())
                            }
                            "PING" => RespFrame::SimpleString("PONG".into()),
                            "GET" => RespFrame::BulkString(Bytes::from_static(b"value")),
                            _ => RespFrame::SimpleString("OK".into()),
                        };
                        if framed.send(reply).await.is_err() {
                            return;
                        }
                        if name == "MONITOR" {
                            let _ = framed
                                .send(RespFrame::SimpleString(MONITOR_LINE.into()))
                                .await;
                        }
                    }
                });
            }
        });
        Self { port, commands }
    }

    fn params(&self) -> ConnectParams {
        params_for(self.port)
    }

    fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().clone()
    }
}

fn params_for(port: u16) -> ConnectParams {
    ConnectParams {
        endpoint: Endpoint::new("127.0.0.1", port),
        username: None,
        password: None,
        tls: None,
        db: 0,
        connection_name: None,
        retry: None,
        max_retries_per_request: None,
        connect_timeout: Duration::from_secs(5),
    }
}

async fn next_terminal(events: &mut LifecycleEvents) -> LifecycleEvent {
    loop {
        match events.recv().await {
            Some(LifecycleEvent::Connect) | Some(LifecycleEvent::Reconnecting { .. }) => {}
            Some(event) => return event,
            None => return LifecycleEvent::End,
        }
    }
}

#[tokio::test]
async fn test_handshake_and_commands() {
    init_tracing();
    let server = FakeServer::start(Some("secret")).await;
    let mut params = server.params();
    params.username = Some("app".into());
    params.password = Some("secret".into());
    params.db = 3;
    params.connection_name = Some("rediscope-browser-db-1".into());

    let (connection, mut events) = TcpConnector.open_standalone(params).unwrap();
    assert_eq!(next_terminal(&mut events).await, LifecycleEvent::Ready);
    assert!(connection.is_ready());

    let reply = connection
        .send_command(vec![Bytes::from_static(b"PING")])
        .await
        .unwrap();
    assert_eq!(reply, RespFrame::SimpleString("PONG".into()));
    let reply = connection
        .send_command(vec![Bytes::from_static(b"GET"), Bytes::from_static(b"k")])
        .await
        .unwrap();
    assert_eq!(reply, RespFrame::BulkString(Bytes::from_static(b"value")));

    assert_eq!(
        server.commands(),
        vec![
            vec!["AUTH", "app", "secret"],
            vec!["SELECT", "3"],
            vec!["CLIENT", "SETNAME", "rediscope-browser-db-1"],
            vec!["PING"],
            vec!["GET", "k"],
        ]
    );
    assert_eq!(connection.address(), format!("127.0.0.1:{}", server.port));
}

#[tokio::test]
async fn test_rejected_auth_ends_the_connection() {
    init_tracing();
    let server = FakeServer::start(Some("secret")).await;
    let mut params = server.params();
    params.password = Some("wrong".into());

    let (connection, mut events) = TcpConnector.open_standalone(params).unwrap();
    match next_terminal(&mut events).await {
        LifecycleEvent::Error(e) => assert_eq!(e.reply_kind(), Some(ReplyErrorKind::WrongPass)),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(next_terminal(&mut events).await, LifecycleEvent::End);
    assert!(!connection.is_ready());
}

#[tokio::test]
async fn test_refused_connection_reports_error_then_end() {
    init_tracing();
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let (_connection, mut events) = TcpConnector.open_standalone(params_for(port)).unwrap();
    match next_terminal(&mut events).await {
        LifecycleEvent::Error(e) => assert!(e.is_connection_error(), "{e:?}"),
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(next_terminal(&mut events).await, LifecycleEvent::End);
}

#[tokio::test]
async fn test_disconnect_stops_the_driver() {
    init_tracing();
    let server = FakeServer::start(None).await;
    let (connection, mut events) = TcpConnector.open_standalone(server.params()).unwrap();
    assert_eq!(next_terminal(&mut events).await, LifecycleEvent::Ready);

    connection.disconnect().await.unwrap();
    connection.disconnect().await.unwrap();
    assert_eq!(next_terminal(&mut events).await, LifecycleEvent::End);
    assert!(!connection.is_ready());

    let err = connection
        .send_command(vec![Bytes::from_static(b"PING")])
        .await
        .unwrap_err();
    assert_eq!(err, RediscopeError::NoConnection);
}

#[tokio::test]
async fn test_monitor_streams_parsed_events() {
    init_tracing();
    let server = FakeServer::start(None).await;
    let (connection, mut events) = TcpConnector.open_standalone(server.params()).unwrap();
    assert_eq!(next_terminal(&mut events).await, LifecycleEvent::Ready);

    let mut stream = connection.monitor().await.unwrap();
    let event = stream.next().await.unwrap().unwrap();
    assert_eq!(event.args, vec!["get", "k"]);
    assert_eq!(event.source, "127.0.0.1:50000");
    assert_eq!(event.shard, format!("127.0.0.1:{}", server.port));
    assert!(server.commands().contains(&vec!["MONITOR".to_string()]));
}
