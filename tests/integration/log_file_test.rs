// tests/integration/log_file_test.rs

use super::test_helpers::command_event;
use rediscope::core::RediscopeError;
use rediscope::core::monitor::{EXCEPTION_EVENT, LogFileSink, MONITOR_DATA_EVENT, MonitorSink};
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn test_log_file_is_named_after_database() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("profiler");
    let sink = LogFileSink::create(&nested, "prod/cache:1").await.unwrap();

    assert!(sink.path().starts_with(&nested));
    let name = sink.path().file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("prod_cache_1-"), "{name}");
    assert!(name.ends_with(".log"), "{name}");
    assert!(sink.path().exists());
}

#[tokio::test]
async fn test_batches_are_written_as_monitor_lines() {
    let dir = TempDir::new().unwrap();
    let sink = LogFileSink::create(dir.path(), "db-1").await.unwrap();

    let batch = vec![
        command_event(&["SET", "greeting", "hello world"], "127.0.0.1:50000"),
        command_event(&["GET", "greeting"], "lua"),
    ];
    sink.emit(MONITOR_DATA_EVENT, serde_json::to_value(&batch).unwrap())
        .await
        .unwrap();
    sink.emit(
        MONITOR_DATA_EVENT,
        serde_json::to_value(vec![command_event(&["PING"], "127.0.0.1:50000")]).unwrap(),
    )
    .await
    .unwrap();

    let content = tokio::fs::read_to_string(sink.path()).await.unwrap();
    assert_eq!(
        content.lines().collect::<Vec<_>>(),
        vec![
            r#"1700000000.000001 [0 127.0.0.1:50000] "SET" "greeting" "hello world""#,
            r#"1700000000.000001 [0 lua] "GET" "greeting""#,
            r#"1700000000.000001 [0 127.0.0.1:50000] "PING""#,
        ]
    );
}

#[tokio::test]
async fn test_other_events_are_ignored() {
    let dir = TempDir::new().unwrap();
    let sink = LogFileSink::create(dir.path(), "db-1").await.unwrap();

    sink.emit(
        EXCEPTION_EVENT,
        json!({"reason": "ConnectionLost", "message": "gone"}),
    )
    .await
    .unwrap();
    let content = tokio::fs::read_to_string(sink.path()).await.unwrap();
    assert!(content.is_empty());
}

#[tokio::test]
async fn test_closed_log_rejects_batches() {
    let dir = TempDir::new().unwrap();
    let sink = LogFileSink::create(dir.path(), "db-1").await.unwrap();
    sink.on_disconnect().await;
    sink.on_disconnect().await;

    let err = sink
        .emit(
            MONITOR_DATA_EVENT,
            serde_json::to_value(vec![command_event(&["PING"], "lua")]).unwrap(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, RediscopeError::Internal("profiler log is closed".into()));
}

#[tokio::test]
async fn test_malformed_payload_is_an_error() {
    let dir = TempDir::new().unwrap();
    let sink = LogFileSink::create(dir.path(), "db-1").await.unwrap();
    let err = sink
        .emit(MONITOR_DATA_EVENT, json!({"not": "a batch"}))
        .await
        .unwrap_err();
    assert!(matches!(err, RediscopeError::Internal(_)));
}
