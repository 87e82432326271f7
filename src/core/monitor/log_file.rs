// src/core/monitor/log_file.rs

//! A sink that appends every delivered command to a text file, one
//! MONITOR-style line per command.

use super::sink::{MONITOR_DATA_EVENT, MonitorSink};
use crate::core::RediscopeError;
use crate::core::protocol::CommandEvent;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::{File as TokioFile, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct LogFileSink {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<TokioFile>>>,
}

impl LogFileSink {
    /// Creates `<dir>/<database_id>-<utc timestamp>.log`, creating `dir` if needed.
    pub async fn create(dir: &Path, database_id: &str) -> Result<Self, RediscopeError> {
        tokio::fs::create_dir_all(dir).await?;
        let file_name = format!(
            "{}-{}.log",
            sanitize(database_id),
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ")
        );
        let path = dir.join(file_name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        debug!("Writing profiler log to {}", path.display());
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl MonitorSink for LogFileSink {
    async fn emit(&self, event: &str, payload: Value) -> Result<(), RediscopeError> {
        if event != MONITOR_DATA_EVENT {
            return Ok(());
        }
        let events: Vec<CommandEvent> = serde_json::from_value(payload)?;

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(RediscopeError::Internal("profiler log is closed".into()));
        };
        for event in &events {
            writer.write_all(event.to_line().as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
        Ok(())
    }

    async fn on_disconnect(&self) {
        let mut guard = self.writer.lock().await;
        if let Some(mut writer) = guard.take()
            && let Err(e) = writer.shutdown().await
        {
            warn!("Failed to close profiler log {}: {e}", self.path.display());
        }
    }
}
