// src/core/monitor/sink.rs

//! The outbound side of a subscription: a duplex UI channel seen from the core.

use crate::core::RediscopeError;
use crate::core::protocol::CommandEvent;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use strum_macros::{AsRefStr, Display};

/// Event name of a flushed batch of commands.
pub const MONITOR_DATA_EVENT: &str = "monitorData";
/// Event name of a terminal notification.
pub const EXCEPTION_EVENT: &str = "exception";

#[async_trait]
pub trait MonitorSink: Send + Sync {
    async fn emit(&self, event: &str, payload: Value) -> Result<(), RediscopeError>;

    /// Called once when the subscription ends because its database went away.
    async fn on_disconnect(&self);
}

/// Why a subscription was terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
pub enum TerminationReason {
    /// The upstream MONITOR connection failed or could not be opened.
    ConnectionLost,
    /// The subscriber was disconnected.
    Disconnected,
    /// The database was deleted.
    DatabaseDeleted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorException {
    pub reason: TerminationReason,
    pub message: String,
}

impl MonitorException {
    pub fn new(reason: TerminationReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

pub(crate) fn batch_payload(batch: &[Arc<CommandEvent>]) -> Result<Value, RediscopeError> {
    let events: Vec<&CommandEvent> = batch.iter().map(Arc::as_ref).collect();
    Ok(serde_json::to_value(events)?)
}

pub(crate) fn exception_payload(exception: &MonitorException) -> Result<Value, RediscopeError> {
    Ok(serde_json::to_value(exception)?)
}
