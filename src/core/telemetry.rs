// src/core/telemetry.rs

//! Fire-and-forget analytics. Nothing recorded here may fail a client operation.

use crate::core::RediscopeError;
use crate::core::database::ConnectionType;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TelemetryEvent {
    RedisConnectionFailed {
        database_id: String,
        error: String,
    },
    ClientCreated {
        database_id: String,
        connection_type: ConnectionType,
    },
    MonitorStarted {
        database_id: String,
    },
    MonitorStopped {
        database_id: String,
    },
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &TelemetryEvent) -> Result<(), RediscopeError>;
}

/// Writes telemetry events to the log as JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: &TelemetryEvent) -> Result<(), RediscopeError> {
        let payload = serde_json::to_string(event)?;
        info!(target: "rediscope::telemetry", "{payload}");
        Ok(())
    }
}

/// Records `event`, logging and discarding any failure.
pub fn send(sink: &dyn TelemetrySink, event: TelemetryEvent) {
    if let Err(e) = sink.record(&event) {
        warn!("Dropping telemetry event {event:?}: {e}");
    }
}
