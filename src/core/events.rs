// src/core/events.rs

//! Broadcasts database-level events to whoever needs to react to them
//! (the monitor service, the binary, a UI layer outside this crate).

use crate::core::RediscopeError;
use tokio::sync::broadcast;
use tracing::debug;

/// The capacity of the event broadcast channel. Slow subscribers that fall
/// further behind than this see `Lagged` and skip ahead.
const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Creating a client for the database failed with a connection error.
    DatabaseConnectionFailed {
        database_id: String,
        error: RediscopeError,
    },
    /// The database was deleted; everything attached to it must be torn down.
    DatabaseDeleted { database_id: String },
}

#[derive(Debug, Clone)]
pub struct ClientEventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl Default for ClientEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: ClientEvent) {
        // It's okay if there are no active subscribers.
        if self.sender.send(event).is_err() {
            debug!("Published a client event with no active subscribers.");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }
}
