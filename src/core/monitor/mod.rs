// src/core/monitor/mod.rs

//! Live command monitoring.
//!
//! Each database with at least one subscriber has a single `RedisObserver`
//! holding one MONITOR session per node. The observer fans events out to its
//! subscriptions; each subscription filters them, batches them with a
//! trailing-edge debounce capped by a maximum wait, and hands batches to its
//! sinks. The observer goes away with its last subscriber.

mod debounce;
mod filter;
mod log_file;
mod observer;
mod sink;
mod subscription;

pub use debounce::Debouncer;
pub use filter::{CommandGroup, CommandGroupFilter, CurrentClientFilter, EventFilter};
pub use log_file::LogFileSink;
pub use observer::{ObserverStatus, RedisObserver};
pub use sink::{
    EXCEPTION_EVENT, MONITOR_DATA_EVENT, MonitorException, MonitorSink, TerminationReason,
};
pub use subscription::Subscription;

use crate::config::MonitorConfig;
use crate::core::RediscopeError;
use crate::core::events::{ClientEvent, ClientEventBus};
use crate::core::factory::DatabaseClientFactory;
use crate::core::metadata::{ClientContext, ClientMetadata, SessionMetadata};
use crate::core::telemetry::{self, TelemetryEvent, TelemetrySink};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Session owner recorded on the clients opened for monitoring.
const MONITOR_USER: &str = "rediscope-monitor";

pub struct MonitorService {
    factory: Arc<DatabaseClientFactory>,
    telemetry: Arc<dyn TelemetrySink>,
    settings: MonitorConfig,
    observers: DashMap<String, Arc<RedisObserver>>,
}

impl MonitorService {
    pub fn new(
        factory: Arc<DatabaseClientFactory>,
        telemetry: Arc<dyn TelemetrySink>,
        settings: MonitorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            factory,
            telemetry,
            settings,
            observers: DashMap::new(),
        })
    }

    pub fn settings(&self) -> &MonitorConfig {
        &self.settings
    }

    /// Attaches `subscription` to the database's observer, starting the
    /// observer and its upstream connection if this is the first subscriber.
    ///
    /// If the connection cannot be established, the subscription is
    /// terminated with `ConnectionLost` and the error is returned.
    pub async fn subscribe(
        &self,
        database_id: &str,
        subscription: Subscription,
    ) -> Result<(), RediscopeError> {
        let subscriber_id = subscription.subscriber_id().to_string();
        let mut pending = subscription;
        let observer = loop {
            let observer = {
                let mut entry = self
                    .observers
                    .entry(database_id.to_string())
                    .or_insert_with(|| RedisObserver::new(database_id, &self.settings));
                if entry.status().is_terminal() {
                    *entry = RedisObserver::new(database_id, &self.settings);
                }
                entry.value().clone()
            };
            // A terminal observer hands the subscription back; retry on a fresh one.
            match observer.add_subscription(pending).await {
                Ok(()) => break observer,
                Err(returned) => pending = returned,
            }
        };
        debug!("Subscriber {subscriber_id} attached to monitor of {database_id}");

        if !observer.begin_connect() {
            return Ok(());
        }

        telemetry::send(
            self.telemetry.as_ref(),
            TelemetryEvent::MonitorStarted {
                database_id: database_id.to_string(),
            },
        );
        let metadata = ClientMetadata::new(
            SessionMetadata::new(MONITOR_USER, Uuid::new_v4().to_string()),
            database_id,
            ClientContext::Profiler,
        );
        let connected = match self.factory.create_client(&metadata).await {
            Ok(client) => observer.connect(client).await,
            Err(e) => {
                observer
                    .fail(MonitorException::new(
                        TerminationReason::ConnectionLost,
                        e.to_string(),
                    ))
                    .await;
                Err(e)
            }
        };

        if let Err(e) = connected {
            warn!("Could not start monitor for {database_id}: {e}");
            self.discard(database_id, &observer).await;
            return Err(e);
        }
        info!("Monitor for {database_id} is ready");
        Ok(())
    }

    /// Stops delivery to one subscriber without notifying it (a pause).
    /// Returns whether the subscriber was attached.
    pub async fn unsubscribe(&self, database_id: &str, subscriber_id: &str) -> bool {
        self.detach(database_id, subscriber_id, None).await
    }

    /// Like `unsubscribe`, but tells the subscriber's sinks the connection is gone.
    pub async fn disconnect(&self, database_id: &str, subscriber_id: &str) -> bool {
        let exception = MonitorException::new(
            TerminationReason::Disconnected,
            "Monitor subscription was disconnected",
        );
        self.detach(database_id, subscriber_id, Some(exception)).await
    }

    /// Terminates every subscriber of the database and drops its observer.
    pub async fn handle_database_deleted(&self, database_id: &str) {
        let Some((_, observer)) = self.observers.remove(database_id) else {
            return;
        };
        info!("Database {database_id} deleted, closing its monitor");
        observer
            .clear(MonitorException::new(
                TerminationReason::DatabaseDeleted,
                format!("Database {database_id} was deleted"),
            ))
            .await;
        self.record_stopped(database_id);
    }

    pub fn observer_status(&self, database_id: &str) -> Option<ObserverStatus> {
        self.observers.get(database_id).map(|o| o.status())
    }

    pub fn subscriber_count(&self, database_id: &str) -> usize {
        self.observers
            .get(database_id)
            .map(|o| o.subscriber_count())
            .unwrap_or(0)
    }

    /// Reacts to `DatabaseDeleted` published on `events` until `shutdown_rx` fires.
    pub fn spawn_event_listener(
        self: &Arc<Self>,
        events: &ClientEventBus,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let service = self.clone();
        let mut events = events.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    event = events.recv() => match event {
                        Ok(ClientEvent::DatabaseDeleted { database_id }) => {
                            service.handle_database_deleted(&database_id).await;
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Monitor event listener skipped {skipped} client events");
                        }
                        Err(RecvError::Closed) => return,
                    },
                }
            }
        })
    }

    /// Stops every observer. Subscribers are released without a notification.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.observers.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, observer)) = self.observers.remove(&id) {
                for subscriber_id in observer.subscriber_ids() {
                    observer.remove_subscription(&subscriber_id, None).await;
                }
                observer.stop().await;
                self.record_stopped(&id);
            }
        }
    }

    async fn detach(
        &self,
        database_id: &str,
        subscriber_id: &str,
        exception: Option<MonitorException>,
    ) -> bool {
        let Some(observer) = self.observers.get(database_id).map(|o| o.value().clone()) else {
            return false;
        };
        let removed = observer.remove_subscription(subscriber_id, exception).await;

        if observer.retire_if_idle() {
            debug!("Last subscriber of {database_id} left, stopping monitor");
            self.observers
                .remove_if(database_id, |_, stored| Arc::ptr_eq(stored, &observer));
            observer.stop().await;
            self.record_stopped(database_id);
        }
        removed
    }

    async fn discard(&self, database_id: &str, observer: &Arc<RedisObserver>) {
        let removed = self
            .observers
            .remove_if(database_id, |_, stored| Arc::ptr_eq(stored, observer));
        if removed.is_some() {
            self.record_stopped(database_id);
        }
    }

    fn record_stopped(&self, database_id: &str) {
        telemetry::send(
            self.telemetry.as_ref(),
            TelemetryEvent::MonitorStopped {
                database_id: database_id.to_string(),
            },
        );
    }
}
