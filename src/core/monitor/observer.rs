// src/core/monitor/observer.rs

//! One upstream MONITOR session per database, fanned out to its subscribers.

use super::sink::{MonitorException, TerminationReason};
use super::subscription::{Control, ObserverMessage, Subscription, SubscriptionHandle};
use crate::config::MonitorConfig;
use crate::core::RediscopeError;
use crate::core::client::RedisClient;
use crate::core::native::CommandEventStream;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::select_all;
use parking_lot::Mutex;
use std::sync::Arc;
use strum_macros::Display;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ObserverStatus {
    Uninitialized,
    Connecting,
    Ready,
    Error,
    /// Torn down; the observer will not deliver anything again.
    Cleared,
}

impl ObserverStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ObserverStatus::Error | ObserverStatus::Cleared)
    }
}

#[derive(Debug)]
pub struct RedisObserver {
    database_id: String,
    settings: MonitorConfig,
    /// Guards status transitions together with the publication that goes with them.
    status: Mutex<ObserverStatus>,
    messages: broadcast::Sender<ObserverMessage>,
    subscriptions: DashMap<String, SubscriptionHandle>,
    client: Mutex<Option<Arc<RedisClient>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RedisObserver {
    pub(super) fn new(database_id: impl Into<String>, settings: &MonitorConfig) -> Arc<Self> {
        let (messages, _) = broadcast::channel(settings.channel_capacity.max(1));
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            database_id: database_id.into(),
            settings: settings.clone(),
            status: Mutex::new(ObserverStatus::Uninitialized),
            messages,
            subscriptions: DashMap::new(),
            client: Mutex::new(None),
            shutdown_tx,
        })
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    pub fn status(&self) -> ObserverStatus {
        *self.status.lock()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn subscriber_ids(&self) -> Vec<String> {
        self.subscriptions.iter().map(|e| e.key().clone()).collect()
    }

    /// Attaches a subscriber. A subscriber id already attached is replaced silently.
    ///
    /// The subscription is handed back if the observer has already failed or been cleared.
    pub(super) async fn add_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<(), Subscription> {
        let id = subscription.subscriber_id().to_string();
        // Inserted under the status lock so `retire_if_idle` never sees a half-attached subscriber.
        let previous = {
            let status = self.status.lock();
            if status.is_terminal() {
                return Err(subscription);
            }
            let handle = SubscriptionHandle::spawn(
                subscription,
                self.messages.subscribe(),
                self.settings.debounce_window,
                self.settings.max_wait,
            );
            self.subscriptions.insert(id, handle)
        };
        if let Some(previous) = previous {
            previous.close(Control::Stop).await;
        }
        Ok(())
    }

    /// Detaches a subscriber. `exception` is sent to its sinks before they are released.
    pub(super) async fn remove_subscription(
        &self,
        subscriber_id: &str,
        exception: Option<MonitorException>,
    ) -> bool {
        let Some((_, handle)) = self.subscriptions.remove(subscriber_id) else {
            return false;
        };
        let control = match exception {
            Some(exception) => Control::Terminate(exception),
            None => Control::Stop,
        };
        handle.close(control).await;
        true
    }

    /// Moves `Uninitialized` to `Connecting`. Only the caller that gets `true` connects.
    pub(super) fn begin_connect(&self) -> bool {
        let mut status = self.status.lock();
        if *status == ObserverStatus::Uninitialized {
            *status = ObserverStatus::Connecting;
            true
        } else {
            false
        }
    }

    /// Opens MONITOR on every node of `client` and starts publishing.
    ///
    /// The observer owns `client` from here on and disconnects it when it stops.
    pub(super) async fn connect(
        self: &Arc<Self>,
        client: Arc<RedisClient>,
    ) -> Result<(), RediscopeError> {
        *self.client.lock() = Some(client.clone());

        let streams = match client.monitor_streams().await {
            Ok(streams) => streams,
            Err(e) => {
                self.fail(MonitorException::new(
                    TerminationReason::ConnectionLost,
                    e.to_string(),
                ))
                .await;
                return Err(e);
            }
        };

        let became_ready = {
            let mut status = self.status.lock();
            if *status == ObserverStatus::Connecting {
                *status = ObserverStatus::Ready;
                true
            } else {
                false
            }
        };
        if !became_ready {
            // Cleared while connecting.
            drop(streams);
            self.release_client().await;
            return Ok(());
        }

        info!(
            "Monitoring database {} on {} node(s)",
            self.database_id,
            streams.len()
        );
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(self.clone().pump(streams, shutdown_rx));
        Ok(())
    }

    async fn pump(
        self: Arc<Self>,
        streams: Vec<CommandEventStream>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut merged = select_all(streams);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Monitor pump for {} stopped", self.database_id);
                    return;
                }
                next = merged.next() => match next {
                    Some(Ok(event)) => {
                        // No receivers only means nobody is subscribed right now.
                        let _ = self.messages.send(ObserverMessage::Event(Arc::new(event)));
                    }
                    Some(Err(e)) => {
                        warn!("Monitor stream for {} failed: {e}", self.database_id);
                        self.fail(MonitorException::new(
                            TerminationReason::ConnectionLost,
                            e.to_string(),
                        ))
                        .await;
                        return;
                    }
                    None => {
                        warn!("Monitor stream for {} ended", self.database_id);
                        self.fail(MonitorException::new(
                            TerminationReason::ConnectionLost,
                            RediscopeError::ServerClosedConnection.to_string(),
                        ))
                        .await;
                        return;
                    }
                },
            }
        }
    }

    /// Marks the observer failed and terminates every subscriber with `exception`.
    pub(super) async fn fail(&self, exception: MonitorException) {
        {
            let mut status = self.status.lock();
            if *status == ObserverStatus::Cleared {
                return;
            }
            *status = ObserverStatus::Error;
            let _ = self
                .messages
                .send(ObserverMessage::Failed(exception.clone()));
        }
        let _ = self.shutdown_tx.send(());

        // A subscriber that already handled the failure message ignores this.
        for id in self.subscriber_ids() {
            self.remove_subscription(&id, Some(exception.clone())).await;
        }
        self.release_client().await;
    }

    /// Tears the observer down, sending `exception` to every remaining subscriber.
    pub(super) async fn clear(&self, exception: MonitorException) {
        *self.status.lock() = ObserverStatus::Cleared;
        let _ = self.shutdown_tx.send(());

        for id in self.subscriber_ids() {
            self.remove_subscription(&id, Some(exception.clone())).await;
        }
        self.release_client().await;
    }

    /// Marks the observer `Cleared` if nobody is subscribed. A subscriber attached
    /// afterwards is refused, so the caller may stop the observer.
    pub(super) fn retire_if_idle(&self) -> bool {
        let mut status = self.status.lock();
        if *status == ObserverStatus::Cleared || !self.subscriptions.is_empty() {
            return false;
        }
        *status = ObserverStatus::Cleared;
        true
    }

    /// Stops the upstream session.
    pub(super) async fn stop(&self) {
        *self.status.lock() = ObserverStatus::Cleared;
        let _ = self.shutdown_tx.send(());
        self.release_client().await;
    }

    async fn release_client(&self) {
        let client = self.client.lock().take();
        if let Some(client) = client
            && let Err(e) = client.disconnect().await
        {
            warn!("Failed to disconnect monitor client for {}: {e}", self.database_id);
        }
    }
}
