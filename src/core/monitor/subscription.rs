// src/core/monitor/subscription.rs

//! One subscriber of a database's command stream and the task that feeds it.

use super::debounce::Debouncer;
use super::filter::EventFilter;
use super::sink::{
    EXCEPTION_EVENT, MONITOR_DATA_EVENT, MonitorException, MonitorSink, batch_payload,
    exception_payload,
};
use crate::core::protocol::CommandEvent;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep_until};
use tracing::{debug, warn};
use uuid::Uuid;

/// What an observer publishes to its subscribers.
#[derive(Debug, Clone)]
pub(super) enum ObserverMessage {
    Event(Arc<CommandEvent>),
    /// The upstream stream failed; every subscriber terminates.
    Failed(MonitorException),
}

#[derive(Debug)]
pub(super) enum Control {
    /// Flush and stop without notifying the sinks (pause).
    Stop,
    /// Flush, send the terminal notification, then stop.
    Terminate(MonitorException),
}

/// A subscriber registration: where batches go and which events it wants.
pub struct Subscription {
    subscriber_id: String,
    filters: Vec<Box<dyn EventFilter>>,
    sinks: Vec<Arc<dyn MonitorSink>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("subscriber_id", &self.subscriber_id)
            .field("filters", &self.filters)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Subscription {
    /// Creates a subscription with a random id delivering to `sink`.
    pub fn new(sink: Arc<dyn MonitorSink>) -> Self {
        Self {
            subscriber_id: Uuid::new_v4().to_string(),
            filters: Vec::new(),
            sinks: vec![sink],
        }
    }

    pub fn with_id(mut self, subscriber_id: impl Into<String>) -> Self {
        self.subscriber_id = subscriber_id.into();
        self
    }

    /// Appends a filter. Filters run in the order they were added.
    pub fn with_filter(mut self, filter: impl EventFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Delivers the same batches to an additional sink, e.g. a log file.
    pub fn with_sink(mut self, sink: Arc<dyn MonitorSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    fn accepts(&self, event: &CommandEvent) -> bool {
        for filter in &self.filters {
            match filter.accept(event) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    debug!(
                        "Filter {filter:?} failed for subscriber {}: {e}",
                        self.subscriber_id
                    );
                    return false;
                }
            }
        }
        true
    }

    async fn flush(&self, debouncer: &mut Debouncer<Arc<CommandEvent>>) {
        if debouncer.is_empty() {
            return;
        }
        let batch = debouncer.take();
        let payload = match batch_payload(&batch) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping batch of {} events: {e}", batch.len());
                return;
            }
        };
        for sink in &self.sinks {
            if let Err(e) = sink.emit(MONITOR_DATA_EVENT, payload.clone()).await {
                warn!("Sink of subscriber {} rejected a batch: {e}", self.subscriber_id);
            }
        }
    }

    async fn terminate(&self, exception: &MonitorException) {
        match exception_payload(exception) {
            Ok(payload) => {
                for sink in &self.sinks {
                    if let Err(e) = sink.emit(EXCEPTION_EVENT, payload.clone()).await {
                        debug!("Sink of subscriber {} rejected exception: {e}", self.subscriber_id);
                    }
                }
            }
            Err(e) => warn!("Could not encode exception: {e}"),
        }
        for sink in &self.sinks {
            sink.on_disconnect().await;
        }
    }
}

#[derive(Debug)]
pub(super) struct SubscriptionHandle {
    control: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub(super) fn spawn(
        subscription: Subscription,
        messages: broadcast::Receiver<ObserverMessage>,
        window: Duration,
        max_wait: Duration,
    ) -> Self {
        let (control, control_rx) = mpsc::unbounded_channel();
        let debouncer = Debouncer::new(window, max_wait);
        let task = tokio::spawn(run(subscription, messages, control_rx, debouncer));
        Self { control, task }
    }

    /// Sends `control` and waits for the task to finish.
    pub(super) async fn close(self, control: Control) {
        // The task may already have exited after an upstream failure.
        let _ = self.control.send(control);
        if let Err(e) = self.task.await {
            warn!("Subscription task failed: {e}");
        }
    }
}

async fn run(
    subscription: Subscription,
    mut messages: broadcast::Receiver<ObserverMessage>,
    mut control: mpsc::UnboundedReceiver<Control>,
    mut debouncer: Debouncer<Arc<CommandEvent>>,
) {
    let id = subscription.subscriber_id.clone();
    debug!("Subscriber {id} attached");

    loop {
        let deadline = debouncer.deadline();
        tokio::select! {
            biased;

            command = control.recv() => {
                subscription.flush(&mut debouncer).await;
                if let Some(Control::Terminate(exception)) = command {
                    subscription.terminate(&exception).await;
                }
                break;
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                subscription.flush(&mut debouncer).await;
            }
            message = messages.recv() => match message {
                Ok(ObserverMessage::Event(event)) => {
                    if subscription.accepts(&event) {
                        debouncer.push(event, Instant::now());
                    }
                }
                Ok(ObserverMessage::Failed(exception)) => {
                    subscription.flush(&mut debouncer).await;
                    subscription.terminate(&exception).await;
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber {id} is too slow, {skipped} events dropped");
                }
                Err(RecvError::Closed) => {
                    subscription.flush(&mut debouncer).await;
                    break;
                }
            },
        }
    }
    debug!("Subscriber {id} detached");
}
