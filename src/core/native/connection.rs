// src/core/native/connection.rs

//! A single-node connection driven by one background task.
//!
//! The task owns the socket, answers queued requests strictly in order, and
//! reconnects according to the retry policy. Callers only see a request channel
//! and the lifecycle events.

use super::stream::{self, NodeFramed};
use super::tls::TlsSetup;
use super::{CommandEventStream, ConnectParams, LifecycleEvent, LifecycleEvents, NativeConnection};
use crate::core::RediscopeError;
use crate::core::protocol::{CommandEvent, RespFrame};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

struct Request {
    frame: RespFrame,
    reply: oneshot::Sender<Result<RespFrame, RediscopeError>>,
}

enum Outcome {
    Shutdown,
    Lost(RediscopeError),
}

#[derive(Debug)]
pub(super) struct TcpConnection {
    params: ConnectParams,
    tls: Option<TlsSetup>,
    requests: mpsc::UnboundedSender<Request>,
    ready: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request").field("frame", &self.frame).finish()
    }
}

impl TcpConnection {
    /// Spawns the driver task and returns the pending connection.
    pub(super) fn open(
        params: ConnectParams,
        tls: Option<TlsSetup>,
    ) -> (Arc<Self>, LifecycleEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let ready = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            params: params.clone(),
            tls: tls.clone(),
            requests: requests_rx,
            events: events_tx,
            ready: ready.clone(),
            shutdown_rx,
        };
        tokio::spawn(driver.run());

        let connection = Arc::new(Self {
            params,
            tls,
            requests: requests_tx,
            ready,
            shutdown_tx,
        });
        (connection, events_rx)
    }
}

#[async_trait]
impl NativeConnection for TcpConnection {
    async fn send_command(&self, args: Vec<Bytes>) -> Result<RespFrame, RediscopeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(Request {
                frame: RespFrame::command(args),
                reply: reply_tx,
            })
            .map_err(|_| RediscopeError::NoConnection)?;
        reply_rx.await.map_err(|_| RediscopeError::NoConnection)?
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn disconnect(&self) -> Result<(), RediscopeError> {
        self.ready.store(false, Ordering::Release);
        // No receiver means the driver has already stopped.
        let _ = self.shutdown_tx.send(());
        Ok(())
    }

    fn address(&self) -> String {
        self.params.endpoint.to_string()
    }

    async fn monitor(&self) -> Result<CommandEventStream, RediscopeError> {
        let mut params = self.params.clone();
        params.retry = None;
        let shard = self.address();
        let mut framed = stream::establish(&params, self.tls.as_ref()).await?;
        stream::call(&mut framed, vec![Bytes::from_static(b"MONITOR")])
            .await?
            .into_result()?;
        info!("MONITOR started on {shard}");
        Ok(monitor_stream(framed, shard))
    }
}

fn monitor_stream(mut framed: NodeFramed, shard: String) -> CommandEventStream {
    let stream = async_stream::stream! {
        while let Some(frame) = framed.next().await {
            match frame {
                Ok(RespFrame::SimpleString(line)) => yield CommandEvent::parse(&line, &shard),
                Ok(RespFrame::Error(message)) => {
                    yield Err(RediscopeError::reply(message));
                    break;
                }
                Ok(other) => debug!("Ignoring unexpected MONITOR frame from {shard}: {other:?}"),
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
        debug!("MONITOR stream from {shard} ended");
    };
    Box::pin(stream)
}

struct Driver {
    params: ConnectParams,
    tls: Option<TlsSetup>,
    requests: mpsc::UnboundedReceiver<Request>,
    events: mpsc::UnboundedSender<LifecycleEvent>,
    ready: Arc<AtomicBool>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Driver {
    fn emit(&self, event: LifecycleEvent) {
        // Nobody listening is fine; the strategy drops the receiver once settled.
        let _ = self.events.send(event);
    }

    async fn run(mut self) {
        let address = self.params.endpoint.to_string();
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                result = stream::establish(&self.params, self.tls.as_ref()) => result,
                _ = self.shutdown_rx.recv() => break,
            };

            match connected {
                Ok(framed) => {
                    attempt = 0;
                    self.emit(LifecycleEvent::Connect);
                    self.ready.store(true, Ordering::Release);
                    self.emit(LifecycleEvent::Ready);

                    let outcome = self.serve(framed).await;
                    self.ready.store(false, Ordering::Release);
                    match outcome {
                        Outcome::Shutdown => break,
                        Outcome::Lost(e) => {
                            warn!("Connection to {address} lost: {e}");
                            self.emit(LifecycleEvent::Error(e));
                        }
                    }
                }
                Err(e) => {
                    debug!("Connection attempt to {address} failed: {e}");
                    self.emit(LifecycleEvent::Error(e));
                }
            }

            attempt += 1;
            if self.params.max_retries_per_request.is_some_and(|max| attempt > max) {
                self.fail_queued();
            }
            let Some(delay) = self
                .params
                .retry
                .as_ref()
                .and_then(|policy| policy.retry_strategy(attempt))
            else {
                break;
            };
            info!("Reconnecting to {address} in {delay:?} (attempt {attempt})");
            self.emit(LifecycleEvent::Reconnecting { attempt, delay });
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown_rx.recv() => break,
            }
        }

        self.ready.store(false, Ordering::Release);
        self.emit(LifecycleEvent::End);
        debug!("Driver for {address} stopped");
    }

    fn fail_queued(&mut self) {
        while let Ok(request) = self.requests.try_recv() {
            let _ = request.reply.send(Err(RediscopeError::NoConnection));
        }
    }

    async fn serve(&mut self, mut framed: NodeFramed) -> Outcome {
        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => return Outcome::Shutdown,
                request = self.requests.recv() => {
                    let Some(request) = request else {
                        return Outcome::Shutdown;
                    };
                    if let Err(e) = framed.send(request.frame).await {
                        let _ = request.reply.send(Err(e.clone()));
                        return Outcome::Lost(e);
                    }
                    match framed.next().await {
                        Some(Ok(frame)) => {
                            let _ = request.reply.send(Ok(frame));
                        }
                        Some(Err(e)) => {
                            let _ = request.reply.send(Err(e.clone()));
                            return Outcome::Lost(e);
                        }
                        None => {
                            let _ = request.reply.send(Err(RediscopeError::ServerClosedConnection));
                            return Outcome::Lost(RediscopeError::ServerClosedConnection);
                        }
                    }
                }
                unsolicited = framed.next() => match unsolicited {
                    None => return Outcome::Lost(RediscopeError::ServerClosedConnection),
                    Some(Err(e)) => return Outcome::Lost(e),
                    Some(Ok(frame)) => debug!("Dropping unsolicited frame: {frame:?}"),
                },
            }
        }
    }
}
