// src/core/native/sentinel.rs

//! Sentinel support for the default connector: ask the sentinels for the current
//! master, then connect to it like a standalone node.

use super::connection::TcpConnection;
use super::{
    CommandEventStream, ConnectParams, LifecycleEvent, LifecycleEvents, NativeConnection,
    SentinelParams, stream, tls,
};
use crate::core::RediscopeError;
use crate::core::database::Endpoint;
use crate::core::protocol::RespFrame;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

#[derive(Debug)]
pub(super) struct SentinelConnection {
    params: SentinelParams,
    master: Mutex<Option<Arc<TcpConnection>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SentinelConnection {
    pub(super) fn open(
        params: SentinelParams,
    ) -> Result<(Arc<Self>, LifecycleEvents), RediscopeError> {
        if params.sentinels.is_empty() {
            return Err(RediscopeError::ConnectionFailed(
                "no sentinel endpoints configured".into(),
            ));
        }
        if let Some(settings) = &params.node.tls {
            tls::setup(settings, &params.sentinels[0].host)?;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let connection = Arc::new(Self {
            params,
            master: Mutex::new(None),
            shutdown_tx,
        });
        tokio::spawn(connection.clone().connect(events_tx, shutdown_rx));
        Ok((connection, events_rx))
    }

    fn current(&self) -> Option<Arc<TcpConnection>> {
        self.master.lock().clone()
    }

    async fn connect(
        self: Arc<Self>,
        events: mpsc::UnboundedSender<LifecycleEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut attempt: u32 = 0;
        let master = loop {
            let resolved = tokio::select! {
                resolved = self.resolve_master() => resolved,
                _ = shutdown_rx.recv() => {
                    let _ = events.send(LifecycleEvent::End);
                    return;
                }
            };
            match resolved {
                Ok(endpoint) => break endpoint,
                Err(e) => {
                    warn!("Sentinel lookup for '{}' failed: {e}", self.params.master_name);
                    let _ = events.send(LifecycleEvent::Error(e));
                }
            }
            attempt += 1;
            let Some(delay) = self
                .params
                .node
                .retry
                .as_ref()
                .and_then(|policy| policy.retry_strategy(attempt))
            else {
                let _ = events.send(LifecycleEvent::End);
                return;
            };
            let _ = events.send(LifecycleEvent::Reconnecting { attempt, delay });
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => {
                    let _ = events.send(LifecycleEvent::End);
                    return;
                }
            }
        };

        info!("Sentinel resolved master '{}' to {master}", self.params.master_name);
        let tls = match self.params.node.tls.as_ref().map(|s| tls::setup(s, &master.host)) {
            Some(Err(e)) => {
                let _ = events.send(LifecycleEvent::Error(e));
                let _ = events.send(LifecycleEvent::End);
                return;
            }
            Some(Ok(setup)) => Some(setup),
            None => None,
        };
        let params = ConnectParams {
            endpoint: master,
            ..self.params.node.clone()
        };
        let (connection, mut master_events) = TcpConnection::open(params, tls);
        *self.master.lock() = Some(connection.clone());

        // A disconnect that raced the lookup must still close the master connection.
        if shutdown_rx.try_recv().is_ok() {
            let _ = connection.disconnect().await;
        }
        while let Some(event) = master_events.recv().await {
            let _ = events.send(event);
        }
    }

    async fn resolve_master(&self) -> Result<Endpoint, RediscopeError> {
        let mut last_error = None;
        for sentinel in &self.params.sentinels {
            match self.ask_sentinel(sentinel).await {
                Ok(endpoint) => return Ok(endpoint),
                Err(e) => {
                    debug!("Sentinel {sentinel} could not resolve master: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(RediscopeError::NoConnection))
    }

    async fn ask_sentinel(&self, sentinel: &Endpoint) -> Result<Endpoint, RediscopeError> {
        let params = ConnectParams {
            endpoint: sentinel.clone(),
            username: self.params.sentinel_username.clone(),
            password: self.params.sentinel_password.clone(),
            db: 0,
            retry: None,
            ..self.params.node.clone()
        };
        let tls = params
            .tls
            .as_ref()
            .map(|s| tls::setup(s, &sentinel.host))
            .transpose()?;
        let mut framed = stream::establish(&params, tls.as_ref()).await?;
        let reply = stream::call(
            &mut framed,
            vec![
                "SENTINEL".into(),
                "get-master-addr-by-name".into(),
                Bytes::from(self.params.master_name.clone()),
            ],
        )
        .await?
        .into_result()?;

        match reply {
            RespFrame::Array(parts) if parts.len() == 2 => {
                let host = parts[0].as_text();
                let port = parts[1].as_text().and_then(|p| p.parse::<u16>().ok());
                match (host, port) {
                    (Some(host), Some(port)) => Ok(Endpoint::new(host, port)),
                    _ => Err(RediscopeError::Protocol(
                        "malformed SENTINEL get-master-addr-by-name reply".into(),
                    )),
                }
            }
            RespFrame::Null => Err(RediscopeError::ConnectionFailed(format!(
                "sentinel does not know master '{}'",
                self.params.master_name
            ))),
            other => Err(RediscopeError::Protocol(format!(
                "unexpected sentinel reply: {other:?}"
            ))),
        }
    }
}

#[async_trait]
impl NativeConnection for SentinelConnection {
    async fn send_command(&self, args: Vec<Bytes>) -> Result<RespFrame, RediscopeError> {
        match self.current() {
            Some(master) => master.send_command(args).await,
            None => Err(RediscopeError::NoConnection),
        }
    }

    fn is_ready(&self) -> bool {
        self.current().is_some_and(|m| m.is_ready())
    }

    async fn disconnect(&self) -> Result<(), RediscopeError> {
        let _ = self.shutdown_tx.send(());
        if let Some(master) = self.current() {
            master.disconnect().await?;
        }
        Ok(())
    }

    fn address(&self) -> String {
        self.current()
            .map(|m| m.address())
            .unwrap_or_else(|| self.params.master_name.clone())
    }

    async fn monitor(&self) -> Result<CommandEventStream, RediscopeError> {
        match self.current() {
            Some(master) => master.monitor().await,
            None => Err(RediscopeError::NoConnection),
        }
    }
}
