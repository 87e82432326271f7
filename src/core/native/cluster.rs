// src/core/native/cluster.rs

//! Cluster support for the default connector: slot discovery through
//! `CLUSTER SLOTS`, one connection per node, and key-slot routing with a
//! single redirect follow-up for `MOVED` and `ASK`.

use super::connection::TcpConnection;
use super::stream;
use super::tls;
use super::{
    ClusterParams, ConnectParams, LifecycleEvent, LifecycleEvents, NativeCluster,
    NativeConnection, NodeRole,
};
use crate::core::database::Endpoint;
use crate::core::errors::ReplyErrorKind;
use crate::core::protocol::RespFrame;
use crate::core::protocol::slot::{NUM_SLOTS, key_slot, routing_key};
use crate::core::RediscopeError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct SlotRange {
    start: u16,
    end: u16,
    primary: Endpoint,
    replicas: Vec<Endpoint>,
}

#[derive(Debug, Clone)]
struct ClusterNode {
    connection: Arc<TcpConnection>,
    primary: bool,
}

#[derive(Debug)]
pub(super) struct TcpCluster {
    params: ClusterParams,
    // Keyed by `host:port`; BTreeMap keeps `nodes()` ordering stable.
    nodes: RwLock<BTreeMap<String, ClusterNode>>,
    slots: RwLock<Vec<Option<String>>>,
    ready: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
}

impl TcpCluster {
    pub(super) fn open(params: ClusterParams) -> Result<(Arc<Self>, LifecycleEvents), RediscopeError> {
        if params.seeds.is_empty() {
            return Err(RediscopeError::ClusterConnection {
                message: "no seed nodes configured".into(),
                last_node_error: None,
            });
        }
        // Surface malformed TLS material before anything is spawned.
        if let Some(settings) = &params.node.tls {
            tls::setup(settings, &params.seeds[0].host)?;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let cluster = Arc::new(Self {
            params,
            nodes: RwLock::new(BTreeMap::new()),
            slots: RwLock::new(vec![None; NUM_SLOTS as usize]),
            ready: AtomicBool::new(false),
            shutdown_tx,
        });

        tokio::spawn(cluster.clone().connect(events_tx, shutdown_rx));
        Ok((cluster, events_rx))
    }

    fn node_params(&self, endpoint: &Endpoint) -> ConnectParams {
        ConnectParams {
            endpoint: endpoint.clone(),
            ..self.params.node.clone()
        }
    }

    fn tls_for(&self, host: &str) -> Result<Option<tls::TlsSetup>, RediscopeError> {
        self.params
            .node
            .tls
            .as_ref()
            .map(|settings| tls::setup(settings, host))
            .transpose()
    }

    async fn connect(
        self: Arc<Self>,
        events: mpsc::UnboundedSender<LifecycleEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut attempt: u32 = 0;
        loop {
            let result = tokio::select! {
                result = self.bootstrap() => result,
                _ = shutdown_rx.recv() => break,
            };
            match result {
                Ok(()) => {
                    self.ready.store(true, Ordering::Release);
                    let _ = events.send(LifecycleEvent::Ready);
                    info!("Cluster connection ready ({} nodes)", self.nodes.read().len());
                    // Stay alive until shutdown so a late `disconnect` still reports `End`.
                    let _ = shutdown_rx.recv().await;
                    break;
                }
                Err(node_error) => {
                    warn!("Cluster bootstrap failed: {node_error}");
                    let mismatch = node_error.is_topology_mismatch();
                    let _ = events.send(LifecycleEvent::Error(RediscopeError::ClusterConnection {
                        message: "Failed to refresh slots cache.".into(),
                        last_node_error: Some(Box::new(node_error)),
                    }));
                    // Retrying cannot turn a standalone server into a cluster.
                    if mismatch {
                        break;
                    }
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
                break;
            };
            let _ = events.send(LifecycleEvent::Reconnecting { attempt, delay });
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }
        self.ready.store(false, Ordering::Release);
        let _ = events.send(LifecycleEvent::End);
    }

    /// Discovers the slot map from the first seed that answers, then connects every node.
    async fn bootstrap(&self) -> Result<(), RediscopeError> {
        let mut last_error = None;
        let mut ranges = None;
        for seed in &self.params.seeds {
            match self.fetch_slots(seed).await {
                Ok(found) => {
                    ranges = Some(found);
                    break;
                }
                Err(e) => {
                    debug!("Seed {seed} did not return a slot map: {e}");
                    last_error = Some(e);
                }
            }
        }
        let ranges = match ranges {
            Some(ranges) => ranges,
            None => return Err(last_error.unwrap_or(RediscopeError::NoConnection)),
        };

        // Every node's TLS setup is resolved before the first connection opens,
        // so a bad advertised host cannot strand half-opened nodes.
        let mut table = vec![None; NUM_SLOTS as usize];
        let mut planned: BTreeMap<String, (Endpoint, bool, Option<tls::TlsSetup>)> =
            BTreeMap::new();
        for range in &ranges {
            let primary = range.primary.to_string();
            for slot in range.start..=range.end.min(NUM_SLOTS - 1) {
                table[slot as usize] = Some(primary.clone());
            }
            let members = std::iter::once((&range.primary, true))
                .chain(range.replicas.iter().map(|r| (r, false)));
            for (endpoint, primary) in members {
                let address = endpoint.to_string();
                if planned.contains_key(&address) {
                    continue;
                }
                let tls = self.tls_for(&endpoint.host)?;
                planned.insert(address, (endpoint.clone(), primary, tls));
            }
        }

        let mut pending = Vec::new();
        let mut nodes = BTreeMap::new();
        for (address, (endpoint, primary, tls)) in planned {
            let (connection, events) = TcpConnection::open(self.node_params(&endpoint), tls);
            if primary {
                pending.push((address.clone(), events));
            } else {
                tokio::spawn(drain_events(address.clone(), events));
            }
            nodes.insert(address, ClusterNode { connection, primary });
        }

        let results = join_all(pending.into_iter().map(|(address, mut events)| async move {
            let ready = await_ready(&mut events).await;
            tokio::spawn(drain_events(address.clone(), events));
            ready.map_err(|e| (address, e))
        }))
        .await;

        if let Some((address, error)) = results.into_iter().find_map(Result::err) {
            disconnect_all(&nodes).await;
            warn!("Primary {address} failed to connect");
            return Err(error);
        }

        *self.slots.write() = table;
        let previous = std::mem::replace(&mut *self.nodes.write(), nodes);
        disconnect_all(&previous).await;
        Ok(())
    }

    async fn fetch_slots(&self, seed: &Endpoint) -> Result<Vec<SlotRange>, RediscopeError> {
        let mut params = self.node_params(seed);
        params.retry = None;
        params.connection_name = None;
        let tls = self.tls_for(&seed.host)?;
        let mut framed = stream::establish(&params, tls.as_ref()).await?;
        let reply = stream::call(&mut framed, vec!["CLUSTER".into(), "SLOTS".into()]).await?;

        match reply {
            RespFrame::Error(message) if message.contains("cluster support disabled") => {
                Err(RediscopeError::NotACluster(message))
            }
            RespFrame::Error(message) => Err(RediscopeError::reply(message)),
            RespFrame::Array(items) => {
                let ranges = items
                    .iter()
                    .map(|item| parse_slot_range(item, &seed.host))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| RediscopeError::Protocol("malformed CLUSTER SLOTS reply".into()))?;
                if ranges.is_empty() {
                    return Err(RediscopeError::ClusterConnection {
                        message: "cluster has no assigned slots".into(),
                        last_node_error: None,
                    });
                }
                Ok(ranges)
            }
            other => Err(RediscopeError::Protocol(format!(
                "unexpected CLUSTER SLOTS reply: {other:?}"
            ))),
        }
    }

    fn node(&self, address: &str) -> Option<Arc<TcpConnection>> {
        self.nodes.read().get(address).map(|n| n.connection.clone())
    }

    fn any_primary(&self) -> Option<Arc<TcpConnection>> {
        self.nodes
            .read()
            .values()
            .find(|n| n.primary)
            .map(|n| n.connection.clone())
    }

    fn route(&self, args: &[Bytes]) -> Result<Arc<TcpConnection>, RediscopeError> {
        let owner = routing_key(args)
            .and_then(|key| self.slots.read()[key_slot(key) as usize].clone())
            .and_then(|address| self.node(&address));
        owner
            .or_else(|| self.any_primary())
            .ok_or(RediscopeError::NoConnection)
    }

    /// Returns the connection for a redirect target, opening one if the node is new.
    async fn redirect_target(&self, address: &str) -> Result<Arc<TcpConnection>, RediscopeError> {
        if let Some(node) = self.node(address) {
            return Ok(node);
        }
        let endpoint = parse_address(address)
            .ok_or_else(|| RediscopeError::Protocol(format!("bad redirect address '{address}'")))?;
        let (connection, mut events) =
            TcpConnection::open(self.node_params(&endpoint), self.tls_for(&endpoint.host)?);
        await_ready(&mut events).await?;
        tokio::spawn(drain_events(address.to_string(), events));
        self.nodes.write().insert(
            address.to_string(),
            ClusterNode {
                connection: connection.clone(),
                primary: true,
            },
        );
        Ok(connection)
    }
}

#[async_trait]
impl NativeCluster for TcpCluster {
    async fn send_command(&self, args: Vec<Bytes>) -> Result<RespFrame, RediscopeError> {
        let node = self.route(&args)?;
        let reply = node.send_command(args.clone()).await?;

        let RespFrame::Error(message) = &reply else {
            return Ok(reply);
        };
        match ReplyErrorKind::classify(message) {
            ReplyErrorKind::Moved => {
                let (slot, address) = parse_redirect(message)?;
                debug!("Slot {slot} moved to {address}");
                let target = self.redirect_target(&address).await?;
                self.slots.write()[slot as usize] = Some(address);
                target.send_command(args).await
            }
            ReplyErrorKind::Ask => {
                let (_, address) = parse_redirect(message)?;
                let target = self.redirect_target(&address).await?;
                target.send_command(vec!["ASKING".into()]).await?.into_result()?;
                target.send_command(args).await
            }
            _ => Ok(reply),
        }
    }

    fn nodes(&self, role: NodeRole) -> Vec<Arc<dyn NativeConnection>> {
        self.nodes
            .read()
            .values()
            .filter(|n| role == NodeRole::All || n.primary)
            .map(|n| n.connection.clone() as Arc<dyn NativeConnection>)
            .collect()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
            && self
                .nodes
                .read()
                .values()
                .filter(|n| n.primary)
                .all(|n| n.connection.is_ready())
    }

    async fn disconnect(&self) -> Result<(), RediscopeError> {
        self.ready.store(false, Ordering::Release);
        let _ = self.shutdown_tx.send(());
        let nodes: Vec<_> = self.nodes.read().values().cloned().collect();
        for node in nodes {
            node.connection.disconnect().await?;
        }
        Ok(())
    }
}

/// Waits for a pending node connection to settle.
async fn await_ready(events: &mut LifecycleEvents) -> Result<(), RediscopeError> {
    let mut last_error = None;
    while let Some(event) = events.recv().await {
        match event {
            LifecycleEvent::Ready => return Ok(()),
            LifecycleEvent::Error(e) => last_error = Some(e),
            LifecycleEvent::End => break,
            LifecycleEvent::Connect | LifecycleEvent::Reconnecting { .. } => {}
        }
    }
    Err(last_error.unwrap_or(RediscopeError::ServerClosedConnection))
}

async fn disconnect_all(nodes: &BTreeMap<String, ClusterNode>) {
    for node in nodes.values() {
        let _ = node.connection.disconnect().await;
    }
}

async fn drain_events(address: String, mut events: LifecycleEvents) {
    while let Some(event) = events.recv().await {
        match event {
            LifecycleEvent::Error(e) => warn!("Cluster node {address}: {e}"),
            LifecycleEvent::End => debug!("Cluster node {address} closed"),
            other => debug!("Cluster node {address}: {other:?}"),
        }
    }
}

fn parse_address(address: &str) -> Option<Endpoint> {
    let (host, port) = address.rsplit_once(':')?;
    Some(Endpoint::new(host, port.parse().ok()?))
}

/// Parses `MOVED 3999 127.0.0.1:6381` (or `ASK ...`) into slot and address.
fn parse_redirect(message: &str) -> Result<(u16, String), RediscopeError> {
    let mut parts = message.split_whitespace().skip(1);
    let slot = parts.next().and_then(|s| s.parse::<u16>().ok());
    let address = parts.next();
    match (slot, address) {
        (Some(slot), Some(address)) if slot < NUM_SLOTS => Ok((slot, address.to_string())),
        _ => Err(RediscopeError::Protocol(format!("bad redirect: {message}"))),
    }
}

fn parse_endpoint(frame: &RespFrame, fallback_host: &str) -> Option<Endpoint> {
    let RespFrame::Array(parts) = frame else {
        return None;
    };
    let host = parts.first()?.as_text()?;
    let port = match parts.get(1)? {
        RespFrame::Integer(p) => u16::try_from(*p).ok()?,
        _ => return None,
    };
    let host = if host.is_empty() || host == "?" {
        fallback_host.to_string()
    } else {
        host
    };
    Some(Endpoint::new(host, port))
}

fn parse_slot_range(frame: &RespFrame, fallback_host: &str) -> Option<SlotRange> {
    let RespFrame::Array(parts) = frame else {
        return None;
    };
    let bound = |i: usize| match parts.get(i) {
        Some(RespFrame::Integer(v)) => u16::try_from(*v).ok(),
        _ => None,
    };
    let start = bound(0)?;
    let end = bound(1)?;
    let primary = parse_endpoint(parts.get(2)?, fallback_host)?;
    let replicas = parts[3..]
        .iter()
        .filter_map(|p| parse_endpoint(p, fallback_host))
        .collect();
    Some(SlotRange {
        start,
        end,
        primary,
        replicas,
    })
}
