// src/core/client/mod.rs

//! A uniform client over standalone, sentinel and cluster connections.
//!
//! `RedisClient` composes a topology-specific inner connection with the state
//! the registry needs (identity, last use). Callers that must reach every node
//! ask for `nodes()` and get the same shape back whether the database has one
//! node or many.

mod fanout;

pub use fanout::{SwallowPolicy, fan_out};

use crate::core::RediscopeError;
use crate::core::database::ConnectionType;
use crate::core::metadata::ClientMetadata;
use crate::core::native::{CommandEventStream, NativeCluster, NativeConnection, NodeRole};
use crate::core::protocol::{CommandOptions, Reply, RespFrame};
use crate::core::ssh::SshTunnel;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::time::{Duration, Instant};
use tracing::debug;

/// The connection backing a client.
#[derive(Debug, Clone)]
pub enum ClientTopology {
    Standalone(Arc<dyn NativeConnection>),
    Sentinel(Arc<dyn NativeConnection>),
    Cluster(Arc<dyn NativeCluster>),
}

impl ClientTopology {
    pub fn connection_type(&self) -> ConnectionType {
        match self {
            ClientTopology::Standalone(_) => ConnectionType::Standalone,
            ClientTopology::Sentinel(_) => ConnectionType::Sentinel,
            ClientTopology::Cluster(_) => ConnectionType::Cluster,
        }
    }
}

pub struct RedisClient {
    id: String,
    metadata: ClientMetadata,
    topology: ClientTopology,
    tunnel: Option<Arc<dyn SshTunnel>>,
    created_at: Instant,
    // Microseconds after `created_at`.
    last_used_offset: AtomicU64,
    closed: AtomicBool,
}

impl fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisClient")
            .field("id", &self.id)
            .field("connection_type", &self.connection_type())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RedisClient {
    pub fn new(
        metadata: ClientMetadata,
        topology: ClientTopology,
        tunnel: Option<Arc<dyn SshTunnel>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: metadata.id(),
            metadata,
            topology,
            tunnel,
            created_at: Instant::now(),
            last_used_offset: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn metadata(&self) -> &ClientMetadata {
        &self.metadata
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.topology.connection_type()
    }

    pub fn topology(&self) -> &ClientTopology {
        &self.topology
    }

    pub fn last_time_used(&self) -> Instant {
        self.created_at + Duration::from_micros(self.last_used_offset.load(Ordering::Acquire))
    }

    /// Marks the client as used now. The timestamp never moves backwards.
    pub fn touch(&self) {
        let offset = Instant::now()
            .saturating_duration_since(self.created_at)
            .as_micros()
            .min(u64::MAX as u128) as u64;
        self.last_used_offset.fetch_max(offset, Ordering::AcqRel);
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_time_used())
    }

    /// Sends one command to the node responsible for it.
    pub async fn send_command<I, A>(
        &self,
        args: I,
        options: CommandOptions,
    ) -> Result<Reply, RediscopeError>
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        self.touch();
        let args: Vec<Bytes> = args.into_iter().map(Into::into).collect();
        let frame = self.dispatch(args).await?;
        Reply::from_frame(frame, options.reply_encoding)
    }

    async fn dispatch(&self, args: Vec<Bytes>) -> Result<RespFrame, RediscopeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RediscopeError::NoConnection);
        }
        match &self.topology {
            ClientTopology::Standalone(conn) | ClientTopology::Sentinel(conn) => {
                conn.send_command(args).await
            }
            ClientTopology::Cluster(cluster) => cluster.send_command(args).await,
        }
    }

    /// Per-node handles. Standalone and sentinel clients return themselves.
    pub fn nodes(self: &Arc<Self>, role: NodeRole) -> Vec<Arc<RedisClient>> {
        match &self.topology {
            ClientTopology::Standalone(_) | ClientTopology::Sentinel(_) => vec![self.clone()],
            ClientTopology::Cluster(cluster) => cluster
                .nodes(role)
                .into_iter()
                .map(|node| {
                    let mut metadata = self.metadata.clone();
                    metadata.unique_id = Some(node.address());
                    RedisClient::new(metadata, ClientTopology::Standalone(node), None)
                })
                .collect(),
        }
    }

    /// Address of the node behind a single-node client, `None` for a cluster.
    pub fn address(&self) -> Option<String> {
        match &self.topology {
            ClientTopology::Standalone(conn) | ClientTopology::Sentinel(conn) => {
                Some(conn.address())
            }
            ClientTopology::Cluster(_) => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        match &self.topology {
            ClientTopology::Standalone(conn) | ClientTopology::Sentinel(conn) => conn.is_ready(),
            ClientTopology::Cluster(cluster) => cluster.is_ready(),
        }
    }

    /// Closes the connection and any tunnel behind it. Later calls do nothing.
    pub async fn disconnect(&self) -> Result<(), RediscopeError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        debug!("Disconnecting client {}", self.id);
        let result = match &self.topology {
            ClientTopology::Standalone(conn) | ClientTopology::Sentinel(conn) => {
                conn.disconnect().await
            }
            ClientTopology::Cluster(cluster) => cluster.disconnect().await,
        };
        if let Some(tunnel) = &self.tunnel {
            tunnel.close().await;
        }
        result
    }

    /// Opens a live command stream on every node of the database.
    pub async fn monitor_streams(
        self: &Arc<Self>,
    ) -> Result<Vec<CommandEventStream>, RediscopeError> {
        let mut streams = Vec::new();
        for node in self.nodes(NodeRole::All) {
            match &node.topology {
                ClientTopology::Standalone(conn) | ClientTopology::Sentinel(conn) => {
                    streams.push(conn.monitor().await?);
                }
                ClientTopology::Cluster(_) => {
                    return Err(RediscopeError::Internal(
                        "cluster node handle wraps a cluster".into(),
                    ));
                }
            }
        }
        Ok(streams)
    }

    /// The `addr=` this client's connection has on the server, from `CLIENT INFO`.
    pub async fn client_address(self: &Arc<Self>) -> Result<Option<String>, RediscopeError> {
        let Some(node) = self.nodes(NodeRole::Primary).into_iter().next() else {
            return Ok(None);
        };
        let reply = node
            .send_command(["CLIENT", "INFO"], CommandOptions::default())
            .await?;
        Ok(reply.as_str().and_then(|info| {
            info.split_whitespace()
                .find_map(|field| field.strip_prefix("addr="))
                .map(str::to_string)
        }))
    }
}
