// src/core/native/mod.rs

//! The seam between the client core and the wire-level Redis client.
//!
//! Everything above this module talks to Redis only through the three traits
//! defined here. A connector opens a *pending* connection and hands back a
//! channel of `LifecycleEvent`s; the connection strategy decides when the
//! attempt has settled. `TcpConnector` is the default implementation.

mod cluster;
mod connection;
mod sentinel;
mod stream;
mod tcp;
mod tls;

pub use tcp::TcpConnector;

use crate::core::database::{Endpoint, TlsSettings};
use crate::core::protocol::{CommandEvent, RespFrame};
use crate::core::strategy::RetryPolicy;
use crate::core::RediscopeError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A signal emitted by a native connection while it connects, serves and reconnects.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// The transport is connected; the handshake has not finished yet.
    Connect,
    /// The connection accepts commands.
    Ready,
    Error(RediscopeError),
    /// The connection is closed for good and will not reconnect.
    End,
    Reconnecting { attempt: u32, delay: Duration },
}

pub type LifecycleEvents = mpsc::UnboundedReceiver<LifecycleEvent>;

/// Live command events from one node, as produced by `MONITOR`.
pub type CommandEventStream = BoxStream<'static, Result<CommandEvent, RediscopeError>>;

/// Which nodes of a topology a caller wants to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Primary,
    All,
}

/// Parameters for a single-node connection.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub endpoint: Endpoint,
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: Option<TlsSettings>,
    pub db: u32,
    pub connection_name: Option<String>,
    /// `None` disables reconnection: the first failure ends the connection.
    pub retry: Option<RetryPolicy>,
    /// Queued commands fail after this many reconnect attempts. `None` keeps them queued.
    pub max_retries_per_request: Option<u32>,
    pub connect_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ClusterParams {
    pub seeds: Vec<Endpoint>,
    /// Credentials, TLS and naming applied to every node connection. Its endpoint is ignored.
    pub node: ConnectParams,
}

#[derive(Debug, Clone)]
pub struct SentinelParams {
    pub sentinels: Vec<Endpoint>,
    pub master_name: String,
    pub sentinel_username: Option<String>,
    pub sentinel_password: Option<String>,
    /// Parameters for the master connection. Its endpoint is replaced by the discovered master.
    pub node: ConnectParams,
}

/// One connection to one node.
#[async_trait]
pub trait NativeConnection: Send + Sync + fmt::Debug {
    /// Sends one command and waits for its reply. Error replies come back as frames.
    async fn send_command(&self, args: Vec<Bytes>) -> Result<RespFrame, RediscopeError>;

    fn is_ready(&self) -> bool;

    /// Closes the connection. Closing twice is a no-op.
    async fn disconnect(&self) -> Result<(), RediscopeError>;

    /// `host:port` of the node.
    fn address(&self) -> String;

    /// Starts a live command stream from this node on a dedicated connection.
    async fn monitor(&self) -> Result<CommandEventStream, RediscopeError>;
}

/// A cluster-aware connection group that routes commands by key slot.
#[async_trait]
pub trait NativeCluster: Send + Sync + fmt::Debug {
    async fn send_command(&self, args: Vec<Bytes>) -> Result<RespFrame, RediscopeError>;

    fn nodes(&self, role: NodeRole) -> Vec<Arc<dyn NativeConnection>>;

    fn is_ready(&self) -> bool;

    async fn disconnect(&self) -> Result<(), RediscopeError>;
}

/// Opens pending connections. Returning `Err` means the connection could not even
/// be constructed (bad TLS material, no endpoints); runtime failures arrive as events.
pub trait NativeConnector: Send + Sync {
    fn open_standalone(
        &self,
        params: ConnectParams,
    ) -> Result<(Arc<dyn NativeConnection>, LifecycleEvents), RediscopeError>;

    fn open_cluster(
        &self,
        params: ClusterParams,
    ) -> Result<(Arc<dyn NativeCluster>, LifecycleEvents), RediscopeError>;

    fn open_sentinel(
        &self,
        params: SentinelParams,
    ) -> Result<(Arc<dyn NativeConnection>, LifecycleEvents), RediscopeError>;
}
